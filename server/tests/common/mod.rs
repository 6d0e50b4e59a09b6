//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules: a scripted in-memory
//! query client whose responses the test releases explicitly, plus engine and
//! router builders.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use campmap_server::config::{EngineConfig, SourceConfig};
use campmap_server::geo::{
    GeoQueryClient, LatLon, MemberRole, QueryError, QueryResult, RawRecord, RelationMember,
    SpatialQuery, TagFilter, Tags,
};
use campmap_server::server::{AppState, app_routes};
use campmap_server::{MapView, OverlayEngine};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

/// One scripted answer for one `execute` call
pub enum Scripted {
    /// Resolve immediately
    Ready(QueryResult),
    /// Resolve when the test sends on the paired sender
    Gated(oneshot::Receiver<QueryResult>),
    /// Never resolve
    Hang,
}

/// Query client answering from per-source scripts, in call order
#[derive(Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<SpatialQuery>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, source: &str, script: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn ready(&self, source: &str, result: QueryResult) {
        self.push(source, Scripted::Ready(result));
    }

    /// Queue a gated answer; the returned sender releases it
    pub fn gate(&self, source: &str) -> oneshot::Sender<QueryResult> {
        let (tx, rx) = oneshot::channel();
        self.push(source, Scripted::Gated(rx));
        tx
    }

    pub fn calls(&self, source: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.source == source)
            .count()
    }
}

#[async_trait]
impl GeoQueryClient for ScriptedClient {
    async fn execute(&self, query: &SpatialQuery) -> QueryResult {
        self.calls.lock().unwrap().push(query.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&query.source)
            .and_then(VecDeque::pop_front);

        match script {
            Some(Scripted::Ready(result)) => result,
            Some(Scripted::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(QueryError::Network("gate dropped".to_string()))),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Ok(Vec::new()),
        }
    }
}

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Point record inside the camp
pub fn node(id: u64) -> RawRecord {
    RawRecord::Point {
        id,
        position: LatLon::new(31.905 + id as f64 * 1e-4, 36.581),
        tags: tags(&[("amenity", "drinking_water")]),
    }
}

/// Closed square ring with its south-west corner at `(lat, lon)`
pub fn square_ring(lat: f64, lon: f64) -> Vec<LatLon> {
    vec![
        LatLon::new(lat, lon),
        LatLon::new(lat + 0.001, lon),
        LatLon::new(lat + 0.001, lon + 0.001),
        LatLon::new(lat, lon + 0.001),
        LatLon::new(lat, lon),
    ]
}

/// Closed square way with `name` set
pub fn square_way(id: u64, name: &str) -> RawRecord {
    RawRecord::Way {
        id,
        vertices: square_ring(31.9, 36.58),
        tags: tags(&[("amenity", "school"), ("name", name)]),
    }
}

/// Multipolygon relation with two disjoint outer squares
pub fn two_part_relation(id: u64, name: &str) -> RawRecord {
    RawRecord::Relation {
        id,
        members: [square_ring(31.91, 36.59), square_ring(31.92, 36.60)]
            .into_iter()
            .map(|vertices| RelationMember {
                role: MemberRole::Outer,
                vertices,
            })
            .collect(),
        tags: tags(&[("amenity", "school"), ("name", name)]),
    }
}

/// Two point sources and one polygon source over the default area
pub fn test_config() -> EngineConfig {
    EngineConfig {
        sources: vec![
            SourceConfig::points("water_points", TagFilter::equals("amenity", "drinking_water")),
            SourceConfig::points("toilets", TagFilter::equals("amenity", "toilets")),
            SourceConfig::polygons("schools", TagFilter::equals("amenity", "school")),
        ],
        query_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

pub fn create_engine(config: EngineConfig, client: Arc<ScriptedClient>) -> Arc<OverlayEngine> {
    Arc::new(OverlayEngine::new(config, client).unwrap())
}

/// Wait until the engine's view satisfies `pred`, panicking after 2s
pub async fn wait_for(engine: &OverlayEngine, pred: impl Fn(&MapView) -> bool) -> MapView {
    let mut changes = engine.subscribe();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let view = engine.current_view().await;
        if pred(&view) {
            return view;
        }
        if tokio::time::timeout_at(deadline, changes.changed())
            .await
            .is_err()
        {
            panic!("view never reached expected state; last rev {}", view.rev);
        }
    }
}

pub fn feature_ids(view: &MapView, layer: &str) -> Vec<u64> {
    view.layers
        .get(layer)
        .map(|l| l.features.iter().map(|f| f.key().id).collect())
        .unwrap_or_default()
}

/// Create a test application router with state
pub fn create_test_app_with_state(engine: Arc<OverlayEngine>) -> (Router, AppState) {
    create_test_app_for(AppState::new(engine))
}

/// Router over a prepared state, with the same layers as production
pub fn create_test_app_for(app_state: AppState) -> (Router, AppState) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = app_routes(app_state.clone()).layer(cors);
    (app, app_state)
}

/// Started engine with every source answering immediately
pub async fn create_started_engine() -> Arc<OverlayEngine> {
    let client = ScriptedClient::new();
    client.ready("water_points", Ok(vec![node(1), node(2)]));
    client.ready("schools", Ok(vec![square_way(10, "Azraq School 1")]));

    let engine = create_engine(test_config(), client);
    engine.start().await.unwrap();
    wait_for(&engine, |v| {
        feature_ids(v, "water_points").len() == 2 && feature_ids(v, "schools").len() == 1
    })
    .await;
    engine
}

/// Started engine plus its router
pub async fn create_test_app() -> (Router, Arc<OverlayEngine>) {
    let engine = create_started_engine().await;
    let (app, _) = create_test_app_with_state(engine.clone());
    (app, engine)
}
