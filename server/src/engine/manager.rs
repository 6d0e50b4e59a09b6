use crate::config::{EngineConfig, SourceConfig};
use crate::engine::state::{EventOutcome, HoverOverride, MapView, SourceFailure, Tooltip, tooltip_label};
use crate::geo::{
    BoundingArea, Feature, FeatureKey, GeoQueryClient, GeometryNormalizer, QueryError,
    QueryResult,
};
use crate::layers::{
    ANNOTATION_LAYER, Annotation, AnnotationError, AnnotationStore, FeatureRef,
    InteractionStateMachine, LayerError, LayerKind, LayerRegistry, Transition,
};
use crate::protocol::ViewEvent;
use dashmap::DashMap;
use indexmap::IndexMap;
use metrics::{counter, histogram};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Overlay engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Layer not found: {0}")]
    UnknownLayer(String),

    #[error("Feature {feature} not found in layer {layer}")]
    UnknownFeature { layer: String, feature: FeatureKey },

    #[error("Source not found: {0}")]
    UnknownSource(String),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error("Engine has been shut down")]
    ShutDown,
}

impl EngineError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::UnknownLayer(_) => "unknown_layer",
            EngineError::UnknownFeature { .. } => "unknown_feature",
            EngineError::UnknownSource(_) => "unknown_source",
            EngineError::Annotation(_) => "invalid_coordinate",
            EngineError::ShutDown => "shut_down",
        }
    }
}

impl From<LayerError> for EngineError {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::NotFound(name) => EngineError::UnknownLayer(name),
        }
    }
}

/// State shared with in-flight source tasks
struct EngineInner {
    registry: LayerRegistry,
    hover: RwLock<InteractionStateMachine>,
    annotations: RwLock<AnnotationStore>,
    tooltip: RwLock<Option<Tooltip>>,
    failures: DashMap<String, SourceFailure>,
    normalizer: GeometryNormalizer,
    rev: AtomicU64,
    changes: watch::Sender<u64>,
    area: BoundingArea,
    sources: IndexMap<String, SourceConfig>,
    default_timeout: Duration,
}

/// Top-level overlay engine
///
/// Owns one fetch task per data source and feeds each resolution through the
/// normalizer into its own layer, independently of the other sources.
pub struct OverlayEngine {
    inner: Arc<EngineInner>,
    client: Arc<dyn GeoQueryClient>,
    shutdown: CancellationToken,
    /// Cancellation token of the latest fetch per source
    tasks: DashMap<String, CancellationToken>,
    started: AtomicBool,
}

impl OverlayEngine {
    pub fn new(config: EngineConfig, client: Arc<dyn GeoQueryClient>) -> Result<Self, EngineError> {
        config
            .area
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let mut sources = IndexMap::new();
        for source in config.sources {
            if source.name.is_empty() || source.name == ANNOTATION_LAYER {
                return Err(EngineError::InvalidConfig(format!(
                    "invalid source name '{}'",
                    source.name
                )));
            }
            source
                .filter
                .validate()
                .map_err(|e| EngineError::InvalidConfig(format!("{}: {}", source.name, e)))?;
            if sources.contains_key(&source.name) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            sources.insert(source.name.clone(), source);
        }

        let (changes, _) = watch::channel(0);
        let inner = EngineInner {
            registry: LayerRegistry::new(config.styles),
            hover: RwLock::new(InteractionStateMachine::new()),
            annotations: RwLock::new(AnnotationStore::new()),
            tooltip: RwLock::new(None),
            failures: DashMap::new(),
            normalizer: GeometryNormalizer::new(),
            rev: AtomicU64::new(0),
            changes,
            area: config.area,
            sources,
            default_timeout: config.query_timeout,
        };

        Ok(Self {
            inner: Arc::new(inner),
            client,
            shutdown: CancellationToken::new(),
            tasks: DashMap::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Create every layer and fire one query per source without awaiting any
    ///
    /// Layers are created empty in configuration order, followed by the
    /// annotations layer, so their order never depends on completion order.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Overlay engine already started");
            return Ok(());
        }

        for source in self.inner.sources.values() {
            self.inner
                .registry
                .ensure_layer(&source.name, source.shape.into(), source.style.clone())
                .await;
        }
        self.inner
            .registry
            .ensure_layer(ANNOTATION_LAYER, LayerKind::Annotation, None)
            .await;
        self.inner.notify();

        for name in self.inner.sources.keys() {
            self.spawn_fetch(name);
        }

        info!(
            sources = self.inner.sources.len(),
            area = %self.inner.area,
            "Overlay engine started"
        );
        Ok(())
    }

    /// Re-issue one source's query on demand
    ///
    /// A still-pending earlier fetch for the same source is discarded when it
    /// resolves, so the latest request wins.
    pub fn refresh_source(&self, name: &str) -> Result<(), EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        if !self.inner.sources.contains_key(name) {
            return Err(EngineError::UnknownSource(name.to_string()));
        }

        counter!("campmap_source_refreshes_total", "source" => name.to_string()).increment(1);
        debug!(source = name, "Refreshing source");
        self.spawn_fetch(name);
        Ok(())
    }

    fn spawn_fetch(&self, name: &str) {
        let Some(source) = self.inner.sources.get(name) else {
            return;
        };

        let token = self.shutdown.child_token();
        if let Some(previous) = self.tasks.insert(name.to_string(), token.clone()) {
            previous.cancel();
        }

        let query = source.query(self.inner.area);
        let timeout = source.timeout(self.inner.default_timeout);
        let client = Arc::clone(&self.client);
        let inner: Weak<EngineInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let start = Instant::now();
            let result = match tokio::time::timeout(timeout, client.execute(&query)).await {
                Ok(result) => result,
                Err(_) => Err(QueryError::Timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                ))),
            };
            histogram!("campmap_source_fetch_duration_seconds", "source" => query.source.clone())
                .record(start.elapsed());

            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.apply_result(&query.source, result, &token).await;
        });
    }

    pub async fn pointer_enter(
        &self,
        layer: &str,
        feature: FeatureKey,
    ) -> Result<Transition, EngineError> {
        let snapshot = self.inner.registry.snapshot().await;
        let target = snapshot
            .get(layer)
            .ok_or_else(|| EngineError::UnknownLayer(layer.to_string()))?;
        if target.feature(feature).is_none() {
            return Err(EngineError::UnknownFeature {
                layer: layer.to_string(),
                feature,
            });
        }

        let transition = self
            .inner
            .hover
            .write()
            .await
            .pointer_enter(FeatureRef::new(layer, feature));
        if transition.is_changed() {
            self.inner.notify();
        }
        Ok(transition)
    }

    pub async fn pointer_leave(
        &self,
        layer: &str,
        feature: FeatureKey,
    ) -> Result<Transition, EngineError> {
        if self.inner.registry.snapshot().await.get(layer).is_none() {
            return Err(EngineError::UnknownLayer(layer.to_string()));
        }

        let transition = self
            .inner
            .hover
            .write()
            .await
            .pointer_leave(FeatureRef::new(layer, feature));
        if transition.is_changed() {
            self.inner.notify();
        }
        Ok(transition)
    }

    /// Background click: place an annotation and clear any tooltip
    pub async fn add_annotation(&self, lat: f64, lon: f64) -> Result<Annotation, EngineError> {
        // Held across the append so concurrent clicks publish in id order
        let mut store = self.inner.annotations.write().await;
        let annotation = store.add_at(lat, lon)?;
        self.inner
            .registry
            .append_feature(ANNOTATION_LAYER, annotation.to_feature())
            .await?;
        drop(store);

        *self.inner.tooltip.write().await = None;
        counter!("campmap_annotations_created_total").increment(1);
        info!(id = annotation.id, lat, lon, "Annotation added");
        self.inner.notify();
        Ok(annotation)
    }

    /// Feature click: show an advisory tooltip for that feature
    pub async fn click_feature(
        &self,
        layer: &str,
        key: FeatureKey,
    ) -> Result<Tooltip, EngineError> {
        let snapshot = self.inner.registry.snapshot().await;
        let target = snapshot
            .get(layer)
            .ok_or_else(|| EngineError::UnknownLayer(layer.to_string()))?;
        let feature = target
            .feature(key)
            .ok_or_else(|| EngineError::UnknownFeature {
                layer: layer.to_string(),
                feature: key,
            })?;

        let tooltip = Tooltip {
            layer: layer.to_string(),
            feature: key,
            label: tooltip_label(feature),
        };
        *self.inner.tooltip.write().await = Some(tooltip.clone());
        self.inner.notify();
        Ok(tooltip)
    }

    pub async fn set_visible(&self, layer: &str, visible: bool) -> Result<(), EngineError> {
        self.inner.registry.set_visible(layer, visible).await?;
        self.inner.notify();
        Ok(())
    }

    /// Route one event forwarded by the view
    pub async fn handle_event(&self, event: ViewEvent) -> Result<EventOutcome, EngineError> {
        counter!("campmap_view_events_total", "type" => event.name()).increment(1);

        match event {
            ViewEvent::PointerEnter { layer, feature } => {
                let transition = self.pointer_enter(&layer, feature).await?;
                Ok(hover_outcome(layer, feature, transition))
            }
            ViewEvent::PointerLeave { layer, feature } => {
                let transition = self.pointer_leave(&layer, feature).await?;
                Ok(hover_outcome(layer, feature, transition))
            }
            ViewEvent::MapClick { lat, lon } => {
                let annotation = self.add_annotation(lat, lon).await?;
                Ok(EventOutcome::AnnotationAdded { annotation })
            }
            ViewEvent::FeatureClick { layer, feature } => {
                let tooltip = self.click_feature(&layer, feature).await?;
                Ok(EventOutcome::Tooltip { tooltip })
            }
            ViewEvent::SetVisibility { layer, visible } => {
                self.set_visible(&layer, visible).await?;
                Ok(EventOutcome::Visibility { layer, visible })
            }
            ViewEvent::Refresh { source } => {
                self.refresh_source(&source)?;
                Ok(EventOutcome::RefreshScheduled { source })
            }
        }
    }

    /// Immutable snapshot of layers, hover overrides, tooltip and failures
    pub async fn current_view(&self) -> MapView {
        let rev = self.inner.rev.load(Ordering::SeqCst);
        let layers = self.inner.registry.snapshot().await;

        let hover = {
            let machine = self.inner.hover.read().await;
            machine
                .hovered()
                .filter_map(|f| {
                    let layer = layers.get(&f.layer)?;
                    Some(HoverOverride {
                        layer: f.layer.clone(),
                        feature: f.feature,
                        style: layer.style.resolve(machine.variant(f)).clone(),
                    })
                })
                .collect()
        };
        let tooltip = self.inner.tooltip.read().await.clone();
        let failures = self
            .inner
            .sources
            .keys()
            .filter_map(|name| self.inner.failures.get(name).map(|f| f.value().clone()))
            .collect();

        MapView {
            rev,
            layers,
            hover,
            tooltip,
            failures,
        }
    }

    pub async fn annotations(&self) -> Vec<Annotation> {
        self.inner.annotations.read().await.list()
    }

    /// Revision channel, updated after every state change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Tear down: results of queries still in flight are discarded
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("Overlay engine shutting down");
            self.shutdown.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for OverlayEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn hover_outcome(layer: String, feature: FeatureKey, transition: Transition) -> EventOutcome {
    EventOutcome::Hover {
        feature: FeatureRef::new(layer, feature),
        state: transition.state(),
        changed: transition.is_changed(),
    }
}

impl EngineInner {
    fn notify(&self) {
        let rev = self.rev.fetch_add(1, Ordering::SeqCst) + 1;
        self.changes.send_replace(rev);
    }

    /// Apply one source's terminal result to that source's layer only
    ///
    /// A result whose fetch was cancelled (teardown or a newer refresh) is
    /// discarded. The layer write checks `token` under the registry lock.
    async fn apply_result(&self, source: &str, result: QueryResult, token: &CancellationToken) {
        let Some(config) = self.sources.get(source) else {
            return;
        };

        match result {
            Ok(records) => {
                let record_count = records.len();
                let features = self.normalizer.normalize(records);
                let keys: HashSet<FeatureKey> = features.iter().map(Feature::key).collect();
                let count = features.len();

                let applied = self
                    .registry
                    .upsert_layer(source, config.shape.into(), features, || {
                        !token.is_cancelled()
                    })
                    .await;
                if applied.is_none() {
                    discard(source);
                    return;
                }

                let pruned = self
                    .hover
                    .write()
                    .await
                    .retain_layer(source, |key| keys.contains(&key));
                {
                    let mut tooltip = self.tooltip.write().await;
                    if tooltip
                        .as_ref()
                        .is_some_and(|t| t.layer == source && !keys.contains(&t.feature))
                    {
                        *tooltip = None;
                    }
                }
                self.failures.remove(source);

                counter!("campmap_source_results_total", "source" => source.to_string(), "outcome" => "ok")
                    .increment(1);
                counter!("campmap_features_applied_total", "source" => source.to_string())
                    .increment(count as u64);
                info!(
                    source,
                    records = record_count,
                    features = count,
                    hover_pruned = pruned,
                    "Source layer updated"
                );
            }
            Err(e) => {
                if token.is_cancelled() {
                    discard(source);
                    return;
                }
                let failure = SourceFailure::new(source, &e);
                counter!("campmap_source_results_total", "source" => source.to_string(), "outcome" => "error")
                    .increment(1);
                warn!(
                    source,
                    kind = ?failure.kind,
                    error = %e,
                    "Source query failed, keeping previous layer contents"
                );
                self.failures.insert(source.to_string(), failure);
            }
        }

        self.notify();
    }
}

/// Resolution after teardown or supersession is a no-op
fn discard(source: &str) {
    debug!(source, "Discarding result of cancelled fetch");
    counter!("campmap_results_discarded_total").increment(1);
}
