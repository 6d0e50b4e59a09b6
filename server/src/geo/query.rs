//! Spatial query client for Overpass-style endpoints

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::Url;
use tracing::{debug, warn};

use super::parser::parse_response;
use super::types::{QueryError, QueryResult, SourceShape, SpatialQuery};

/// Public Overpass API interpreter endpoint
pub const DEFAULT_OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Query parameter carrying the Overpass QL text
pub const QUERY_PARAM: &str = "data";

/// User-Agent sent with every request; the public Overpass instances ask for one
const USER_AGENT: &str = concat!("campmap/", env!("CARGO_PKG_VERSION"));

/// Trait for spatial query clients
#[async_trait]
pub trait GeoQueryClient: Send + Sync {
    /// Execute one query. Never retries; every failure is returned as a value.
    async fn execute(&self, query: &SpatialQuery) -> QueryResult;
}

/// Build the Overpass QL text for a query
///
/// Points fetch bare nodes (`out body`), polygons fetch ways and relations
/// with inline vertex geometry (`out geom`).
pub fn build_query_text(query: &SpatialQuery, server_timeout: Duration) -> String {
    let bbox = query.area;
    let filter = &query.filter;
    let body = match query.shape {
        SourceShape::Points => format!("node{filter}({bbox}););out body;"),
        SourceShape::Polygons => {
            format!("way{filter}({bbox});relation{filter}({bbox}););out geom;")
        }
    };
    format!(
        "[out:json][timeout:{}];({}",
        server_timeout.as_secs().max(1),
        body
    )
}

/// Percent-encode the query text into a GET URL for `endpoint`
pub fn build_request_url(endpoint: &str, query_text: &str) -> Result<Url, QueryError> {
    Url::parse_with_params(endpoint, &[(QUERY_PARAM, query_text)])
        .map_err(|e| QueryError::InvalidQuery(format!("Invalid endpoint '{}': {}", endpoint, e)))
}

/// Client for an Overpass API interpreter
#[derive(Clone)]
pub struct OverpassClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl OverpassClient {
    /// Create a client; `timeout` bounds both the transport and the server-side query
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| QueryError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn fetch(&self, url: Url) -> Result<Vec<u8>, QueryError> {
        let response = self.http.get(url).send().await.map_err(classify)?;

        if !response.status().is_success() {
            return Err(QueryError::Network(format!(
                "HTTP {} from {}",
                response.status(),
                self.endpoint
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(classify)
    }
}

fn classify(e: reqwest::Error) -> QueryError {
    if e.is_timeout() {
        QueryError::Timeout(e.to_string())
    } else if e.is_decode() {
        QueryError::Parse(e.to_string())
    } else {
        QueryError::Network(e.to_string())
    }
}

#[async_trait]
impl GeoQueryClient for OverpassClient {
    async fn execute(&self, query: &SpatialQuery) -> QueryResult {
        query.validate()?;

        let text = build_query_text(query, self.timeout);
        let url = build_request_url(&self.endpoint, &text)?;
        debug!(source = %query.source, query = %text, "Issuing spatial query");

        let start = Instant::now();
        let result = match self.fetch(url).await {
            Ok(bytes) => parse_response(&bytes),
            Err(e) => Err(e),
        };
        histogram!("campmap_query_duration_seconds").record(start.elapsed());

        match &result {
            Ok(records) => {
                counter!("campmap_queries_total", "outcome" => "ok").increment(1);
                debug!(
                    source = %query.source,
                    records = records.len(),
                    "Spatial query succeeded"
                );
            }
            Err(e) => {
                counter!("campmap_queries_total", "outcome" => "error").increment(1);
                warn!(source = %query.source, error = %e, "Spatial query failed");
            }
        }

        result
    }
}
