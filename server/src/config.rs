//! Server configuration
//!
//! Configuration is loaded from environment variables on top of defaults
//! describing the Azraq camp area.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geo::{BoundingArea, DEFAULT_OVERPASS_URL, SourceShape, SpatialQuery, TagFilter};
use crate::layers::{StylePolicy, StyleSet};

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Overpass interpreter endpoint
    pub overpass_url: String,

    /// Overlay engine configuration
    pub engine: EngineConfig,

    /// Static file serving for the page shell
    pub static_files: StaticFilesConfig,
}

/// Everything one overlay engine instance needs, fixed at construction
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Area of interest shared by every source
    pub area: BoundingArea,
    /// Remote data sources, one layer each
    pub sources: Vec<SourceConfig>,
    /// Bounded wait for sources without their own timeout
    pub query_timeout: Duration,
    /// Default style policy per layer kind
    pub styles: StyleSet,
}

/// One remote data source feeding one named layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Source identifier, also the target layer name
    pub name: String,
    pub filter: TagFilter,
    pub shape: SourceShape,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StylePolicy>,
}

/// Static file configuration
#[derive(Debug, Clone, Default)]
pub struct StaticFilesConfig {
    /// Directory holding the built page shell (index.html etc.)
    pub dir: Option<PathBuf>,
}

impl SourceConfig {
    pub fn points(name: impl Into<String>, filter: TagFilter) -> Self {
        Self {
            name: name.into(),
            filter,
            shape: SourceShape::Points,
            timeout_ms: None,
            style: None,
        }
    }

    pub fn polygons(name: impl Into<String>, filter: TagFilter) -> Self {
        Self {
            shape: SourceShape::Polygons,
            ..Self::points(name, filter)
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_style(mut self, style: StylePolicy) -> Self {
        self.style = Some(style);
        self
    }

    /// Effective timeout, falling back to `default`
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn query(&self, area: BoundingArea) -> SpatialQuery {
        SpatialQuery {
            source: self.name.clone(),
            filter: self.filter.clone(),
            shape: self.shape,
            area,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            engine: EngineConfig::default(),
            static_files: StaticFilesConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            area: BoundingArea::new(31.88, 36.55, 31.93, 36.61),
            sources: default_sources(),
            query_timeout: Duration::from_secs(30),
            styles: StyleSet::default(),
        }
    }
}

/// Points of interest and facility footprints around the camp
pub fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::points("water_points", TagFilter::equals("amenity", "drinking_water")),
        SourceConfig::points("toilets", TagFilter::equals("amenity", "toilets")),
        SourceConfig::polygons("schools", TagFilter::equals("amenity", "school")),
        SourceConfig::polygons("health_facilities", TagFilter::has_key("healthcare")),
    ]
}

/// Parse `south,west,north,east`
fn parse_bbox(value: &str) -> Option<BoundingArea> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<Vec<f64>>>()?;
    match parts.as_slice() {
        [south, west, north, east] => Some(BoundingArea::new(*south, *west, *north, *east)),
        _ => None,
    }
}

fn parse_sources(value: &str) -> Result<Vec<SourceConfig>, serde_json::Error> {
    serde_json::from_str(value)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }
        if let Ok(url) = env::var("OVERPASS_URL")
            && !url.is_empty()
        {
            config.overpass_url = url;
        }

        // Engine config
        if let Ok(val) = env::var("AREA_BBOX") {
            match parse_bbox(&val) {
                Some(area) => config.engine.area = area,
                None => warn!("Ignoring malformed AREA_BBOX '{}'", val),
            }
        }
        if let Ok(val) = env::var("QUERY_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.engine.query_timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("OVERLAY_SOURCES")
            && !val.is_empty()
        {
            match parse_sources(&val) {
                Ok(sources) => config.engine.sources = sources,
                Err(e) => warn!("Ignoring malformed OVERLAY_SOURCES: {}", e),
            }
        }

        // Static files
        if let Ok(dir) = env::var("STATIC_FILES_DIR")
            && !dir.is_empty()
        {
            config.static_files.dir = Some(PathBuf::from(dir));
        }

        config
    }
}
