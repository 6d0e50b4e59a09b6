//! Render-ready view state and bookkeeping types

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::geo::{ErrorKind, Feature, FeatureKey, QueryError};
use crate::layers::{Annotation, FeatureRef, HoverState, LayerSnapshot, Style};

/// Get current time in milliseconds since epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Most recent failure of one source, cleared by its next success
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub at: u64,
}

impl SourceFailure {
    pub fn new(source: &str, error: &QueryError) -> Self {
        Self {
            source: source.to_string(),
            kind: error.kind(),
            message: error.to_string(),
            at: now_millis(),
        }
    }
}

/// Advisory label shown after a feature click
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Tooltip {
    pub layer: String,
    pub feature: FeatureKey,
    pub label: String,
}

const LABEL_FALLBACK_TAGS: [&str; 3] = ["amenity", "building", "landuse"];

/// Label from the `name` tag, else a descriptive tag, else `"{kind} {element}/{id}"`
pub fn tooltip_label(feature: &Feature) -> String {
    let tags = feature.tags();
    tags.get("name")
        .filter(|name| !name.is_empty())
        .or_else(|| LABEL_FALLBACK_TAGS.iter().find_map(|key| tags.get(*key)))
        .cloned()
        .unwrap_or_else(|| format!("{} {}", feature.kind_name(), feature.key()))
}

/// Style override for one hovered feature
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HoverOverride {
    pub layer: String,
    pub feature: FeatureKey,
    pub style: Style,
}

/// Immutable snapshot handed to the view
#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    /// Engine revision, bumped on every state change
    pub rev: u64,
    pub layers: LayerSnapshot,
    pub hover: Vec<HoverOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<Tooltip>,
    pub failures: Vec<SourceFailure>,
}

impl MapView {
    /// Effective style of a feature, `None` when its layer is unknown
    pub fn style_of(&self, layer: &str, feature: FeatureKey) -> Option<&Style> {
        if let Some(o) = self
            .hover
            .iter()
            .find(|o| o.layer == layer && o.feature == feature)
        {
            return Some(&o.style);
        }
        self.layers.get(layer).map(|l| &l.style.default)
    }
}

/// What a handled view event did
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventOutcome {
    Hover {
        feature: FeatureRef,
        state: HoverState,
        changed: bool,
    },
    AnnotationAdded {
        annotation: Annotation,
    },
    Tooltip {
        tooltip: Tooltip,
    },
    Visibility {
        layer: String,
        visible: bool,
    },
    RefreshScheduled {
        source: String,
    },
}
