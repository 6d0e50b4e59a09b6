//! Layer types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::style::StylePolicy;
use crate::geo::{Feature, FeatureKey, SourceShape};

/// Name of the synthetic layer holding user annotations
pub const ANNOTATION_LAYER: &str = "annotations";

/// Errors raised by layer registry operations
#[derive(Debug, Error, PartialEq)]
pub enum LayerError {
    #[error("Layer not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Point,
    Polygon,
    Annotation,
}

impl From<SourceShape> for LayerKind {
    fn from(shape: SourceShape) -> Self {
        match shape {
            SourceShape::Points => LayerKind::Point,
            SourceShape::Polygons => LayerKind::Polygon,
        }
    }
}

/// Named, independently toggleable collection of features
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Layer {
    /// Unique key
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub style: StylePolicy,
    pub features: Vec<Feature>,
}

impl Layer {
    /// Create an empty, visible layer
    pub fn new(name: impl Into<String>, kind: LayerKind, style: StylePolicy) -> Self {
        Self {
            name: name.into(),
            kind,
            visible: true,
            style,
            features: Vec::new(),
        }
    }

    pub fn feature(&self, key: FeatureKey) -> Option<&Feature> {
        self.features.iter().find(|f| f.key() == key)
    }
}
