//! Layer style policies

use serde::{Deserialize, Serialize};

use super::types::LayerKind;

/// Rendering style for one feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Style {
    pub stroke_color: String,
    pub fill_color: String,
    pub fill_opacity: f32,
    /// Stroke width in pixels
    pub weight: f32,
    /// Marker radius in pixels (points only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f32>,
}

/// Which variant of a layer's style a feature currently renders with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StyleVariant {
    #[default]
    Default,
    Highlighted,
}

/// Default and highlighted styles of a layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StylePolicy {
    pub default: Style,
    pub highlighted: Style,
}

impl StylePolicy {
    pub fn resolve(&self, variant: StyleVariant) -> &Style {
        match variant {
            StyleVariant::Default => &self.default,
            StyleVariant::Highlighted => &self.highlighted,
        }
    }
}

/// Per-kind default policies, owned by one engine instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StyleSet {
    pub point: StylePolicy,
    pub polygon: StylePolicy,
    pub annotation: StylePolicy,
}

impl StyleSet {
    pub fn for_kind(&self, kind: LayerKind) -> &StylePolicy {
        match kind {
            LayerKind::Point => &self.point,
            LayerKind::Polygon => &self.polygon,
            LayerKind::Annotation => &self.annotation,
        }
    }
}

impl Default for StyleSet {
    fn default() -> Self {
        Self {
            point: StylePolicy {
                default: Style {
                    stroke_color: "#1D4ED8".to_string(),
                    fill_color: "#3B82F6".to_string(),
                    fill_opacity: 0.8,
                    weight: 1.0,
                    radius: Some(6.0),
                },
                highlighted: Style {
                    stroke_color: "#1E3A8A".to_string(),
                    fill_color: "#3B82F6".to_string(),
                    fill_opacity: 1.0,
                    weight: 3.0,
                    radius: Some(8.0),
                },
            },
            polygon: StylePolicy {
                default: Style {
                    stroke_color: "#B45309".to_string(),
                    fill_color: "#F59E0B".to_string(),
                    fill_opacity: 0.2,
                    weight: 2.0,
                    radius: None,
                },
                highlighted: Style {
                    stroke_color: "#B45309".to_string(),
                    fill_color: "#F59E0B".to_string(),
                    fill_opacity: 0.5,
                    weight: 3.0,
                    radius: None,
                },
            },
            annotation: StylePolicy {
                default: Style {
                    stroke_color: "#991B1B".to_string(),
                    fill_color: "#EF4444".to_string(),
                    fill_opacity: 0.9,
                    weight: 1.0,
                    radius: Some(7.0),
                },
                highlighted: Style {
                    stroke_color: "#7F1D1D".to_string(),
                    fill_color: "#EF4444".to_string(),
                    fill_opacity: 1.0,
                    weight: 3.0,
                    radius: Some(9.0),
                },
            },
        }
    }
}
