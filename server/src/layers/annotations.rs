//! In-session store for user-placed point annotations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::state::now_millis;
use crate::geo::{ElementType, Feature, LatLon, PointFeature, Tags};

#[derive(Debug, Error, PartialEq)]
pub enum AnnotationError {
    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

/// User-created point, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
    /// Creation time in milliseconds since the Unix epoch
    pub created_at: u64,
}

impl Annotation {
    pub fn to_feature(&self) -> Feature {
        let mut tags = Tags::new();
        tags.insert("source".to_string(), "annotation".to_string());
        tags.insert("created_at".to_string(), self.created_at.to_string());
        Feature::Point(PointFeature {
            element: ElementType::Annotation,
            id: self.id,
            position: LatLon::new(self.lat, self.lon),
            tags,
        })
    }
}

/// Append-only annotation list with monotonic ids starting at 0
#[derive(Debug, Default)]
pub struct AnnotationStore {
    next_id: u64,
    annotations: Vec<Annotation>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an annotation at `(lat, lon)`
    ///
    /// Coordinates outside WGS84 range (or non-finite) are rejected, not clamped.
    pub fn add_at(&mut self, lat: f64, lon: f64) -> Result<Annotation, AnnotationError> {
        if !LatLon::new(lat, lon).is_valid() {
            return Err(AnnotationError::InvalidCoordinate { lat, lon });
        }

        let annotation = Annotation {
            id: self.next_id,
            lat,
            lon,
            created_at: now_millis(),
        };
        self.next_id += 1;
        self.annotations.push(annotation.clone());
        Ok(annotation)
    }

    pub fn list(&self) -> Vec<Annotation> {
        self.annotations.clone()
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}
