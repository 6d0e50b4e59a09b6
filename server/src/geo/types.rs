//! Geospatial value types and error definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// OSM-style tag dictionary, passed through verbatim from the remote service
pub type Tags = BTreeMap<String, String>;

/// Errors that can occur while querying the remote spatial service
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Query timed out: {0}")]
    Timeout(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Coarse failure classification exposed to the view
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    NetworkError,
    Timeout,
    ParseError,
    InvalidCoordinate,
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            QueryError::Network(_) => ErrorKind::NetworkError,
            QueryError::Timeout(_) => ErrorKind::Timeout,
            QueryError::Parse(_) => ErrorKind::ParseError,
        }
    }
}

/// Terminal outcome of one spatial query
pub type QueryResult = Result<Vec<RawRecord>, QueryError>;

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True when both components are finite and inside WGS84 bounds
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Rectangular area of interest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingArea {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingArea {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    /// Check the corners are valid coordinates with south < north and west < east
    pub fn validate(&self) -> Result<(), QueryError> {
        let corners = [
            LatLon::new(self.south, self.west),
            LatLon::new(self.north, self.east),
        ];
        if !corners.iter().all(LatLon::is_valid) {
            return Err(QueryError::InvalidQuery(format!(
                "bounding area has out-of-range corners: {}",
                self
            )));
        }
        if self.south >= self.north || self.west >= self.east {
            return Err(QueryError::InvalidQuery(format!(
                "bounding area is degenerate: {}",
                self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BoundingArea {
    /// Overpass bbox order: south,west,north,east
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}

/// Tag predicate such as `amenity=drinking_water`, or a bare key match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TagFilter {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn has_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.key.trim().is_empty() {
            return Err(QueryError::InvalidQuery("tag filter key is empty".into()));
        }
        let forbidden = |s: &str| s.contains(['"', '\\', '\n', '\r']);
        if forbidden(&self.key) || self.value.as_deref().is_some_and(forbidden) {
            return Err(QueryError::InvalidQuery(format!(
                "tag filter contains reserved characters: {}",
                self
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "[\"{}\"=\"{}\"]", self.key, value),
            None => write!(f, "[\"{}\"]", self.key),
        }
    }
}

/// Geometry shape a data source is expected to return
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceShape {
    /// Flat point elements (nodes)
    Points,
    /// Geometry-bearing ways and multipolygon relations
    Polygons,
}

/// One parameterized spatial query
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialQuery {
    /// Data source identifier
    pub source: String,
    pub filter: TagFilter,
    pub shape: SourceShape,
    pub area: BoundingArea,
}

impl SpatialQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        self.area.validate()?;
        self.filter.validate()
    }
}

/// Member role inside a multipolygon relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Outer,
    Inner,
}

/// Way member of a relation, with its resolved geometry
#[derive(Debug, Clone, PartialEq)]
pub struct RelationMember {
    pub role: MemberRole,
    pub vertices: Vec<LatLon>,
}

/// Source-specific record as decoded from the remote service
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Point {
        id: u64,
        position: LatLon,
        tags: Tags,
    },
    /// Open or closed vertex sequence
    Way {
        id: u64,
        vertices: Vec<LatLon>,
        tags: Tags,
    },
    Relation {
        id: u64,
        members: Vec<RelationMember>,
        tags: Tags,
    },
}

impl RawRecord {
    pub fn id(&self) -> u64 {
        match self {
            RawRecord::Point { id, .. }
            | RawRecord::Way { id, .. }
            | RawRecord::Relation { id, .. } => *id,
        }
    }
}

/// Kind of source element a feature came from
///
/// Node, way and relation ids are separate namespaces on the remote service,
/// so a feature is only identified by its element type and id together.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Node,
    Way,
    Relation,
    /// User-placed point, not backed by a remote element
    Annotation,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Node => "node",
            ElementType::Way => "way",
            ElementType::Relation => "relation",
            ElementType::Annotation => "annotation",
        };
        f.write_str(name)
    }
}

/// Identity of a feature within one layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureKey {
    pub element: ElementType,
    pub id: u64,
}

impl FeatureKey {
    pub fn new(element: ElementType, id: u64) -> Self {
        Self { element, id }
    }

    pub fn node(id: u64) -> Self {
        Self::new(ElementType::Node, id)
    }

    pub fn way(id: u64) -> Self {
        Self::new(ElementType::Way, id)
    }

    pub fn relation(id: u64) -> Self {
        Self::new(ElementType::Relation, id)
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.element, self.id)
    }
}

/// Point feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointFeature {
    pub element: ElementType,
    pub id: u64,
    pub position: LatLon,
    pub tags: Tags,
}

/// Polygon feature, possibly with several disjoint parts
///
/// Each entry of `polygons` is `[outer, hole, hole, ...]` with every ring
/// closed. A way has exactly one part; a multipolygon relation has one part
/// per usable outer member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolygonFeature {
    pub element: ElementType,
    pub id: u64,
    pub polygons: Vec<Vec<Vec<LatLon>>>,
    pub tags: Tags,
}

/// Canonical renderable feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Feature {
    Point(PointFeature),
    Polygon(PolygonFeature),
}

impl Feature {
    pub fn key(&self) -> FeatureKey {
        match self {
            Feature::Point(p) => FeatureKey::new(p.element, p.id),
            Feature::Polygon(p) => FeatureKey::new(p.element, p.id),
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Feature::Point(p) => &p.tags,
            Feature::Polygon(p) => &p.tags,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Feature::Point(_) => "point",
            Feature::Polygon(_) => "polygon",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_area_validation() {
        assert!(BoundingArea::new(31.88, 36.55, 31.93, 36.61).validate().is_ok());
        // south == north
        assert!(matches!(
            BoundingArea::new(31.9, 36.55, 31.9, 36.61).validate(),
            Err(QueryError::InvalidQuery(_))
        ));
        // west > east
        assert!(BoundingArea::new(31.88, 36.61, 31.93, 36.55).validate().is_err());
        // latitude out of range
        assert!(BoundingArea::new(-91.0, 0.0, 10.0, 1.0).validate().is_err());
        assert!(BoundingArea::new(f64::NAN, 0.0, 10.0, 1.0).validate().is_err());
    }

    #[test]
    fn test_bounding_area_display_uses_overpass_order() {
        let area = BoundingArea::new(31.88, 36.55, 31.93, 36.61);
        assert_eq!(area.to_string(), "31.88,36.55,31.93,36.61");
    }

    #[test]
    fn test_tag_filter_rendering() {
        assert_eq!(
            TagFilter::equals("amenity", "drinking_water").to_string(),
            r#"["amenity"="drinking_water"]"#
        );
        assert_eq!(TagFilter::has_key("healthcare").to_string(), r#"["healthcare"]"#);
    }

    #[test]
    fn test_tag_filter_rejects_reserved_characters() {
        assert!(TagFilter::has_key("").validate().is_err());
        assert!(TagFilter::has_key("   ").validate().is_err());
        assert!(TagFilter::equals("amenity", "x\"];out;").validate().is_err());
        assert!(TagFilter::equals("a\\b", "c").validate().is_err());
        assert!(TagFilter::equals("amenity", "school").validate().is_ok());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            QueryError::Timeout("slow".into()).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            QueryError::Parse("bad".into()).kind(),
            ErrorKind::ParseError
        );
    }

    #[test]
    fn test_feature_serializes_with_type_tag() {
        let feature = Feature::Point(PointFeature {
            element: ElementType::Node,
            id: 7,
            position: LatLon::new(31.9, 36.58),
            tags: Tags::new(),
        });
        let json = serde_json::to_value(&feature).unwrap();
        assert_eq!(json["type"], "point");
        assert_eq!(json["element"], "node");
        assert_eq!(json["id"], 7);
        assert_eq!(json["position"]["lat"], 31.9);
    }

    #[test]
    fn test_feature_key_distinguishes_element_types() {
        assert_ne!(FeatureKey::way(77), FeatureKey::relation(77));
        assert_eq!(FeatureKey::relation(77).to_string(), "relation/77");
        assert_eq!(
            serde_json::to_value(FeatureKey::way(3)).unwrap(),
            serde_json::json!({"element": "way", "id": 3})
        );
    }
}
