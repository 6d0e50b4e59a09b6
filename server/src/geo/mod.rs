//! Remote geodata module
//!
//! Builds spatial queries, decodes the remote payloads and normalizes them
//! into the canonical feature model.

pub mod normalize;
pub mod parser;
pub mod query;
pub mod types;

pub use normalize::GeometryNormalizer;
pub use query::{DEFAULT_OVERPASS_URL, GeoQueryClient, OverpassClient};
pub use types::{
    BoundingArea, ElementType, ErrorKind, Feature, FeatureKey, LatLon, MemberRole, PointFeature,
    PolygonFeature, QueryError, QueryResult, RawRecord, RelationMember, SourceShape, SpatialQuery,
    TagFilter, Tags,
};
