//! Decoder for Overpass JSON responses
//!
//! The remote payload is loosely typed: one endpoint family returns flat
//! nodes, geometry-bearing ways, or multipolygon relations depending on the
//! query. Each element is decoded independently into a [`RawRecord`]; an
//! element that matches none of the known shapes is skipped rather than
//! failing the whole response.

use serde::Deserialize;
use tracing::{debug, warn};

use super::types::{LatLon, MemberRole, QueryError, RawRecord, RelationMember, Tags};

/// Top-level response body
#[derive(Deserialize)]
struct OverpassResponse {
    elements: Vec<serde_json::Value>,
    /// Set by the server when the query hit a runtime error (e.g. its own timeout)
    #[serde(default)]
    remark: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Element {
    Node {
        id: u64,
        lat: f64,
        lon: f64,
        #[serde(default)]
        tags: Tags,
    },
    Way {
        id: u64,
        geometry: Vec<Option<Vertex>>,
        #[serde(default)]
        tags: Tags,
    },
    Relation {
        id: u64,
        members: Vec<Member>,
        #[serde(default)]
        tags: Tags,
    },
}

#[derive(Deserialize)]
struct Vertex {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct Member {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<Option<Vertex>>,
}

fn vertices(geometry: Vec<Option<Vertex>>) -> Vec<LatLon> {
    geometry
        .into_iter()
        .flatten()
        .map(|v| LatLon::new(v.lat, v.lon))
        .collect()
}

impl From<Element> for RawRecord {
    fn from(element: Element) -> Self {
        match element {
            Element::Node { id, lat, lon, tags } => RawRecord::Point {
                id,
                position: LatLon::new(lat, lon),
                tags,
            },
            Element::Way { id, geometry, tags } => RawRecord::Way {
                id,
                vertices: vertices(geometry),
                tags,
            },
            Element::Relation { id, members, tags } => RawRecord::Relation {
                id,
                members: members
                    .into_iter()
                    .filter(|m| m.kind == "way")
                    .filter_map(|m| {
                        let role = match m.role.as_str() {
                            "outer" | "" => MemberRole::Outer,
                            "inner" => MemberRole::Inner,
                            _ => return None,
                        };
                        Some(RelationMember {
                            role,
                            vertices: vertices(m.geometry),
                        })
                    })
                    .collect(),
                tags,
            },
        }
    }
}

/// Decode a response body into raw records, preserving element order
pub fn parse_response(body: &[u8]) -> Result<Vec<RawRecord>, QueryError> {
    let response: OverpassResponse = serde_json::from_slice(body)
        .map_err(|e| QueryError::Parse(format!("Invalid Overpass response: {}", e)))?;

    if let Some(remark) = response.remark.as_deref()
        && remark.contains("runtime error")
        && response.elements.is_empty()
    {
        warn!(remark, "Overpass reported a runtime error");
        return Err(if remark.contains("timed out") {
            QueryError::Timeout(remark.to_string())
        } else {
            QueryError::Network(remark.to_string())
        });
    }

    let total = response.elements.len();
    let records: Vec<RawRecord> = response
        .elements
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Element>(value) {
            Ok(element) => Some(RawRecord::from(element)),
            Err(e) => {
                debug!("Skipping unrecognized element: {}", e);
                None
            }
        })
        .collect();

    if records.len() < total {
        debug!(
            skipped = total - records.len(),
            total, "Dropped elements that matched no known shape"
        );
    }

    Ok(records)
}
