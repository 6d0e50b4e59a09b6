//! Conversion of raw source records into canonical features

use tracing::debug;

use super::types::{
    ElementType, Feature, LatLon, MemberRole, PointFeature, PolygonFeature, RawRecord,
    RelationMember,
};

/// Minimum number of usable vertices for a polygon ring, before closing
pub const MIN_RING_VERTICES: usize = 3;

/// Pure, order-preserving normalizer from [`RawRecord`] to [`Feature`]
#[derive(Debug, Clone)]
pub struct GeometryNormalizer {
    min_ring_vertices: usize,
}

impl Default for GeometryNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryNormalizer {
    pub fn new() -> Self {
        Self {
            min_ring_vertices: MIN_RING_VERTICES,
        }
    }

    /// Normalize a batch of records
    ///
    /// Points map 1:1. Ways become single-ring polygons when they have enough
    /// usable vertices and are dropped otherwise. A relation yields one
    /// multi-part polygon with a part per usable outer member and inner
    /// members attached as holes, or nothing when no outer is usable.
    pub fn normalize(&self, records: Vec<RawRecord>) -> Vec<Feature> {
        let mut features = Vec::with_capacity(records.len());

        for record in records {
            match record {
                RawRecord::Point { id, position, tags } => {
                    features.push(Feature::Point(PointFeature {
                        element: ElementType::Node,
                        id,
                        position,
                        tags,
                    }));
                }
                RawRecord::Way { id, vertices, tags } => match self.close_ring(vertices) {
                    Some(ring) => features.push(Feature::Polygon(PolygonFeature {
                        element: ElementType::Way,
                        id,
                        polygons: vec![vec![ring]],
                        tags,
                    })),
                    None => debug!(way_id = id, "Skipping way with too few usable vertices"),
                },
                RawRecord::Relation { id, members, tags } => {
                    let polygons = self.assemble_relation(id, members);
                    if polygons.is_empty() {
                        debug!(relation_id = id, "Skipping relation without a usable outer ring");
                        continue;
                    }
                    features.push(Feature::Polygon(PolygonFeature {
                        element: ElementType::Relation,
                        id,
                        polygons,
                        tags,
                    }));
                }
            }
        }

        features
    }

    /// Filter unusable vertices and force-close the ring
    fn close_ring(&self, vertices: Vec<LatLon>) -> Option<Vec<LatLon>> {
        let mut ring: Vec<LatLon> = vertices.into_iter().filter(LatLon::is_valid).collect();
        if ring.len() < self.min_ring_vertices {
            return None;
        }
        if ring.first() != ring.last() {
            ring.push(ring[0]);
        }
        Some(ring)
    }

    /// Group relation members into polygons: `[outer, hole, hole, ...]`
    fn assemble_relation(&self, id: u64, members: Vec<RelationMember>) -> Vec<Vec<Vec<LatLon>>> {
        let mut polygons: Vec<Vec<Vec<LatLon>>> = Vec::new();
        let mut inners = Vec::new();

        for member in members {
            let Some(ring) = self.close_ring(member.vertices) else {
                continue;
            };
            match member.role {
                MemberRole::Outer => polygons.push(vec![ring]),
                MemberRole::Inner => inners.push(ring),
            }
        }

        for inner in inners {
            let owner = polygons
                .iter_mut()
                .find(|rings| ring_contains(&rings[0], inner[0]));
            match owner {
                Some(rings) => rings.push(inner),
                None => debug!(relation_id = id, "Dropping inner ring outside every outer ring"),
            }
        }

        polygons
    }
}

/// Even-odd ray casting test on a closed ring
fn ring_contains(ring: &[LatLon], point: LatLon) -> bool {
    let mut inside = false;
    for edge in ring.windows(2) {
        let (a, b) = (edge[0], edge[1]);
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let crossing = a.lon + (point.lat - a.lat) / (b.lat - a.lat) * (b.lon - a.lon);
            if point.lon < crossing {
                inside = !inside;
            }
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::types::{FeatureKey, Tags};

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn point(id: u64, lat: f64, lon: f64) -> RawRecord {
        RawRecord::Point {
            id,
            position: LatLon::new(lat, lon),
            tags: tags(&[("amenity", "drinking_water")]),
        }
    }

    fn way(id: u64, coords: &[(f64, f64)]) -> RawRecord {
        RawRecord::Way {
            id,
            vertices: coords.iter().map(|&(lat, lon)| LatLon::new(lat, lon)).collect(),
            tags: tags(&[("amenity", "school")]),
        }
    }

    fn square(lat: f64, lon: f64, size: f64) -> Vec<LatLon> {
        vec![
            LatLon::new(lat, lon),
            LatLon::new(lat + size, lon),
            LatLon::new(lat + size, lon + size),
            LatLon::new(lat, lon + size),
            LatLon::new(lat, lon),
        ]
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert!(GeometryNormalizer::new().normalize(Vec::new()).is_empty());
    }

    #[test]
    fn test_points_map_one_to_one_with_tags() {
        let features = GeometryNormalizer::new().normalize(vec![point(1, 31.9, 36.58)]);
        assert_eq!(features.len(), 1);
        match &features[0] {
            Feature::Point(p) => {
                assert_eq!(p.id, 1);
                assert_eq!(p.position, LatLon::new(31.9, 36.58));
                assert_eq!(p.tags, tags(&[("amenity", "drinking_water")]));
            }
            other => panic!("expected point, got {:?}", other),
        }
    }

    #[test]
    fn test_two_vertex_way_is_dropped() {
        let features =
            GeometryNormalizer::new().normalize(vec![way(1, &[(0.0, 0.0), (1.0, 1.0)])]);
        assert!(features.is_empty());
    }

    #[test]
    fn test_closed_way_keeps_vertex_count() {
        let coords = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (0.0, 0.0)];
        let features = GeometryNormalizer::new().normalize(vec![way(5, &coords)]);
        assert_eq!(features.len(), 1);
        match &features[0] {
            Feature::Polygon(p) => {
                assert_eq!(p.polygons.len(), 1);
                assert_eq!(p.polygons[0].len(), 1);
                assert_eq!(p.polygons[0][0].len(), coords.len());
            }
            other => panic!("expected polygon, got {:?}", other),
        }

        // Three vertices with coinciding endpoints stay at three
        let features =
            GeometryNormalizer::new().normalize(vec![way(6, &[(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)])]);
        assert!(matches!(&features[0], Feature::Polygon(p) if p.polygons[0][0].len() == 3));
    }

    #[test]
    fn test_open_way_is_force_closed() {
        let features = GeometryNormalizer::new()
            .normalize(vec![way(2, &[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)])]);
        match &features[0] {
            Feature::Polygon(p) => {
                let ring = &p.polygons[0][0];
                assert_eq!(ring.len(), 4);
                assert_eq!(ring.first(), ring.last());
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_unusable_vertices_do_not_count() {
        let features = GeometryNormalizer::new().normalize(vec![way(
            3,
            &[(0.0, 0.0), (f64::NAN, 1.0), (95.0, 1.0), (1.0, 1.0)],
        )]);
        assert!(features.is_empty());
    }

    #[test]
    fn test_order_preserved_and_duplicate_ids_across_kinds() {
        let records = vec![
            point(42, 31.90, 36.58),
            way(42, &[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]),
            point(43, 31.91, 36.59),
        ];
        let features = GeometryNormalizer::new().normalize(records.clone());

        assert_eq!(features.len(), records.len());
        for (feature, record) in features.iter().zip(&records) {
            assert_eq!(feature.key().id, record.id());
        }
        assert_eq!(features[0].key(), FeatureKey::node(42));
        assert_eq!(features[1].key(), FeatureKey::way(42));
        assert_eq!(features[0].kind_name(), "point");
        assert_eq!(features[1].kind_name(), "polygon");
        assert_eq!(features[2].kind_name(), "point");
    }

    #[test]
    fn test_replay_is_deterministic() {
        let records = vec![
            point(1, 31.90, 36.58),
            way(2, &[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]),
            way(3, &[(0.0, 0.0), (1.0, 1.0)]),
        ];
        let normalizer = GeometryNormalizer::new();
        let first = normalizer.normalize(records.clone());
        let second = normalizer.normalize(records);
        assert_eq!(first, second);
    }

    #[test]
    fn test_relation_attaches_holes_to_containing_outer() {
        let relation = RawRecord::Relation {
            id: 77,
            members: vec![
                RelationMember {
                    role: MemberRole::Outer,
                    vertices: square(0.0, 0.0, 10.0),
                },
                RelationMember {
                    role: MemberRole::Outer,
                    vertices: square(20.0, 20.0, 5.0),
                },
                RelationMember {
                    role: MemberRole::Inner,
                    vertices: square(21.0, 21.0, 1.0),
                },
                RelationMember {
                    role: MemberRole::Inner,
                    vertices: square(2.0, 2.0, 1.0),
                },
                // Outside both outers
                RelationMember {
                    role: MemberRole::Inner,
                    vertices: square(50.0, 50.0, 1.0),
                },
            ],
            tags: tags(&[("type", "multipolygon"), ("landuse", "residential")]),
        };

        let features = GeometryNormalizer::new().normalize(vec![relation]);
        assert_eq!(features.len(), 1);
        let Feature::Polygon(p) = &features[0] else {
            panic!("expected polygon");
        };
        assert_eq!(features[0].key(), FeatureKey::relation(77));
        // Two parts, each `[outer, hole]`
        assert_eq!(p.polygons.len(), 2);
        assert_eq!(p.polygons[0].len(), 2);
        assert_eq!(p.polygons[1].len(), 2);
        assert_eq!(p.polygons[0][1][0], LatLon::new(2.0, 2.0));
        assert_eq!(p.polygons[1][1][0], LatLon::new(21.0, 21.0));
        assert_eq!(p.tags.get("landuse").map(String::as_str), Some("residential"));
    }

    #[test]
    fn test_way_and_relation_with_same_id_stay_distinct() {
        let relation = RawRecord::Relation {
            id: 77,
            members: vec![
                RelationMember {
                    role: MemberRole::Outer,
                    vertices: square(0.0, 0.0, 1.0),
                },
                RelationMember {
                    role: MemberRole::Outer,
                    vertices: square(5.0, 5.0, 1.0),
                },
            ],
            tags: tags(&[("type", "multipolygon")]),
        };
        let records = vec![way(77, &[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]), relation];

        let features = GeometryNormalizer::new().normalize(records);
        let keys: Vec<FeatureKey> = features.iter().map(Feature::key).collect();
        assert_eq!(keys, vec![FeatureKey::way(77), FeatureKey::relation(77)]);
    }

    #[test]
    fn test_relation_without_outer_is_dropped() {
        let relation = RawRecord::Relation {
            id: 5,
            members: vec![
                RelationMember {
                    role: MemberRole::Inner,
                    vertices: square(0.0, 0.0, 1.0),
                },
                RelationMember {
                    role: MemberRole::Outer,
                    vertices: vec![LatLon::new(0.0, 0.0), LatLon::new(1.0, 1.0)],
                },
            ],
            tags: Tags::new(),
        };
        assert!(GeometryNormalizer::new().normalize(vec![relation]).is_empty());
    }

    #[test]
    fn test_ring_contains() {
        let ring = square(0.0, 0.0, 10.0);
        assert!(ring_contains(&ring, LatLon::new(5.0, 5.0)));
        assert!(!ring_contains(&ring, LatLon::new(15.0, 5.0)));
        assert!(!ring_contains(&ring, LatLon::new(5.0, -1.0)));
    }
}
