//! Layer registry with copy-on-write snapshots
//!
//! The layer map is held behind an `Arc` and replaced wholesale on every
//! mutation, so a [`LayerSnapshot`] taken before a write keeps observing the
//! complete previous state and never a partially-applied layer.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::style::{StylePolicy, StyleSet};
use super::types::{Layer, LayerError, LayerKind};
use crate::geo::Feature;

type LayerMap = IndexMap<String, Arc<Layer>>;

/// Immutable, cheaply cloneable view of every layer at one revision
#[derive(Debug, Clone, Default)]
pub struct LayerSnapshot {
    rev: u64,
    layers: Arc<LayerMap>,
}

impl LayerSnapshot {
    /// Layers in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.values().map(|layer| layer.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&Layer> {
        self.layers.get(name).map(|layer| layer.as_ref())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Serialize for LayerSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Registry of named layers
pub struct LayerRegistry {
    current: RwLock<LayerSnapshot>,
    styles: StyleSet,
}

impl LayerRegistry {
    pub fn new(styles: StyleSet) -> Self {
        Self {
            current: RwLock::new(LayerSnapshot::default()),
            styles,
        }
    }

    /// Create an empty layer unless one with this name already exists
    ///
    /// `style` overrides the kind's default policy for a newly created layer.
    pub async fn ensure_layer(
        &self,
        name: &str,
        kind: LayerKind,
        style: Option<StylePolicy>,
    ) -> u64 {
        let mut current = self.current.write().await;
        if current.layers.contains_key(name) {
            return current.rev;
        }

        let style = style.unwrap_or_else(|| self.styles.for_kind(kind).clone());
        let mut layers = (*current.layers).clone();
        layers.insert(name.to_string(), Arc::new(Layer::new(name, kind, style)));
        commit(&mut current, layers)
    }

    /// Replace a layer's features wholesale
    ///
    /// An existing layer keeps its visibility and style; an unknown name is
    /// created visible with the kind's default style.
    ///
    /// `still_wanted` runs once the write lock is held. When it returns false
    /// nothing is written and `None` is returned, so a writer that lost its
    /// right to publish cannot slip in after the check.
    pub async fn upsert_layer(
        &self,
        name: &str,
        kind: LayerKind,
        features: Vec<Feature>,
        still_wanted: impl FnOnce() -> bool,
    ) -> Option<u64> {
        let count = features.len();
        let mut current = self.current.write().await;
        if !still_wanted() {
            debug!(layer = name, "Layer replacement withdrawn");
            return None;
        }
        let mut layers = (*current.layers).clone();

        let layer = match layers.get(name) {
            Some(existing) => {
                if existing.kind != kind {
                    warn!(
                        layer = name,
                        existing = ?existing.kind,
                        requested = ?kind,
                        "Layer kind mismatch on upsert, keeping existing kind"
                    );
                }
                Layer {
                    name: existing.name.clone(),
                    kind: existing.kind,
                    visible: existing.visible,
                    style: existing.style.clone(),
                    features,
                }
            }
            None => Layer {
                features,
                ..Layer::new(name, kind, self.styles.for_kind(kind).clone())
            },
        };
        layers.insert(name.to_string(), Arc::new(layer));

        let rev = commit(&mut current, layers);
        debug!(layer = name, features = count, rev, "Layer replaced");
        Some(rev)
    }

    /// Toggle display of a layer without touching its features
    pub async fn set_visible(&self, name: &str, visible: bool) -> Result<u64, LayerError> {
        let mut current = self.current.write().await;
        let mut layers = (*current.layers).clone();
        let layer = layers
            .get_mut(name)
            .ok_or_else(|| LayerError::NotFound(name.to_string()))?;
        Arc::make_mut(layer).visible = visible;

        let rev = commit(&mut current, layers);
        debug!(layer = name, visible, rev, "Layer visibility changed");
        Ok(rev)
    }

    /// Append one feature to the end of a layer
    pub async fn append_feature(&self, name: &str, feature: Feature) -> Result<u64, LayerError> {
        let mut current = self.current.write().await;
        let mut layers = (*current.layers).clone();
        let layer = layers
            .get_mut(name)
            .ok_or_else(|| LayerError::NotFound(name.to_string()))?;
        Arc::make_mut(layer).features.push(feature);

        Ok(commit(&mut current, layers))
    }

    /// Immutable copy of the current layer set
    pub async fn snapshot(&self) -> LayerSnapshot {
        self.current.read().await.clone()
    }
}

/// Publish a new layer map under the held write lock
fn commit(current: &mut LayerSnapshot, layers: LayerMap) -> u64 {
    current.rev += 1;
    current.layers = Arc::new(layers);
    current.rev
}
