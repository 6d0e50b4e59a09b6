//! Per-feature hover state machine
//!
//! Every feature is either `Idle` or `Hovered`. Only hovered features are
//! stored; an absent entry means idle.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::style::StyleVariant;
use crate::geo::FeatureKey;

/// Identifies a feature across layers (feature keys are only unique per layer)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureRef {
    pub layer: String,
    pub feature: FeatureKey,
}

impl FeatureRef {
    pub fn new(layer: impl Into<String>, feature: FeatureKey) -> Self {
        Self {
            layer: layer.into(),
            feature,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HoverState {
    Idle,
    Hovered,
}

impl HoverState {
    pub fn variant(self) -> StyleVariant {
        match self {
            HoverState::Idle => StyleVariant::Default,
            HoverState::Hovered => StyleVariant::Highlighted,
        }
    }
}

/// Pointer events forwarded by the view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    Enter,
    Leave,
}

/// Result of feeding one event to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The feature moved into the given state
    Changed(HoverState),
    /// The event was a no-op in the current state
    Unchanged(HoverState),
}

impl Transition {
    pub fn state(self) -> HoverState {
        match self {
            Transition::Changed(state) | Transition::Unchanged(state) => state,
        }
    }

    pub fn is_changed(self) -> bool {
        matches!(self, Transition::Changed(_))
    }
}

#[derive(Debug, Default)]
pub struct InteractionStateMachine {
    hovered: BTreeSet<FeatureRef>,
}

impl InteractionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, feature: &FeatureRef) -> HoverState {
        if self.hovered.contains(feature) {
            HoverState::Hovered
        } else {
            HoverState::Idle
        }
    }

    pub fn variant(&self, feature: &FeatureRef) -> StyleVariant {
        self.state(feature).variant()
    }

    pub fn apply(&mut self, feature: FeatureRef, event: PointerEvent) -> Transition {
        match (self.state(&feature), event) {
            (HoverState::Idle, PointerEvent::Enter) => {
                self.hovered.insert(feature);
                Transition::Changed(HoverState::Hovered)
            }
            (HoverState::Hovered, PointerEvent::Leave) => {
                self.hovered.remove(&feature);
                Transition::Changed(HoverState::Idle)
            }
            (state, _) => Transition::Unchanged(state),
        }
    }

    pub fn pointer_enter(&mut self, feature: FeatureRef) -> Transition {
        self.apply(feature, PointerEvent::Enter)
    }

    pub fn pointer_leave(&mut self, feature: FeatureRef) -> Transition {
        self.apply(feature, PointerEvent::Leave)
    }

    /// Hovered features in stable order
    pub fn hovered(&self) -> impl Iterator<Item = &FeatureRef> {
        self.hovered.iter()
    }

    /// Drop hover entries of `layer` whose feature is not kept by `keep`
    ///
    /// Returns the number of entries removed.
    pub fn retain_layer(
        &mut self,
        layer: &str,
        mut keep: impl FnMut(FeatureKey) -> bool,
    ) -> usize {
        let before = self.hovered.len();
        self.hovered
            .retain(|f| f.layer != layer || keep(f.feature));
        before - self.hovered.len()
    }
}
