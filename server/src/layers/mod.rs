//! Layer state module
//!
//! Holds the layer registry, style policies, per-feature hover state and
//! the user annotation store.

pub mod annotations;
pub mod hover;
pub mod registry;
pub mod style;
pub mod types;

pub use annotations::{Annotation, AnnotationError, AnnotationStore};
pub use hover::{FeatureRef, HoverState, InteractionStateMachine, PointerEvent, Transition};
pub use registry::{LayerRegistry, LayerSnapshot};
pub use style::{Style, StylePolicy, StyleSet, StyleVariant};
pub use types::{ANNOTATION_LAYER, Layer, LayerError, LayerKind};
