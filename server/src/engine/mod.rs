pub mod manager;
pub mod state;

pub use manager::{EngineError, OverlayEngine};
pub use state::{EventOutcome, HoverOverride, MapView, SourceFailure, Tooltip};
