//! Campmap Server Library
//!
//! This module exports the overlay engine and server components for use in
//! integration tests and external tooling.

pub mod config;
pub mod engine;
pub mod geo;
pub mod layers;
pub mod protocol;
pub mod server;

// Re-export commonly used types
pub use engine::{EngineError, MapView, OverlayEngine};
pub use geo::{GeoQueryClient, OverpassClient};
pub use protocol::{ClientMessage, ServerMessage, ViewEvent};
pub use server::{AppState, app_routes};
