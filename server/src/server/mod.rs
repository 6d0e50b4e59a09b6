pub mod routes;
pub mod websocket;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::OverlayEngine;

pub use routes::{ApiErrorResponse, app_routes};
pub use websocket::{WsConfig, ws_handler};

/// Liveness of a single view client
pub struct Connection {
    /// Last time any frame arrived from the client
    pub last_seen: Instant,
}

/// Global connection registry
pub type ConnectionRegistry = Arc<RwLock<HashMap<Uuid, Connection>>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OverlayEngine>,
    pub connections: ConnectionRegistry,
    pub ws_config: Arc<WsConfig>,
}

impl AppState {
    pub fn new(engine: Arc<OverlayEngine>) -> Self {
        Self {
            engine,
            connections: Arc::new(RwLock::new(HashMap::new())),
            ws_config: Arc::new(WsConfig::default()),
        }
    }

    /// Replace the keepalive and size limits applied to new connections
    pub fn with_ws_config(mut self, ws_config: WsConfig) -> Self {
        self.ws_config = Arc::new(ws_config);
        self
    }

    /// Number of open view connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}
