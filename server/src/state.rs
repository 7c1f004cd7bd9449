use crate::chat::ChatGateway;
use crate::config::WsConfig;
use crate::hub::Hub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry and fan-out
    pub hub: Hub,
    /// Authorization + persistence in front of the hub
    pub gateway: ChatGateway,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Bound on each connection's outbound queue
    pub outbound_capacity: usize,
    pub ws: WsConfig,
}
