//! WebSocket transport: upgrade, per-connection actor and inbound frames.

pub mod actor;
pub mod handler;
pub mod protocol;
