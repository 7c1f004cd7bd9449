pub mod events;
pub mod gateway;
pub mod routes;

pub use gateway::ChatGateway;
