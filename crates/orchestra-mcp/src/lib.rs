//! MCP aggregating gateway core
//!
//! One upstream MCP endpoint fanning out to N spawned backend servers:
//! capability listings are merged under `<backend>___<name>` composite
//! identifiers and calls are routed back to the owning backend.

pub mod aggregate;
pub mod gateway;
pub mod namespace;
pub mod protocol;
pub mod registry;
pub mod route;
pub mod session;
pub mod transport;

#[cfg(test)]
mod tests;

pub use gateway::McpGateway;
pub use session::BackendSession;
pub use transport::BackendConnection;
