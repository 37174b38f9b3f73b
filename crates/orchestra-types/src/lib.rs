//! Shared types and error types for the Orchestra gateway

pub mod errors;
pub mod mcp_types;

pub use errors::{GatewayError, GatewayResult};
pub use mcp_types::{
    CallToolResult, ContentSegment, GetPromptResult, McpPrompt, McpResource, McpTool,
    PromptArgument, PromptMessage, ReadResourceResult, ResourceContents,
};

/// Namespace separator between a backend id and a backend-local name.
///
/// Backend ids must not contain this sequence; local names may (decoding
/// splits on the first occurrence only). Triple underscore matches the
/// upstream convention for aggregated server names.
pub const NAMESPACE_SEPARATOR: &str = "___";
