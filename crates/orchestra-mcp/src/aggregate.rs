//! Capability aggregation
//!
//! Fans a listing request out to every registered backend, prefixes each
//! result with its backend id, and concatenates in registration order.
//! A broken backend costs only its own entries: its failure is recorded
//! and the merged listing still goes out.

use std::time::Duration;

use serde::Serialize;

use orchestra_types::errors::GatewayResult;
use orchestra_types::mcp_types::{McpPrompt, McpResource, McpTool};

use crate::namespace::apply_namespace;
use crate::protocol::{
    InitializeResult, PromptsCapability, ResourcesCapability, ServerCapabilities, ServerInfo,
    ToolsCapability, PROTOCOL_VERSION,
};
use crate::registry::SessionRegistry;
use crate::session::BackendSession;

/// One backend that could not contribute to a listing
#[derive(Debug, Clone, Serialize)]
pub struct BackendFailure {
    pub backend_id: String,
    pub error: String,
}

async fn bounded<T>(
    session: &BackendSession,
    operation: &str,
    timeout: Duration,
    fut: impl std::future::Future<Output = GatewayResult<T>>,
) -> Result<T, BackendFailure> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => {
            tracing::warn!(backend_id = session.id(), operation, %error, "backend listing failed");
            Err(BackendFailure {
                backend_id: session.id().to_string(),
                error: error.to_string(),
            })
        }
        Err(_) => {
            tracing::warn!(backend_id = session.id(), operation, "backend listing timed out");
            Err(BackendFailure {
                backend_id: session.id().to_string(),
                error: format!("{} timed out after {:?}", operation, timeout),
            })
        }
    }
}

/// Collect every backend's tools under composite names
pub async fn list_tools(
    registry: &SessionRegistry,
    timeout: Duration,
) -> (Vec<McpTool>, Vec<BackendFailure>) {
    let mut tools = Vec::new();
    let mut failures = Vec::new();

    for session in registry.iter() {
        match bounded(session, "tools/list", timeout, session.list_tools()).await {
            Ok(backend_tools) => {
                for mut tool in backend_tools {
                    tool.name = apply_namespace(session.id(), &tool.name);
                    tools.push(tool);
                }
            }
            Err(failure) => failures.push(failure),
        }
    }

    (tools, failures)
}

/// Collect every backend's prompts under composite names
pub async fn list_prompts(
    registry: &SessionRegistry,
    timeout: Duration,
) -> (Vec<McpPrompt>, Vec<BackendFailure>) {
    let mut prompts = Vec::new();
    let mut failures = Vec::new();

    for session in registry.iter() {
        match bounded(session, "prompts/list", timeout, session.list_prompts()).await {
            Ok(backend_prompts) => {
                for mut prompt in backend_prompts {
                    prompt.name = apply_namespace(session.id(), &prompt.name);
                    prompts.push(prompt);
                }
            }
            Err(failure) => failures.push(failure),
        }
    }

    (prompts, failures)
}

/// Collect every backend's resources, prefixing both uri and display name
pub async fn list_resources(
    registry: &SessionRegistry,
    timeout: Duration,
) -> (Vec<McpResource>, Vec<BackendFailure>) {
    let mut resources = Vec::new();
    let mut failures = Vec::new();

    for session in registry.iter() {
        match bounded(session, "resources/list", timeout, session.list_resources()).await {
            Ok(backend_resources) => {
                for mut resource in backend_resources {
                    resource.uri = apply_namespace(session.id(), &resource.uri);
                    resource.name = apply_namespace(session.id(), &resource.name);
                    resources.push(resource);
                }
            }
            Err(failure) => failures.push(failure),
        }
    }

    (resources, failures)
}

/// Merge backend initialize results into the single result the gateway
/// advertises upstream
///
/// Capabilities are a union: the merged result advertises a capability
/// family if any backend does. The protocol version is the lowest one any
/// backend negotiated.
pub fn merge_initialize(
    init_results: &[(String, InitializeResult)],
    gateway_name: &str,
    gateway_version: &str,
) -> InitializeResult {
    let protocol_version = init_results
        .iter()
        .map(|(_, init)| init.protocol_version.as_str())
        .min()
        .unwrap_or(PROTOCOL_VERSION)
        .to_string();

    let mut capabilities = ServerCapabilities::default();
    for (_, init) in init_results {
        if init.capabilities.tools.is_some() && capabilities.tools.is_none() {
            capabilities.tools = Some(ToolsCapability { list_changed: Some(false) });
        }
        if init.capabilities.resources.is_some() && capabilities.resources.is_none() {
            capabilities.resources = Some(ResourcesCapability {
                list_changed: Some(false),
                subscribe: Some(false),
            });
        }
        if init.capabilities.prompts.is_some() && capabilities.prompts.is_none() {
            capabilities.prompts = Some(PromptsCapability { list_changed: Some(false) });
        }
    }

    let backends: Vec<&str> = init_results.iter().map(|(id, _)| id.as_str()).collect();

    InitializeResult {
        protocol_version,
        capabilities,
        server_info: ServerInfo {
            name: gateway_name.to_string(),
            version: gateway_version.to_string(),
        },
        instructions: Some(format!(
            "Aggregates {} backend server(s): {}. Capability names are prefixed \
             with their backend id as '<backend>___<name>'.",
            backends.len(),
            backends.join(", ")
        )),
    }
}
