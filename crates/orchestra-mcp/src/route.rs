//! Call routing
//!
//! Decodes a composite identifier, finds the owning session, and forwards
//! the operation with a timeout bound. Exactly one attempt per call; a
//! timed-out or failed invocation surfaces as an error, never a retry.

use std::time::Duration;

use serde_json::Value;

use orchestra_redact::RedactionStage;
use orchestra_types::errors::{GatewayError, GatewayResult};
use orchestra_types::mcp_types::{
    CallToolResult, ContentSegment, GetPromptResult, ReadResourceResult,
};

use crate::namespace::parse_namespace;
use crate::registry::SessionRegistry;

/// Route a tool call to its backend and redact text content in the result
pub async fn call_tool(
    registry: &SessionRegistry,
    redactor: Option<&dyn RedactionStage>,
    composite_name: &str,
    arguments: Value,
    timeout: Duration,
) -> GatewayResult<CallToolResult> {
    let (backend_id, local_name) = parse_namespace(composite_name)?;
    let session = registry.lookup(&backend_id)?;

    let mut result = match tokio::time::timeout(timeout, session.call_tool(&local_name, arguments))
        .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(GatewayError::Timeout {
                backend_id,
                name: local_name,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
    };

    if let Some(redactor) = redactor {
        apply_redaction(redactor, &mut result.content);
    }

    Ok(result)
}

/// Route a prompt fetch to its backend
pub async fn get_prompt(
    registry: &SessionRegistry,
    composite_name: &str,
    arguments: Option<Value>,
    timeout: Duration,
) -> GatewayResult<GetPromptResult> {
    let (backend_id, local_name) = parse_namespace(composite_name)?;
    let session = registry.lookup(&backend_id)?;

    match tokio::time::timeout(timeout, session.get_prompt(&local_name, arguments)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            backend_id,
            name: local_name,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Route a resource read to its backend
pub async fn read_resource(
    registry: &SessionRegistry,
    composite_uri: &str,
    timeout: Duration,
) -> GatewayResult<ReadResourceResult> {
    let (backend_id, local_uri) = parse_namespace(composite_uri)?;
    let session = registry.lookup(&backend_id)?;

    match tokio::time::timeout(timeout, session.read_resource(&local_uri)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            backend_id,
            name: local_uri,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Rewrite text segments through the redactor, leaving other content alone
///
/// A redaction failure is logged and the original text kept; it never fails
/// the call.
fn apply_redaction(redactor: &dyn RedactionStage, content: &mut [ContentSegment]) {
    for segment in content.iter_mut() {
        if let ContentSegment::Text { text } = segment {
            match redactor.redact(text) {
                Ok(redacted) => *text = redacted,
                Err(error) => {
                    tracing::warn!(%error, "redaction failed, passing content through unmodified");
                }
            }
        }
    }
}
