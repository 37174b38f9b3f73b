//! A live session with one backend server
//!
//! Wraps a `BackendConnection` with the MCP request vocabulary: the
//! handshake and the typed list/call/get/read operations the gateway fans
//! out to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use orchestra_types::errors::{GatewayError, GatewayResult};
use orchestra_types::mcp_types::{
    CallToolResult, GetPromptResult, McpPrompt, McpResource, McpTool, ReadResourceResult,
};

use crate::protocol::{InitializeResult, JsonRpcNotification, JsonRpcRequest, PROTOCOL_VERSION};
use crate::transport::BackendConnection;

pub struct BackendSession {
    id: String,
    connection: Arc<dyn BackendConnection>,
    next_request_id: AtomicU64,
}

impl BackendSession {
    pub fn new(id: impl Into<String>, connection: Arc<dyn BackendConnection>) -> Self {
        Self {
            id: id.into(),
            connection,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Issue one request and unwrap the JSON-RPC envelope
    ///
    /// `context_name` is the capability being exercised, used only for
    /// error reporting.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        context_name: &str,
    ) -> GatewayResult<Value> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(json!(id), method, params);

        let response = self.connection.send_request(request).await?;

        if let Some(error) = response.error {
            return Err(GatewayError::BackendInvocation {
                backend_id: self.id.clone(),
                name: context_name.to_string(),
                message: format!("{} (code {})", error.message, error.code),
            });
        }

        response
            .result
            .ok_or_else(|| GatewayError::Transport("response missing result".to_string()))
    }

    /// Run the MCP handshake: `initialize` followed by the
    /// `notifications/initialized` acknowledgement
    pub async fn initialize(
        &self,
        client_name: &str,
        client_version: &str,
    ) -> GatewayResult<InitializeResult> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_name,
                "version": client_version,
            },
        });

        let result = self.request("initialize", Some(params), "initialize").await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        self.connection
            .send_notification(JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        Ok(init)
    }

    pub async fn list_tools(&self) -> GatewayResult<Vec<McpTool>> {
        let result = self.request("tools/list", None, "tools/list").await?;
        let tools = result
            .get("tools")
            .cloned()
            .ok_or_else(|| GatewayError::Transport("tools/list result missing 'tools'".to_string()))?;
        Ok(serde_json::from_value(tools)?)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> GatewayResult<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params), name).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_prompts(&self) -> GatewayResult<Vec<McpPrompt>> {
        let result = self.request("prompts/list", None, "prompts/list").await?;
        let prompts = result.get("prompts").cloned().ok_or_else(|| {
            GatewayError::Transport("prompts/list result missing 'prompts'".to_string())
        })?;
        Ok(serde_json::from_value(prompts)?)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> GatewayResult<GetPromptResult> {
        let mut params = json!({ "name": name });
        if let Some(arguments) = arguments {
            params["arguments"] = arguments;
        }
        let result = self.request("prompts/get", Some(params), name).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_resources(&self) -> GatewayResult<Vec<McpResource>> {
        let result = self.request("resources/list", None, "resources/list").await?;
        let resources = result.get("resources").cloned().ok_or_else(|| {
            GatewayError::Transport("resources/list result missing 'resources'".to_string())
        })?;
        Ok(serde_json::from_value(resources)?)
    }

    pub async fn read_resource(&self, uri: &str) -> GatewayResult<ReadResourceResult> {
        let params = json!({ "uri": uri });
        let result = self.request("resources/read", Some(params), uri).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn close(&self) -> GatewayResult<()> {
        self.connection.close().await
    }
}
