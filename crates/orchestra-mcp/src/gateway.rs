//! The gateway server
//!
//! Spawns and initializes every configured backend, then serves MCP over
//! its own stdio: line-delimited JSON-RPC requests in on stdin, responses
//! out on stdout. Listings are rebuilt from the live backends on every
//! request; the gateway keeps no listing caches.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use orchestra_config::types::{BackendConfig, GatewaySettings};
use orchestra_redact::RedactionStage;
use orchestra_types::errors::{GatewayError, GatewayResult};

use crate::aggregate;
use crate::protocol::{InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::registry::SessionRegistry;
use crate::route;
use crate::session::BackendSession;
use crate::transport::StdioTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatewayState {
    Ready,
    ShuttingDown,
}

pub struct McpGateway {
    registry: SessionRegistry,
    init_results: Vec<(String, InitializeResult)>,
    redactor: Option<Arc<dyn RedactionStage>>,
    settings: GatewaySettings,
    state: GatewayState,
}

impl McpGateway {
    /// Spawn and initialize every configured backend
    ///
    /// Startup is all-or-nothing: if any backend fails to spawn or
    /// complete its handshake, every backend started so far is shut down
    /// and the error propagates.
    pub async fn start(
        settings: GatewaySettings,
        backends: &[BackendConfig],
        redactor: Option<Arc<dyn RedactionStage>>,
    ) -> GatewayResult<Self> {
        let timeout = Duration::from_secs(settings.request_timeout_seconds);
        let mut registry = SessionRegistry::new();
        let mut init_results = Vec::new();

        for config in backends {
            tracing::info!(backend_id = %config.id, command = %config.command, "starting backend");
            match Self::connect_backend(config, &settings, timeout).await {
                Ok((session, init)) => {
                    init_results.push((config.id.clone(), init));
                    if let Err(error) = registry.register(session) {
                        registry.shutdown_all().await;
                        return Err(error);
                    }
                }
                Err(error) => {
                    tracing::error!(backend_id = %config.id, %error, "backend failed to start");
                    registry.shutdown_all().await;
                    return Err(error);
                }
            }
        }

        tracing::info!(backends = registry.len(), "all backends initialized");

        Ok(Self {
            registry,
            init_results,
            redactor,
            settings,
            state: GatewayState::Ready,
        })
    }

    async fn connect_backend(
        config: &BackendConfig,
        settings: &GatewaySettings,
        timeout: Duration,
    ) -> GatewayResult<(Arc<BackendSession>, InitializeResult)> {
        let (program, args) = config.parse_command()?;

        let transport = StdioTransport::spawn(&program, &args, &config.env).map_err(|error| {
            GatewayError::BackendUnreachable {
                backend_id: config.id.clone(),
                reason: format!("failed to spawn '{}': {}", config.command, error),
            }
        })?;

        let session = Arc::new(BackendSession::new(&config.id, Arc::new(transport)));

        let init = tokio::time::timeout(
            timeout,
            session.initialize(&settings.name, &settings.version),
        )
        .await
        .map_err(|_| GatewayError::BackendUnreachable {
            backend_id: config.id.clone(),
            reason: format!("initialize timed out after {:?}", timeout),
        })?
        .map_err(|error| GatewayError::BackendUnreachable {
            backend_id: config.id.clone(),
            reason: format!("initialize failed: {}", error),
        })?;

        tracing::info!(
            backend_id = %config.id,
            server = %init.server_info.name,
            version = %init.server_info.version,
            "backend initialized"
        );

        Ok((session, init))
    }

    /// Serve requests over stdio until EOF or a shutdown signal
    pub async fn run(mut self) -> GatewayResult<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();

        tracing::info!(name = %self.settings.name, "gateway serving on stdio");

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, shutting down");
                    break;
                }
            };

            let Some(line) = line else {
                tracing::info!("stdin closed, shutting down");
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) if request.is_notification() => {
                    tracing::debug!(method = %request.method, "acknowledged notification");
                    continue;
                }
                Ok(request) => self.handle_request(request).await,
                Err(error) => JsonRpcResponse::error(
                    Value::Null,
                    JsonRpcError::parse_error(format!("invalid JSON-RPC: {}", error)),
                ),
            };

            let encoded = serde_json::to_string(&response)?;
            stdout.write_all(encoded.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        self.shutdown().await
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);
        let timeout = Duration::from_secs(self.settings.request_timeout_seconds);
        let params = request.params.unwrap_or(Value::Null);

        tracing::debug!(method = %request.method, "handling request");

        match request.method.as_str() {
            "initialize" => {
                let merged = aggregate::merge_initialize(
                    &self.init_results,
                    &self.settings.name,
                    &self.settings.version,
                );
                match serde_json::to_value(&merged) {
                    Ok(result) => JsonRpcResponse::success(id, result),
                    Err(error) => JsonRpcResponse::error(
                        id,
                        JsonRpcError::internal(error.to_string()),
                    ),
                }
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => {
                let (tools, failures) = aggregate::list_tools(&self.registry, timeout).await;
                JsonRpcResponse::success(id, listing_result("tools", &tools, &failures))
            }
            "prompts/list" => {
                let (prompts, failures) = aggregate::list_prompts(&self.registry, timeout).await;
                JsonRpcResponse::success(id, listing_result("prompts", &prompts, &failures))
            }
            "resources/list" => {
                let (resources, failures) =
                    aggregate::list_resources(&self.registry, timeout).await;
                JsonRpcResponse::success(id, listing_result("resources", &resources, &failures))
            }
            "tools/call" => {
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params("missing required parameter 'name'"),
                    );
                };
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

                let outcome = route::call_tool(
                    &self.registry,
                    self.redactor.as_deref(),
                    name,
                    arguments,
                    timeout,
                )
                .await;
                respond(id, outcome)
            }
            "prompts/get" => {
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params("missing required parameter 'name'"),
                    );
                };
                let arguments = params.get("arguments").cloned();

                let outcome = route::get_prompt(&self.registry, name, arguments, timeout).await;
                respond(id, outcome)
            }
            "resources/read" => {
                let Some(uri) = params.get("uri").and_then(Value::as_str) else {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params("missing required parameter 'uri'"),
                    );
                };

                let outcome = route::read_resource(&self.registry, uri, timeout).await;
                respond(id, outcome)
            }
            method => JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)),
        }
    }

    /// Close every backend in reverse registration order and report the
    /// aggregate outcome
    pub async fn shutdown(&mut self) -> GatewayResult<()> {
        if self.state == GatewayState::ShuttingDown {
            return Ok(());
        }
        self.state = GatewayState::ShuttingDown;

        tracing::info!(backends = self.registry.len(), "shutting down backends");
        let failures = self.registry.shutdown_all().await;

        if failures.is_empty() {
            tracing::info!("all backends shut down cleanly");
            Ok(())
        } else {
            let summary = failures
                .iter()
                .map(|failure| format!("{}: {}", failure.backend_id, failure.error))
                .collect::<Vec<_>>()
                .join("; ");
            Err(GatewayError::Transport(format!(
                "{} backend(s) failed to shut down: {}",
                failures.len(),
                summary
            )))
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        registry: SessionRegistry,
        init_results: Vec<(String, InitializeResult)>,
        redactor: Option<Arc<dyn RedactionStage>>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            registry,
            init_results,
            redactor,
            settings,
            state: GatewayState::Ready,
        }
    }

    #[cfg(test)]
    pub(crate) async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        self.handle_request(request).await
    }
}

/// Build a listing result, attaching `_meta` when some backends failed
fn listing_result<T: serde::Serialize>(
    key: &str,
    items: &[T],
    failures: &[aggregate::BackendFailure],
) -> Value {
    let mut result = json!({ key: items });
    if !failures.is_empty() {
        result["_meta"] = json!({
            "partial_failure": true,
            "failures": failures,
        });
    }
    result
}

fn respond<T: serde::Serialize>(id: Value, outcome: GatewayResult<T>) -> JsonRpcResponse {
    match outcome {
        Ok(value) => match serde_json::to_value(&value) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, JsonRpcError::internal(error.to_string())),
        },
        Err(error) => JsonRpcResponse::error(id, error_to_rpc(&error)),
    }
}

fn error_to_rpc(error: &GatewayError) -> JsonRpcError {
    match error {
        GatewayError::MalformedIdentifier(_) | GatewayError::UnknownBackend(_) => {
            JsonRpcError::invalid_params(error.to_string())
        }
        GatewayError::Timeout { .. } | GatewayError::BackendInvocation { .. } => {
            JsonRpcError::custom(-32000, error.to_string(), None)
        }
        _ => JsonRpcError::internal(error.to_string()),
    }
}
