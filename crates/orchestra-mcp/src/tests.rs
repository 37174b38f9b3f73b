use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use orchestra_config::types::{EditMode, GatewaySettings, PiiEntity, RedactionConfig};
use orchestra_redact::{PiiRedactor, RedactionStage};
use orchestra_types::errors::{GatewayError, GatewayResult};
use orchestra_types::mcp_types::ContentSegment;

use crate::aggregate;
use crate::gateway::McpGateway;
use crate::protocol::{
    InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ServerCapabilities,
    ServerInfo, ToolsCapability,
};
use crate::registry::SessionRegistry;
use crate::route;
use crate::session::BackendSession;
use crate::transport::BackendConnection;

type CloseLog = Arc<Mutex<Vec<String>>>;

/// Scripted in-process backend
#[derive(Default)]
struct MockConnection {
    /// method -> result payload
    responses: HashMap<String, Value>,
    /// methods that answer with a JSON-RPC error
    fail_methods: HashSet<String>,
    /// methods that never answer
    hang_methods: HashSet<String>,
    /// every method sent as a request
    calls: Arc<Mutex<Vec<String>>>,
    fail_close: bool,
    close_log: Option<(CloseLog, String)>,
}

impl MockConnection {
    fn new() -> Self {
        Self::default()
    }

    fn respond(mut self, method: &str, result: Value) -> Self {
        self.responses.insert(method.to_string(), result);
        self
    }

    fn failing(mut self, method: &str) -> Self {
        self.fail_methods.insert(method.to_string());
        self
    }

    fn hanging(mut self, method: &str) -> Self {
        self.hang_methods.insert(method.to_string());
        self
    }

    fn with_close_log(mut self, log: CloseLog, id: &str) -> Self {
        self.close_log = Some((log, id.to_string()));
        self
    }

    fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[async_trait]
impl BackendConnection for MockConnection {
    async fn send_request(&self, request: JsonRpcRequest) -> GatewayResult<JsonRpcResponse> {
        self.calls.lock().push(request.method.clone());
        let id = request.id.unwrap_or(Value::Null);

        if self.hang_methods.contains(&request.method) {
            std::future::pending::<()>().await;
            unreachable!();
        }

        if self.fail_methods.contains(&request.method) {
            return Ok(JsonRpcResponse::error(
                id,
                crate::protocol::JsonRpcError::internal("scripted failure"),
            ));
        }

        let result = self
            .responses
            .get(&request.method)
            .cloned()
            .unwrap_or(json!({}));
        Ok(JsonRpcResponse::success(id, result))
    }

    async fn send_notification(&self, _notification: JsonRpcNotification) -> GatewayResult<()> {
        Ok(())
    }

    async fn close(&self) -> GatewayResult<()> {
        if let Some((log, id)) = &self.close_log {
            log.lock().push(id.clone());
        }
        if self.fail_close {
            return Err(GatewayError::Transport("scripted close failure".to_string()));
        }
        Ok(())
    }
}

fn session(id: &str, connection: MockConnection) -> Arc<BackendSession> {
    Arc::new(BackendSession::new(id, Arc::new(connection)))
}

fn tools_payload(names: &[&str]) -> Value {
    let tools: Vec<Value> = names
        .iter()
        .map(|name| json!({ "name": name, "inputSchema": {"type": "object"} }))
        .collect();
    json!({ "tools": tools })
}

fn timeout() -> Duration {
    Duration::from_millis(200)
}

#[tokio::test]
async fn test_listing_merges_in_registration_order() {
    let mut registry = SessionRegistry::new();
    registry
        .register(session("alpha", MockConnection::new().respond("tools/list", tools_payload(&["t1", "t2"]))))
        .unwrap();
    registry
        .register(session("beta", MockConnection::new().respond("tools/list", tools_payload(&["t1"]))))
        .unwrap();

    let (tools, failures) = aggregate::list_tools(&registry, timeout()).await;

    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["alpha___t1", "alpha___t2", "beta___t1"]);
    assert!(failures.is_empty());
}

#[tokio::test]
async fn test_listing_survives_one_broken_backend() {
    let mut registry = SessionRegistry::new();
    registry
        .register(session("alpha", MockConnection::new().respond("tools/list", tools_payload(&["t1", "t2"]))))
        .unwrap();
    registry
        .register(session("beta", MockConnection::new().failing("tools/list")))
        .unwrap();

    let (tools, failures) = aggregate::list_tools(&registry, timeout()).await;

    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["alpha___t1", "alpha___t2"]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].backend_id, "beta");
}

#[tokio::test]
async fn test_resource_listing_prefixes_uri_and_name() {
    let mut registry = SessionRegistry::new();
    registry
        .register(session(
            "files",
            MockConnection::new().respond(
                "resources/list",
                json!({ "resources": [{ "uri": "file:///tmp/a.txt", "name": "a.txt" }] }),
            ),
        ))
        .unwrap();

    let (resources, failures) = aggregate::list_resources(&registry, timeout()).await;

    assert!(failures.is_empty());
    assert_eq!(resources[0].uri, "files___file:///tmp/a.txt");
    assert_eq!(resources[0].name, "files___a.txt");
}

#[tokio::test]
async fn test_call_routes_to_owning_backend() {
    let mut registry = SessionRegistry::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut connection = MockConnection::new().respond(
        "tools/call",
        json!({ "content": [{ "type": "text", "text": "done" }] }),
    );
    connection.calls = Arc::clone(&calls);
    registry.register(session("alpha", connection)).unwrap();

    let result = route::call_tool(&registry, None, "alpha___do_it", json!({}), timeout())
        .await
        .unwrap();

    assert_eq!(calls.lock().as_slice(), ["tools/call"]);
    assert!(matches!(&result.content[0], ContentSegment::Text { text } if text == "done"));
}

#[tokio::test]
async fn test_call_unknown_backend() {
    let mut registry = SessionRegistry::new();
    registry.register(session("alpha", MockConnection::new())).unwrap();

    let result = route::call_tool(&registry, None, "zulu___t1", json!({}), timeout()).await;

    assert!(matches!(result, Err(GatewayError::UnknownBackend(id)) if id == "zulu"));
}

#[tokio::test]
async fn test_call_malformed_identifier() {
    let registry = SessionRegistry::new();

    let result = route::call_tool(&registry, None, "no_separator", json!({}), timeout()).await;

    assert!(matches!(result, Err(GatewayError::MalformedIdentifier(_))));
}

#[tokio::test]
async fn test_call_times_out_after_single_attempt() {
    let mut registry = SessionRegistry::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut connection = MockConnection::new().hanging("tools/call");
    connection.calls = Arc::clone(&calls);
    registry.register(session("slow", connection)).unwrap();

    let result = route::call_tool(
        &registry,
        None,
        "slow___t1",
        json!({}),
        Duration::from_millis(50),
    )
    .await;

    assert!(matches!(result, Err(GatewayError::Timeout { ref backend_id, .. }) if backend_id == "slow"));
    // no retry after the deadline
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test]
async fn test_shutdown_reverse_order_continues_past_failures() {
    let order: CloseLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SessionRegistry::new();
    registry
        .register(session("a", MockConnection::new().with_close_log(Arc::clone(&order), "a")))
        .unwrap();
    registry
        .register(session(
            "b",
            MockConnection::new().with_close_log(Arc::clone(&order), "b").failing_close(),
        ))
        .unwrap();
    registry
        .register(session("c", MockConnection::new().with_close_log(Arc::clone(&order), "c")))
        .unwrap();

    let failures = registry.shutdown_all().await;

    assert_eq!(order.lock().as_slice(), ["c", "b", "a"]);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].backend_id, "b");
}

#[test]
fn test_registry_rejects_duplicates_and_bad_ids() {
    let mut registry = SessionRegistry::new();
    registry.register(session("alpha", MockConnection::new())).unwrap();

    let duplicate = registry.register(session("alpha", MockConnection::new()));
    assert!(matches!(duplicate, Err(GatewayError::DuplicateBackend(_))));

    let with_separator = registry.register(session("bad___id", MockConnection::new()));
    assert!(matches!(with_separator, Err(GatewayError::Config(_))));

    assert!(registry.lookup("alpha").is_ok());
    assert!(matches!(registry.lookup("missing"), Err(GatewayError::UnknownBackend(_))));
}

#[tokio::test]
async fn test_redaction_rewrites_text_segments_only() {
    let redactor = PiiRedactor::from_config(&RedactionConfig {
        entities: vec![PiiEntity::EmailAddress],
        edit_mode: EditMode::Replace,
    })
    .unwrap();

    let mut registry = SessionRegistry::new();
    registry
        .register(session(
            "alpha",
            MockConnection::new().respond(
                "tools/call",
                json!({
                    "content": [
                        { "type": "text", "text": "contact bob@example.com" },
                        { "type": "image", "data": "aGk=", "mimeType": "image/png" },
                    ]
                }),
            ),
        ))
        .unwrap();

    let result = route::call_tool(&registry, Some(&redactor), "alpha___t1", json!({}), timeout())
        .await
        .unwrap();

    assert!(matches!(
        &result.content[0],
        ContentSegment::Text { text } if text == "contact <EMAIL_ADDRESS>"
    ));
    assert!(matches!(&result.content[1], ContentSegment::Image { .. }));
}

struct BrokenRedactor;

impl RedactionStage for BrokenRedactor {
    fn redact(&self, _text: &str) -> GatewayResult<String> {
        Err(GatewayError::Redaction("scripted redaction failure".to_string()))
    }
}

#[tokio::test]
async fn test_redaction_failure_keeps_original_text() {
    let mut registry = SessionRegistry::new();
    registry
        .register(session(
            "alpha",
            MockConnection::new().respond(
                "tools/call",
                json!({ "content": [{ "type": "text", "text": "raw payload" }] }),
            ),
        ))
        .unwrap();

    let result = route::call_tool(
        &registry,
        Some(&BrokenRedactor),
        "alpha___t1",
        json!({}),
        timeout(),
    )
    .await
    .unwrap();

    assert!(matches!(&result.content[0], ContentSegment::Text { text } if text == "raw payload"));
}

fn init_result(name: &str, with_tools: bool) -> InitializeResult {
    InitializeResult {
        protocol_version: "2024-11-05".to_string(),
        capabilities: ServerCapabilities {
            tools: with_tools.then(|| ToolsCapability { list_changed: Some(true) }),
            resources: None,
            prompts: None,
        },
        server_info: ServerInfo {
            name: name.to_string(),
            version: "1.0.0".to_string(),
        },
        instructions: None,
    }
}

#[test]
fn test_merge_initialize_unions_capabilities() {
    let merged = aggregate::merge_initialize(
        &[
            ("alpha".to_string(), init_result("alpha-server", true)),
            ("beta".to_string(), init_result("beta-server", false)),
        ],
        "orchestra-gateway",
        "0.1.0",
    );

    assert_eq!(merged.server_info.name, "orchestra-gateway");
    assert!(merged.capabilities.tools.is_some());
    assert!(merged.capabilities.resources.is_none());
    assert!(merged.instructions.unwrap_or_default().contains("alpha"));
}

fn test_gateway(registry: SessionRegistry) -> McpGateway {
    McpGateway::from_parts(
        registry,
        vec![("alpha".to_string(), init_result("alpha-server", true))],
        None,
        GatewaySettings::default(),
    )
}

#[tokio::test]
async fn test_dispatch_tools_list() {
    let mut registry = SessionRegistry::new();
    registry
        .register(session("alpha", MockConnection::new().respond("tools/list", tools_payload(&["t1"]))))
        .unwrap();
    let gateway = test_gateway(registry);

    let response = gateway
        .dispatch(JsonRpcRequest::new(json!(1), "tools/list", None))
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["tools"][0]["name"], json!("alpha___t1"));
    assert!(result.get("_meta").is_none());
}

#[tokio::test]
async fn test_dispatch_reports_partial_failure_meta() {
    let mut registry = SessionRegistry::new();
    registry
        .register(session("alpha", MockConnection::new().failing("tools/list")))
        .unwrap();
    let gateway = test_gateway(registry);

    let response = gateway
        .dispatch(JsonRpcRequest::new(json!(2), "tools/list", None))
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["_meta"]["partial_failure"], json!(true));
    assert_eq!(result["_meta"]["failures"][0]["backend_id"], json!("alpha"));
}

#[tokio::test]
async fn test_dispatch_unknown_method() {
    let gateway = test_gateway(SessionRegistry::new());

    let response = gateway
        .dispatch(JsonRpcRequest::new(json!(3), "tools/subscribe", None))
        .await;

    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_dispatch_tools_call_requires_name() {
    let gateway = test_gateway(SessionRegistry::new());

    let response = gateway
        .dispatch(JsonRpcRequest::new(
            json!(4),
            "tools/call",
            Some(json!({ "arguments": {} })),
        ))
        .await;

    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_dispatch_ping() {
    let gateway = test_gateway(SessionRegistry::new());

    let response = gateway.dispatch(JsonRpcRequest::new(json!(5), "ping", None)).await;

    assert_eq!(response.result.unwrap(), json!({}));
}
