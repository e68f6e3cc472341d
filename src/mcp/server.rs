//! The Model Context Protocol server handle
//!
//! Holds the tool and resource registries and dispatches decoded JSON-RPC
//! messages to them. The handle is cheap to clone; every clone shares the same
//! registries, so tools registered after the router is built are still served.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_mcp_sdk::schema::{
    CallToolRequest, CallToolRequestParams, CallToolResult, ContentBlock, Implementation,
    InitializeRequest, JsonrpcMessage, JsonrpcRequest, ListResourcesRequest, ListResourcesResult,
    ListToolsRequest, PingRequest, ReadResourceContent, ReadResourceRequest,
    ReadResourceRequestParams, ReadResourceResult, Resource, ServerCapabilities,
    ServerCapabilitiesResources, ServerCapabilitiesTools, TextContent, TextResourceContents, Tool,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::SchemaAdapter;
use crate::errors::AppError;
use crate::mcp::rpc::{
    app_error_to_json_rpc, is_json_rpc_error, json_rpc_error, json_rpc_result,
    json_rpc_typed_result, request_id_to_value, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
};

/// Newest first; `initialize` answers with the first entry unless the client
/// offers another supported version.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    /// Remaining protocol fields (`title`, `annotations`, ...) carried verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
            extra: Map::new(),
        }
    }

    /// Converts a tool produced by the SDK's `#[mcp_tool]` macro.
    pub fn from_tool(tool: &Tool) -> Result<Self, AppError> {
        serde_json::to_value(tool)
            .and_then(serde_json::from_value)
            .map_err(|err| AppError::internal(format!("invalid tool definition: {err}")))
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult, AppError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult, AppError>> + Send + 'static,
{
    async fn call(&self, arguments: Map<String, Value>) -> Result<CallToolResult, AppError> {
        (self)(arguments).await
    }
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Returns the resource body as text.
    async fn read(&self, uri: &str) -> Result<String, AppError>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, AppError>> + Send + 'static,
{
    async fn read(&self, uri: &str) -> Result<String, AppError> {
        (self)(uri.to_string()).await
    }
}

/// Builds a single-block text result for tool handlers.
pub fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::from(TextContent::new(text.into(), None, None))],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

struct RegisteredResource {
    resource: Resource,
    handler: Arc<dyn ResourceHandler>,
}

#[derive(Default)]
struct Registry {
    tools: Vec<RegisteredTool>,
    resources: Vec<RegisteredResource>,
}

struct ServerInner {
    name: String,
    version: String,
    schema_adapter: Option<SchemaAdapter>,
    registry: RwLock<Registry>,
}

#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl McpServer {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        schema_adapter: Option<SchemaAdapter>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                name: name.into(),
                version: version.into(),
                schema_adapter,
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// Registers a tool, replacing any earlier tool with the same name.
    pub fn tool(&self, mut definition: ToolDefinition, handler: impl ToolHandler + 'static) -> &Self {
        if let Some(adapter) = &self.inner.schema_adapter {
            definition.input_schema = adapter(definition.input_schema);
        }

        let registered = RegisteredTool {
            definition,
            handler: Arc::new(handler),
        };

        let mut registry = self.inner.registry.write();
        match registry
            .tools
            .iter()
            .position(|tool| tool.definition.name == registered.definition.name)
        {
            Some(index) => registry.tools[index] = registered,
            None => registry.tools.push(registered),
        }
        self
    }

    /// Registers a resource, replacing any earlier resource with the same URI.
    pub fn resource(&self, resource: Resource, handler: impl ResourceHandler + 'static) -> &Self {
        let registered = RegisteredResource {
            resource,
            handler: Arc::new(handler),
        };

        let mut registry = self.inner.registry.write();
        match registry
            .resources
            .iter()
            .position(|entry| entry.resource.uri == registered.resource.uri)
        {
            Some(index) => registry.resources[index] = registered,
            None => registry.resources.push(registered),
        }
        self
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.inner
            .registry
            .read()
            .tools
            .iter()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.inner
            .registry
            .read()
            .resources
            .iter()
            .map(|entry| entry.resource.clone())
            .collect()
    }

    fn tool_handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.inner
            .registry
            .read()
            .tools
            .iter()
            .find(|tool| tool.definition.name == name)
            .map(|tool| Arc::clone(&tool.handler))
    }

    fn resource_handler(&self, uri: &str) -> Option<(Arc<dyn ResourceHandler>, Option<String>)> {
        self.inner
            .registry
            .read()
            .resources
            .iter()
            .find(|entry| entry.resource.uri == uri)
            .map(|entry| (Arc::clone(&entry.handler), entry.resource.mime_type.clone()))
    }

    /// Dispatches one decoded JSON-RPC message. Notifications yield `None`.
    pub async fn handle_json_rpc_value(&self, payload: Value) -> Option<Value> {
        if !payload.is_object() {
            return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
        }

        let request_id = payload.get("id").cloned();
        let parsed: JsonrpcMessage = match serde_json::from_value(payload) {
            Ok(message) => message,
            Err(_) => return Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request")),
        };

        match parsed {
            JsonrpcMessage::Request(request) => {
                if let Err(error_response) = validate_request_shape(&request) {
                    return Some(error_response);
                }

                let request_id = request_id_to_value(request.id);
                if request.method.trim().is_empty() {
                    return Some(json_rpc_error(Some(request_id), INVALID_REQUEST, "Invalid Request"));
                }

                Some(
                    self.handle_request(
                        Some(request_id),
                        &request.method,
                        request.params.map(Value::Object),
                    )
                    .await,
                )
            }
            JsonrpcMessage::Notification(notification) => {
                debug!(method = %notification.method, "mcp notification received");
                None
            }
            JsonrpcMessage::ResultResponse(_) | JsonrpcMessage::ErrorResponse(_) => {
                Some(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request"))
            }
        }
    }

    async fn handle_request(&self, id: Option<Value>, method: &str, params: Option<Value>) -> Value {
        let response = match method {
            "initialize" => self.initialize(id, params.as_ref()),
            "ping" => json_rpc_result(id, json!({})),
            "tools/list" => json_rpc_result(id, json!({ "tools": self.tools() })),
            "tools/call" => self.call_tool(id, params).await,
            "resources/list" => json_rpc_typed_result(
                id,
                &ListResourcesResult {
                    meta: None,
                    next_cursor: None,
                    resources: self.resources(),
                },
            ),
            "resources/read" => self.read_resource(id, params).await,
            _ => json_rpc_error(id, METHOD_NOT_FOUND, "Method not found"),
        };

        debug!(
            method = %method,
            outcome = if is_json_rpc_error(&response) { "failure" } else { "success" },
            "mcp request handled"
        );

        response
    }

    fn initialize(&self, id: Option<Value>, params: Option<&Value>) -> Value {
        let server_info = Implementation {
            name: self.name().to_string(),
            version: self.version().to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        };
        let capabilities = ServerCapabilities {
            tools: Some(ServerCapabilitiesTools {
                list_changed: Some(false),
            }),
            resources: Some(ServerCapabilitiesResources {
                subscribe: Some(false),
                list_changed: Some(false),
            }),
            prompts: None,
            ..Default::default()
        };

        json_rpc_result(
            id,
            json!({
                "protocolVersion": negotiate_protocol_version(params),
                "capabilities": capabilities,
                "serverInfo": server_info,
            }),
        )
    }

    async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
        };

        let tool_call: CallToolRequestParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(id, INVALID_PARAMS, "Invalid params"),
        };

        let Some(handler) = self.tool_handler(&tool_call.name) else {
            return app_error_to_json_rpc(
                id,
                AppError::not_found("tool_not_found", format!("unknown tool name: {}", tool_call.name)),
            );
        };

        match handler.call(tool_call.arguments.unwrap_or_default()).await {
            Ok(result) => json_rpc_typed_result(id, &result),
            Err(err) => app_error_to_json_rpc(id, err),
        }
    }

    async fn read_resource(&self, id: Option<Value>, params: Option<Value>) -> Value {
        let Some(raw_params) = params else {
            return json_rpc_error(id, INVALID_PARAMS, "Invalid params");
        };

        let resource_read: ReadResourceRequestParams = match serde_json::from_value(raw_params) {
            Ok(value) => value,
            Err(_) => return json_rpc_error(id, INVALID_PARAMS, "Invalid params"),
        };

        let Some((handler, mime_type)) = self.resource_handler(&resource_read.uri) else {
            return app_error_to_json_rpc(
                id,
                AppError::not_found(
                    "resource_not_found",
                    format!("unknown resource uri: {}", resource_read.uri),
                ),
            );
        };

        match handler.read(&resource_read.uri).await {
            Ok(text) => json_rpc_typed_result(
                id,
                &ReadResourceResult {
                    contents: vec![ReadResourceContent::from(TextResourceContents {
                        meta: None,
                        mime_type,
                        text,
                        uri: resource_read.uri,
                    })],
                    meta: None,
                },
            ),
            Err(err) => app_error_to_json_rpc(id, err),
        }
    }
}

pub fn validate_request_shape(request: &JsonrpcRequest) -> Result<(), Value> {
    let request_id = Some(request_id_to_value(request.id.clone()));
    let Ok(payload) = serde_json::to_value(request) else {
        return Err(json_rpc_error(request_id, INVALID_REQUEST, "Invalid Request"));
    };

    let valid = match request.method.as_str() {
        "tools/call" => serde_json::from_value::<CallToolRequest>(payload).is_ok(),
        "resources/read" => serde_json::from_value::<ReadResourceRequest>(payload).is_ok(),
        "tools/list" => serde_json::from_value::<ListToolsRequest>(payload).is_ok(),
        "resources/list" => serde_json::from_value::<ListResourcesRequest>(payload).is_ok(),
        "ping" => serde_json::from_value::<PingRequest>(payload).is_ok(),
        "initialize" => serde_json::from_value::<InitializeRequest>(payload).is_ok(),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(json_rpc_error(request_id, INVALID_PARAMS, "Invalid params"))
    }
}

/// Echoes the client's version when supported, otherwise offers the newest one.
pub fn negotiate_protocol_version(params: Option<&Value>) -> &'static str {
    let offered = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim);

    offered
        .and_then(|offered| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|supported| *supported == offered)
        })
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}
