use mcp_edge_server::{
    config::ServeConfig,
    create_edge_server,
    errors::AppError,
    logging,
    mcp::server::{text_result, ToolDefinition},
};
use rust_mcp_sdk::{macros, schema::Resource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

pub const SERVER_INFO_URI: &str = "resource://server/info";

#[macros::mcp_tool(name = "echo", description = "Echo the given text back to the caller")]
#[derive(Debug, Deserialize, Serialize, macros::JsonSchema)]
pub struct EchoTool {
    pub text: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = ServeConfig::from_env()?;
    let bind_socket = config.bind_socket()?;
    let edge = create_edge_server(config.edge.clone());

    edge.server.tool(
        ToolDefinition::from_tool(&EchoTool::tool())?,
        |arguments: Map<String, Value>| async move {
            let params: EchoTool = serde_json::from_value(Value::Object(arguments))
                .map_err(|err| AppError::bad_request("invalid_arguments", err.to_string()))?;
            Ok::<_, AppError>(text_result(params.text))
        },
    );

    let name = config.edge.name.clone();
    let version = config.edge.resolved_version().to_string();
    edge.server.resource(
        Resource {
            annotations: None,
            description: Some("Name and version of this server".to_string()),
            icons: vec![],
            meta: None,
            mime_type: Some("application/json".to_string()),
            name: "Server Info".to_string(),
            size: None,
            title: None,
            uri: SERVER_INFO_URI.to_string(),
        },
        move |_uri: String| {
            let body = json!({ "name": name, "version": version }).to_string();
            async move { Ok::<_, AppError>(body) }
        },
    );

    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        base_path = edge.mount_path().unwrap_or("/"),
        "server starting"
    );

    axum::serve(listener, edge.fetch().into_make_service()).await?;
    Ok(())
}
