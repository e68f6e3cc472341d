use std::sync::Arc;

use axum::{
    extract::Request,
    http::Uri,
    middleware,
    routing::{any, get},
    Router,
};
use tower::ServiceExt;
use tracing::debug;

pub mod config;
pub mod cors;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;

use config::EdgeConfig;
use mcp::{server::McpServer, transport::bind_transport};

/// Shared by the info route; everything else is stateless.
#[derive(Clone)]
pub struct AppState {
    pub name: Arc<str>,
    pub version: Arc<str>,
}

impl AppState {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: Arc::from(name),
            version: Arc::from(version),
        }
    }
}

/// Output of [`create_edge_server`].
pub struct EdgeServer {
    /// Register tools and resources here.
    pub server: McpServer,
    /// Fully layered router with unprefixed routes, exposed for manual
    /// composition. Routes added to it later are not covered by the CORS and
    /// logging layers.
    pub app: Router,
    mount_path: Option<String>,
}

impl EdgeServer {
    pub fn mount_path(&self) -> Option<&str> {
        self.mount_path.as_deref()
    }

    /// Produces the router to hand to `axum::serve`, nested under the base
    /// path when one was configured.
    ///
    /// Nesting maps the inner `/` to the bare prefix only, so `<prefix>/` is
    /// routed separately into the inner router as a request for `/`.
    pub fn fetch(&self) -> Router {
        match &self.mount_path {
            Some(prefix) => Router::new()
                .nest(prefix, self.app.clone())
                .route_service(
                    &format!("{prefix}/"),
                    self.app.clone().map_request(rewrite_to_root),
                ),
            None => self.app.clone(),
        }
    }
}

fn rewrite_to_root(mut request: Request) -> Request {
    let root = match request.uri().query() {
        Some(query) => format!("/?{query}"),
        None => "/".to_string(),
    };

    if let Ok(uri) = root.parse::<Uri>() {
        *request.uri_mut() = uri;
    }
    request
}

pub fn create_edge_server(config: EdgeConfig) -> EdgeServer {
    let server = McpServer::new(
        config.name.clone(),
        config.resolved_version(),
        config.schema_adapter.clone(),
    );
    let app = build_app(&config, &server);
    let mount_path = config.mount_path();

    debug!(
        name = %config.name,
        version = config.resolved_version(),
        mount_path = mount_path.as_deref().unwrap_or("/"),
        logging = config.logging_enabled(),
        "edge server assembled"
    );

    EdgeServer {
        server,
        app,
        mount_path,
    }
}

/// Layers run outside-in as CORS, then request logging, then the routes.
pub fn build_app(config: &EdgeConfig, server: &McpServer) -> Router {
    let state = AppState::new(&config.name, config.resolved_version());

    let mut app = Router::new()
        .route("/health", get(http::handlers::health))
        .route("/", get(http::handlers::info))
        .route("/mcp", any(bind_transport(server.clone())))
        .fallback(http::handlers::not_found)
        .with_state(state);

    if config.logging_enabled() {
        app = app.layer(middleware::from_fn(logging::request_logging_middleware));
    }

    app.layer(middleware::from_fn_with_state(
        config.allowed_origins(),
        cors::cors_middleware,
    ))
}
