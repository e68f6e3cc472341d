//! Single-endpoint HTTP transport for the MCP server handle
//!
//! Each POST carries one JSON-RPC message or a batch and is answered with a
//! plain JSON body. There are no sessions and no server-initiated streams.

use std::{future::Future, pin::Pin};

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::errors::AppError;
use crate::mcp::rpc::{json_rpc_error, INVALID_REQUEST, PARSE_ERROR};
use crate::mcp::server::McpServer;

pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub type TransportFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Binds the server handle once and returns a reusable request handler.
pub fn bind_transport(
    server: McpServer,
) -> impl Fn(Request) -> TransportFuture + Clone + Send + Sync + 'static {
    move |request: Request| {
        let server = server.clone();
        Box::pin(async move { handle_http_request(&server, request).await })
    }
}

pub async fn handle_http_request(server: &McpServer, request: Request) -> Response {
    if request.method() != Method::POST {
        let mut response = AppError::method_not_allowed(
            "method_not_allowed",
            "the mcp endpoint only accepts POST",
        )
        .into_response();
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("POST"));
        return response;
    }

    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return parse_error(),
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return parse_error(),
    };

    if let Value::Array(batch) = payload {
        if batch.is_empty() {
            return (
                StatusCode::OK,
                Json(vec![json_rpc_error(None, INVALID_REQUEST, "Invalid Request")]),
            )
                .into_response();
        }

        let mut responses = Vec::with_capacity(batch.len());
        for item in batch {
            if let Some(response) = server.handle_json_rpc_value(item).await {
                responses.push(response);
            }
        }

        if responses.is_empty() {
            return accepted();
        }

        return (StatusCode::OK, Json(Value::Array(responses))).into_response();
    }

    match server.handle_json_rpc_value(payload).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => accepted(),
    }
}

fn parse_error() -> Response {
    (
        StatusCode::OK,
        Json(json_rpc_error(None, PARSE_ERROR, "Parse error")),
    )
        .into_response()
}

fn accepted() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::ACCEPTED;
    response
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;

    fn post(body: &str) -> Request {
        axum::http::Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    async fn body_json(response: Response) -> Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    fn server() -> McpServer {
        McpServer::new("transport-test", "1.0.0", None)
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let response = handle_http_request(&server(), post("{not json")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn empty_batch_is_invalid_request() {
        let response = handle_http_request(&server(), post("[]")).await;

        let body = body_json(response).await;
        assert_eq!(body[0]["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn batch_keeps_order_and_skips_notifications() {
        let response = handle_http_request(
            &server(),
            post(
                r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"},{"jsonrpc":"2.0","id":2,"method":"ping"}]"#,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(2));
        assert_eq!(body[0]["id"], 1);
        assert_eq!(body[1]["id"], 2);
    }

    #[tokio::test]
    async fn notification_only_is_accepted() {
        let response = handle_http_request(
            &server(),
            post(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn get_is_method_not_allowed() {
        let request = axum::http::Request::builder()
            .uri("/mcp")
            .method("GET")
            .body(Body::empty())
            .expect("request build");

        let response = handle_http_request(&server(), request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }

    #[tokio::test]
    async fn oversized_body_is_parse_error() {
        let request = axum::http::Request::builder()
            .uri("/mcp")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(vec![b' '; MAX_BODY_BYTES + 1]))
            .expect("request build");

        let response = handle_http_request(&server(), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn bound_handler_is_reusable() {
        let handler = bind_transport(server());

        for id in 1..=2 {
            let response = handler(post(&json!({ "jsonrpc": "2.0", "id": id, "method": "ping" }).to_string())).await;
            assert_eq!(body_json(response).await["id"], id);
        }
    }
}
