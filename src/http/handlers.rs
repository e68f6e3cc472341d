//! Axum HTTP handlers for the web server
//!
//! Provides the health check, the root info document and the JSON 404 fallback.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub mcp: &'static str,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub status: &'static str,
    pub endpoints: Endpoints,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: state.name.to_string(),
        version: state.version.to_string(),
        status: "ok",
        endpoints: Endpoints {
            health: "/health",
            mcp: "/mcp",
        },
    })
}

pub async fn not_found() -> AppError {
    AppError::not_found("route_not_found", "no route matches the request path")
}
