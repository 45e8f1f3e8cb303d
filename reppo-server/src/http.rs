//! HTTP transport for the orchestrator's MCP surface
//!
//! Each POST to `/mcp` carries one JSON-RPC message. Requests are answered
//! with the JSON-RPC response; notifications get `202 Accepted`.

use crate::orchestrator::OrchestratorTools;
use crate::Result;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reppo_mcp::server::McpServer;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

type AppState = McpServer<OrchestratorTools>;

/// Build the application router
pub fn router(server: AppState) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(health))
        .with_state(server)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn handle_mcp(State(server): State<AppState>, body: String) -> Response {
    match server.handle_message(&body).await {
        Ok(Some(reply)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            reply,
        )
            .into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            error!("Failed to handle MCP message: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health(State(server): State<AppState>) -> Json<serde_json::Value> {
    let servers = server.handler().orchestrator().list_servers().len();
    Json(json!({ "status": "ok", "servers": servers }))
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, server: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("MCP HTTP endpoint listening on http://{}/mcp", listener.local_addr()?);

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
