//! Transport wiring: stdio and streamable-HTTP MCP servers.
//!
//! In stdio mode the JSON-RPC stream owns stdout exclusively; all logging is
//! configured onto stderr at startup, so nothing else ever writes a byte
//! there. In http mode a single endpoint accepts JSON-RPC POSTs, with a
//! `/health` route alongside for probes.

use anyhow::Result;
use axum::routing::get;
use axum::Json;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, Transport};

use super::bridge::McpBridge;
use super::{AppContext, ToolRegistry};

/// Run the MCP server on the configured transport until the client
/// disconnects (stdio) or the process is terminated (http).
pub async fn run(config: Config) -> Result<()> {
    let transport = config.transport;
    let port = config.port;

    let context = Arc::new(AppContext::init(config).await?);
    let tools = Arc::new(ToolRegistry::from_config(&context.config));
    let bridge = McpBridge::new(context.clone(), tools);

    let result = match transport {
        Transport::Stdio => run_stdio(bridge).await,
        Transport::Http => run_http(bridge, port).await,
    };

    context.close().await;
    result
}

async fn run_stdio(bridge: McpBridge) -> Result<()> {
    tracing::info!("serving MCP over stdio");
    let service = bridge
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("stdio transport failed to start: {}", e))?;
    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("stdio transport error: {}", e))?;
    Ok(())
}

async fn run_http(bridge: McpBridge, port: u16) -> Result<()> {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    };

    let service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", get(health))
        .layer(cors);

    let bind = format!("0.0.0.0:{}", port);
    tracing::info!(bind = %bind, "serving MCP over http");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
