//! gworkspace MCP server
//!
//! Spawned by an MCP client for read-only access to Drive, Gmail, Calendar
//! and Sheets. Communicates via stdio JSON-RPC.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use gworkspace_core::config::Config;
use gworkspace_core::logging::init_file_logging;
use gworkspace_core::mcp::McpServer;
use gworkspace_core::Workspace;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config first to get log path
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring unreadable config ({}), using defaults", e);
        Config::default()
    });

    // stdout carries JSON-RPC, so logs go to a file
    init_file_logging(&config, "mcp.log")?;

    info!("gworkspace MCP server starting");

    let workspace = Arc::new(Workspace::from_config(&config).map_err(|e| {
        error!("Failed to initialize Google API client: {}", e);
        e
    })?);

    if !workspace.auth.has_local_token() && !workspace.auth.has_ambient() {
        // Tools still start and report the setup hint per call
        error!("No credentials found. Run `gworkspace setup` to authenticate.");
    }

    let server = McpServer::new(workspace);
    server.run().await?;

    info!("gworkspace MCP server stopped");
    Ok(())
}
