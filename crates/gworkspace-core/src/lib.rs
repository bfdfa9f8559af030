//! gworkspace core library
//!
//! Read-only access to Google Drive, Gmail, Calendar and Sheets for AI
//! assistants, served as MCP tools over stdio.

pub mod auth;
pub mod config;
pub mod error;
pub mod google;
pub mod logging;
pub mod mcp;
pub mod oauth;

pub use config::Config;
pub use error::{Error, Result};
pub use google::Workspace;

/// Application name for config paths
pub const APP_NAME: &str = "gworkspace";
