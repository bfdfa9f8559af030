//! MCP tool definitions and dispatch

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::protocol::{ToolDefinition, ToolResult};
use crate::error::{Error, Result};
use crate::google::calendar::{self, EventQuery};
use crate::google::drive::{self, ExportFormat, FileType, RecursiveListOptions};
use crate::google::sheets::{self, ValueRenderOption};
use crate::google::{gmail, Workspace};

/// Get all tool definitions
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        // Drive
        ToolDefinition {
            name: "drive_search".to_string(),
            description: "Search files in Google Drive. Plain text matches file names first, then file content. Drive query syntax (e.g. \"name contains 'budget' and mimeType = 'application/pdf'\") is passed through unchanged.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search text or Drive query"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 10, max: 100)"
                    },
                    "file_type": {
                        "type": "string",
                        "enum": ["document", "spreadsheet", "presentation", "folder", "pdf"],
                        "description": "Only return files of this type"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "drive_list".to_string(),
            description: "List files in a Google Drive folder, sorted by name.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "folder_id": {
                        "type": "string",
                        "description": "Folder ID (default: 'root' for My Drive)"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results (default: 25, max: 100)"
                    },
                    "include_trashed": {
                        "type": "boolean",
                        "description": "Include trashed files (default: false)"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "drive_list_recursive".to_string(),
            description: "Recursively list a Drive folder tree with file sizes. Shortcuts can be resolved to their targets. Useful for auditing storage usage.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "folder_id": {
                        "type": "string",
                        "description": "Folder ID to start from (default: 'root')"
                    },
                    "max_depth": {
                        "type": "integer",
                        "description": "Maximum folder depth (default: 5, range 1-10)"
                    },
                    "resolve_shortcuts": {
                        "type": "boolean",
                        "description": "Look up shortcut targets for their size (default: true)"
                    },
                    "max_files": {
                        "type": "integer",
                        "description": "Stop after this many entries"
                    },
                    "include_trashed": {
                        "type": "boolean",
                        "description": "Include trashed files (default: false)"
                    },
                    "compact": {
                        "type": "boolean",
                        "description": "Return only path, size and type per entry (default: false)"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "drive_get_content".to_string(),
            description: "Read the content of a Drive file. Google Docs export as text or HTML, Sheets as CSV, Slides as text; plain text and JSON files are downloaded. Other types return metadata only.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_id": {
                        "type": "string",
                        "description": "The file ID"
                    },
                    "export_format": {
                        "type": "string",
                        "enum": ["text", "html", "csv"],
                        "description": "Export format for Google Docs (default: text)"
                    },
                    "max_length": {
                        "type": "integer",
                        "description": "Truncate content to this many characters"
                    }
                },
                "required": ["file_id"]
            }),
        },
        // Gmail
        ToolDefinition {
            name: "gmail_search".to_string(),
            description: "Search Gmail with Gmail search syntax (e.g. 'from:alice is:unread newer_than:7d'). Returns subject, sender, date and snippet per message.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Gmail search query"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of messages (default: 10, max: 100)"
                    },
                    "include_spam_trash": {
                        "type": "boolean",
                        "description": "Include spam and trash (default: false)"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "gmail_get_message".to_string(),
            description: "Get a full Gmail message by ID, including headers, decoded body and labels.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message_id": {
                        "type": "string",
                        "description": "Message ID from gmail_search"
                    }
                },
                "required": ["message_id"]
            }),
        },
        ToolDefinition {
            name: "gmail_list_labels".to_string(),
            description: "List all Gmail labels (system and user).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        // Calendar
        ToolDefinition {
            name: "calendar_list".to_string(),
            description: "List the calendars the user can access.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDefinition {
            name: "calendar_get_events".to_string(),
            description: "Get calendar events in a time range (default: the next 7 days). Times without an offset are read in the user's calendar timezone; bare dates mean midnight.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "calendar_id": {
                        "type": "string",
                        "description": "Calendar ID (default: 'primary')"
                    },
                    "time_min": {
                        "type": "string",
                        "description": "Start of range, e.g. '2026-03-01' or '2026-03-01T09:00:00'"
                    },
                    "time_max": {
                        "type": "string",
                        "description": "End of range, same formats as time_min"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of events (default: 25, max: 250)"
                    },
                    "query": {
                        "type": "string",
                        "description": "Free text filter on event fields"
                    }
                }
            }),
        },
        // Sheets
        ToolDefinition {
            name: "sheets_read".to_string(),
            description: "Read values from a Google Spreadsheet. Without a range the first sheet is read; a bare sheet name reads A1:Z1000 of that sheet.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": {
                        "type": "string",
                        "description": "Spreadsheet ID (from the URL)"
                    },
                    "range_notation": {
                        "type": "string",
                        "description": "A1 range such as 'Sheet1!A1:D10', or a sheet name"
                    },
                    "value_render_option": {
                        "type": "string",
                        "enum": ["FORMATTED_VALUE", "UNFORMATTED_VALUE", "FORMULA"],
                        "description": "How values are rendered (default: FORMATTED_VALUE)"
                    },
                    "row_limit": {
                        "type": "integer",
                        "description": "Maximum rows to return (default: 100)"
                    }
                },
                "required": ["spreadsheet_id"]
            }),
        },
    ]
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args[key]
        .as_str()
        .ok_or_else(|| Error::InvalidRequest(format!("Missing {}", key)))
}

fn optional_str(args: &Value, key: &str) -> Option<String> {
    args[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn usize_or(args: &Value, key: &str, default: usize) -> usize {
    args[key].as_u64().map(|n| n as usize).unwrap_or(default)
}

/// Tool handler
pub struct ToolHandler {
    workspace: Arc<Workspace>,
}

impl ToolHandler {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }

    /// Execute a tool.
    ///
    /// Unknown tools are errors. Everything that goes wrong inside a tool,
    /// bad arguments included, comes back as a normal result with
    /// `"status": "error"`.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<Value> {
        debug!("Executing tool: {} with args: {:?}", name, arguments);

        let (result, failure) = match name {
            "drive_search" => (self.drive_search(arguments).await, "Failed to search Drive"),
            "drive_list" => (self.drive_list(arguments).await, "Failed to list Drive folder"),
            "drive_list_recursive" => (
                self.drive_list_recursive(arguments).await,
                "Failed to recursively list Drive folder",
            ),
            "drive_get_content" => (
                self.drive_get_content(arguments).await,
                "Failed to get file content",
            ),
            "gmail_search" => (self.gmail_search(arguments).await, "Failed to search Gmail"),
            "gmail_get_message" => (
                self.gmail_get_message(arguments).await,
                "Failed to get Gmail message",
            ),
            "gmail_list_labels" => (
                gmail::gmail_list_labels(&self.workspace).await,
                "Failed to list Gmail labels",
            ),
            "calendar_list" => (
                calendar::calendar_list(&self.workspace).await,
                "Failed to list calendars",
            ),
            "calendar_get_events" => (
                self.calendar_get_events(arguments).await,
                "Failed to get calendar events",
            ),
            "sheets_read" => (self.sheets_read(arguments).await, "Failed to read spreadsheet"),
            _ => return Err(Error::ToolNotFound(name.to_string())),
        };

        let payload = match result {
            Ok(value) => value,
            Err(e) => {
                error!("{} failed: {}", name, e);
                json!({
                    "status": "error",
                    "error": e.to_string(),
                    "message": failure,
                    "action": e.action_hint(),
                })
            }
        };

        Ok(serde_json::to_value(ToolResult::json(&payload))?)
    }

    async fn drive_search(&self, args: &Value) -> Result<Value> {
        let query = required_str(args, "query")?;
        // An unrecognised type searches without a filter
        let file_type = optional_str(args, "file_type").and_then(|t| {
            t.parse::<FileType>()
                .map_err(|e| warn!("Ignoring file_type: {}", e))
                .ok()
        });

        drive::drive_search(
            &self.workspace,
            query,
            usize_or(args, "max_results", 10),
            file_type,
        )
        .await
    }

    async fn drive_list(&self, args: &Value) -> Result<Value> {
        let folder_id = optional_str(args, "folder_id").unwrap_or_else(|| "root".to_string());

        drive::drive_list(
            &self.workspace,
            &folder_id,
            usize_or(args, "max_results", 25),
            args["include_trashed"].as_bool().unwrap_or(false),
        )
        .await
    }

    async fn drive_list_recursive(&self, args: &Value) -> Result<Value> {
        let defaults = RecursiveListOptions::default();
        let options = RecursiveListOptions {
            folder_id: optional_str(args, "folder_id").unwrap_or(defaults.folder_id),
            max_depth: args["max_depth"]
                .as_u64()
                .map(|d| d.min(u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_depth),
            resolve_shortcuts: args["resolve_shortcuts"]
                .as_bool()
                .unwrap_or(defaults.resolve_shortcuts),
            max_files: args["max_files"].as_u64().map(|n| n as usize),
            include_trashed: args["include_trashed"]
                .as_bool()
                .unwrap_or(defaults.include_trashed),
            compact: args["compact"].as_bool().unwrap_or(defaults.compact),
        };

        drive::drive_list_recursive(&self.workspace, options).await
    }

    async fn drive_get_content(&self, args: &Value) -> Result<Value> {
        let file_id = required_str(args, "file_id")?;
        let export_format = optional_str(args, "export_format")
            .map(|f| f.parse::<ExportFormat>())
            .transpose()?
            .unwrap_or_default();

        drive::drive_get_content(
            &self.workspace,
            file_id,
            export_format,
            args["max_length"].as_u64().map(|n| n as usize),
        )
        .await
    }

    async fn gmail_search(&self, args: &Value) -> Result<Value> {
        let query = required_str(args, "query")?;

        gmail::gmail_search(
            &self.workspace,
            query,
            usize_or(args, "max_results", 10),
            args["include_spam_trash"].as_bool().unwrap_or(false),
        )
        .await
    }

    async fn gmail_get_message(&self, args: &Value) -> Result<Value> {
        let message_id = required_str(args, "message_id")?;
        gmail::gmail_get_message(&self.workspace, message_id).await
    }

    async fn calendar_get_events(&self, args: &Value) -> Result<Value> {
        let defaults = EventQuery::default();
        let query = EventQuery {
            calendar_id: optional_str(args, "calendar_id").unwrap_or(defaults.calendar_id),
            time_min: optional_str(args, "time_min"),
            time_max: optional_str(args, "time_max"),
            max_results: usize_or(args, "max_results", defaults.max_results),
            query: optional_str(args, "query"),
        };

        calendar::calendar_get_events(&self.workspace, query).await
    }

    async fn sheets_read(&self, args: &Value) -> Result<Value> {
        let spreadsheet_id = required_str(args, "spreadsheet_id")?;
        let render = optional_str(args, "value_render_option")
            .map(|v| v.parse::<ValueRenderOption>())
            .transpose()?
            .unwrap_or_default();

        sheets::sheets_read(
            &self.workspace,
            spreadsheet_id,
            args["range_notation"].as_str().unwrap_or_default(),
            render,
            usize_or(args, "row_limit", 100),
        )
        .await
    }
}
