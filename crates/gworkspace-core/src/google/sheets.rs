//! Google Sheets tools

use serde_json::{json, Value};
use tracing::{error, info};

use super::Workspace;
use crate::auth::with_auth_retry;
use crate::error::{Error, Result};

const DEFAULT_CELLS: &str = "A1:Z1000";

/// How cell values are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueRenderOption {
    #[default]
    FormattedValue,
    UnformattedValue,
    Formula,
}

impl ValueRenderOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueRenderOption::FormattedValue => "FORMATTED_VALUE",
            ValueRenderOption::UnformattedValue => "UNFORMATTED_VALUE",
            ValueRenderOption::Formula => "FORMULA",
        }
    }
}

impl std::str::FromStr for ValueRenderOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "FORMATTED_VALUE" => Ok(ValueRenderOption::FormattedValue),
            "UNFORMATTED_VALUE" => Ok(ValueRenderOption::UnformattedValue),
            "FORMULA" => Ok(ValueRenderOption::Formula),
            other => Err(Error::InvalidRequest(format!(
                "Unknown value_render_option: {}",
                other
            ))),
        }
    }
}

fn sheet_titles(metadata: &Value) -> Vec<String> {
    metadata["sheets"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|s| {
            s["properties"]["title"]
                .as_str()
                .unwrap_or("Unknown")
                .to_string()
        })
        .collect()
}

/// Expand user input into a full A1 range.
///
/// Empty input reads the first sheet; a bare sheet name gets the default
/// cell block, quoted when the name has spaces.
pub fn resolve_range(range_notation: &str, first_sheet: Option<&str>) -> String {
    if range_notation.is_empty() {
        return match first_sheet {
            Some(name) => format!("'{}'!{}", name, DEFAULT_CELLS),
            None => DEFAULT_CELLS.to_string(),
        };
    }
    if range_notation.contains('!') {
        return range_notation.to_string();
    }
    if range_notation.contains(' ') && !range_notation.starts_with('\'') {
        format!("'{}'!{}", range_notation, DEFAULT_CELLS)
    } else {
        format!("{}!{}", range_notation, DEFAULT_CELLS)
    }
}

/// Read up to `row_limit` rows from a spreadsheet range
pub async fn sheets_read(
    ws: &Workspace,
    spreadsheet_id: &str,
    range_notation: &str,
    value_render_option: ValueRenderOption,
    row_limit: usize,
) -> Result<Value> {
    let metadata_path = format!("spreadsheets/{}", urlencoding::encode(spreadsheet_id));
    let metadata_path = &metadata_path;

    let metadata = with_auth_retry(&ws.auth, "sheets", "v4", move |svc| async move {
        svc.get_json(metadata_path, &[]).await
    })
    .await?;

    let title = metadata["properties"]["title"]
        .as_str()
        .unwrap_or("Untitled")
        .to_string();
    let sheets = sheet_titles(&metadata);
    let range = resolve_range(range_notation, sheets.first().map(String::as_str));

    let values_path = format!(
        "spreadsheets/{}/values/{}",
        urlencoding::encode(spreadsheet_id),
        urlencoding::encode(&range)
    );
    let values_path = &values_path;
    let params = [("valueRenderOption", value_render_option.as_str().to_string())];
    let params = &params;

    let result = match with_auth_retry(&ws.auth, "sheets", "v4", move |svc| async move {
        svc.get_json(values_path, params).await
    })
    .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("Sheets read failed: {}", e);
            let available = sheets
                .iter()
                .map(|name| format!("'{}'", name))
                .collect::<Vec<_>>()
                .join(", ");
            return Ok(json!({
                "status": "error",
                "error": format!(
                    "Failed to read range '{}'. Available sheets: [{}]. Error: {}",
                    range, available, e
                ),
                "message": "Failed to read spreadsheet",
                "available_sheets": sheets,
            }));
        }
    };

    let all_values = result["values"].as_array().cloned().unwrap_or_default();
    let total_rows = all_values.len();
    let values: Vec<Value> = all_values.into_iter().take(row_limit).collect();

    info!(
        "Read {} rows from spreadsheet: {} (returned {})",
        total_rows,
        title,
        values.len()
    );

    Ok(json!({
        "status": "success",
        "spreadsheet_id": spreadsheet_id,
        "title": title,
        "range": result["range"].as_str().unwrap_or(&range),
        "majorDimension": result["majorDimension"].as_str().unwrap_or("ROWS"),
        "total_rows": total_rows,
        "returned_rows": values.len(),
        "is_truncated": total_rows > row_limit,
        "values": values,
    }))
}
