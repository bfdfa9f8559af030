//! Google Drive tools and query normalization

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::Workspace;
use crate::auth::with_auth_retry;
use crate::error::{Error, Result};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";
const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const PRESENTATION_MIME: &str = "application/vnd.google-apps.presentation";

const SEARCH_FIELDS: &str = "files(id, name, mimeType, webViewLink, modifiedTime, size)";
const LIST_FIELDS: &str =
    "files(id, name, mimeType, webViewLink, modifiedTime, size, shortcutDetails)";
const RECURSIVE_FIELDS: &str =
    "nextPageToken, files(id, name, mimeType, size, shortcutDetails, webViewLink)";

/// Drive query grammar keywords (whole words) and comparison operators
static STRUCTURED_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:contains|in|and|or|not)\b|!=|<=|>=|[=<>]").expect("valid regex")
});

/// Whether `query` already uses Drive's structured query syntax
pub fn is_structured_query(query: &str) -> bool {
    STRUCTURED_QUERY.is_match(query)
}

/// Escape a value for use inside a double-quoted Drive query string
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Escape a value for use inside a single-quoted Drive query string
fn escape_single_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Turn user input into a Drive query.
///
/// Blank input and input that already looks structured pass through
/// unchanged; anything else becomes a `fullText contains` search.
pub fn normalize_drive_query(query: &str) -> String {
    if query.trim().is_empty() || is_structured_query(query) {
        return query.to_string();
    }
    format!("fullText contains \"{}\"", escape_query_value(query))
}

/// Drive file type filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Document,
    Spreadsheet,
    Presentation,
    Folder,
    Pdf,
}

impl FileType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            FileType::Document => DOCUMENT_MIME,
            FileType::Spreadsheet => SPREADSHEET_MIME,
            FileType::Presentation => PRESENTATION_MIME,
            FileType::Folder => FOLDER_MIME,
            FileType::Pdf => "application/pdf",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Document => "document",
            FileType::Spreadsheet => "spreadsheet",
            FileType::Presentation => "presentation",
            FileType::Folder => "folder",
            FileType::Pdf => "pdf",
        }
    }

    fn filter(&self) -> String {
        format!("mimeType='{}'", self.mime_type())
    }
}

impl FromStr for FileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "document" => Ok(FileType::Document),
            "spreadsheet" => Ok(FileType::Spreadsheet),
            "presentation" => Ok(FileType::Presentation),
            "folder" => Ok(FileType::Folder),
            "pdf" => Ok(FileType::Pdf),
            other => Err(Error::InvalidRequest(format!(
                "Unknown file_type '{}' (expected document, spreadsheet, presentation, folder or pdf)",
                other
            ))),
        }
    }
}

/// How a search is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPlan {
    /// Run one query as given
    Structured(String),
    /// Run a filename search and a content search, filename hits first
    FreeText { title: String, content: String },
}

impl SearchPlan {
    pub fn new(query: &str, file_type: Option<FileType>) -> Self {
        let with_type = |q: String| match file_type {
            Some(t) if q.is_empty() => t.filter(),
            Some(t) => format!("{} and {}", q, t.filter()),
            None => q,
        };

        if query.trim().is_empty() || is_structured_query(query) {
            // Parenthesized so the type filter binds to the whole expression
            let grouped = match file_type {
                Some(_) if !query.trim().is_empty() => format!("({})", query),
                _ => query.to_string(),
            };
            return SearchPlan::Structured(with_type(grouped));
        }

        let escaped = escape_query_value(query);
        SearchPlan::FreeText {
            title: with_type(format!("name contains \"{}\"", escaped)),
            content: with_type(format!("fullText contains \"{}\"", escaped)),
        }
    }
}

/// Title matches first, then content-only matches, deduplicated by id
pub fn merge_results(title: Vec<Value>, content: Vec<Value>, max_results: usize) -> Vec<Value> {
    let mut seen = HashSet::new();
    title
        .into_iter()
        .chain(content)
        .filter(|file| match file["id"].as_str() {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .take(max_results)
        .collect()
}

async fn list_files(
    ws: &Workspace,
    query: &str,
    page_size: usize,
    fields: &str,
    order_by: &str,
) -> Result<Vec<Value>> {
    let mut params = vec![
        ("pageSize", page_size.to_string()),
        ("fields", fields.to_string()),
        ("orderBy", order_by.to_string()),
    ];
    if !query.is_empty() {
        params.push(("q", query.to_string()));
    }
    let params = &params;

    let body = with_auth_retry(&ws.auth, "drive", "v3", move |svc| async move {
        svc.get_json("files", params).await
    })
    .await?;

    Ok(body["files"].as_array().cloned().unwrap_or_default())
}

/// Search files by name and content, or with a raw Drive query
pub async fn drive_search(
    ws: &Workspace,
    query: &str,
    max_results: usize,
    file_type: Option<FileType>,
) -> Result<Value> {
    let max_results = max_results.clamp(1, 100);

    let files = match SearchPlan::new(query, file_type) {
        SearchPlan::Structured(q) => {
            list_files(ws, &q, max_results, SEARCH_FIELDS, "modifiedTime desc").await?
        }
        SearchPlan::FreeText { title, content } => {
            let title_files =
                list_files(ws, &title, max_results, SEARCH_FIELDS, "modifiedTime desc").await?;
            let content_files =
                list_files(ws, &content, max_results, SEARCH_FIELDS, "modifiedTime desc").await?;
            info!(
                "Drive search '{}': {} title matches, {} content matches",
                query,
                title_files.len(),
                content_files.len()
            );
            merge_results(title_files, content_files, max_results)
        }
    };

    Ok(json!({
        "status": "success",
        "query": query,
        "file_type": file_type.map(|t| t.as_str()),
        "count": files.len(),
        "files": files,
    }))
}

/// List the direct children of a folder
pub async fn drive_list(
    ws: &Workspace,
    folder_id: &str,
    max_results: usize,
    include_trashed: bool,
) -> Result<Value> {
    let query = folder_query(folder_id, include_trashed);
    let files = list_files(ws, &query, max_results.clamp(1, 100), LIST_FIELDS, "name").await?;
    info!("Listed {} files in folder {}", files.len(), folder_id);

    Ok(json!({
        "status": "success",
        "folder_id": folder_id,
        "count": files.len(),
        "files": files,
    }))
}

fn folder_query(folder_id: &str, include_trashed: bool) -> String {
    let mut query = format!("'{}' in parents", escape_single_quoted(folder_id));
    if !include_trashed {
        query.push_str(" and trashed=false");
    }
    query
}

/// Options for [`drive_list_recursive`]
#[derive(Debug, Clone)]
pub struct RecursiveListOptions {
    pub folder_id: String,
    pub max_depth: u32,
    pub resolve_shortcuts: bool,
    pub max_files: Option<usize>,
    pub include_trashed: bool,
    pub compact: bool,
}

impl Default for RecursiveListOptions {
    fn default() -> Self {
        Self {
            folder_id: "root".to_string(),
            max_depth: 5,
            resolve_shortcuts: true,
            max_files: None,
            include_trashed: false,
            compact: false,
        }
    }
}

fn parse_size(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn bytes_to_mb(bytes: Option<u64>) -> Option<f64> {
    bytes.map(|b| (b as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0)
}

/// Walk a folder tree breadth-first and return a flat list with sizes
pub async fn drive_list_recursive(ws: &Workspace, options: RecursiveListOptions) -> Result<Value> {
    let max_depth = options.max_depth.clamp(1, 10);
    // Zero means no limit
    let max_files = options.max_files.filter(|&max| max > 0);
    let limit_reached = |count: usize| max_files.is_some_and(|max| count >= max);

    let mut entries: Vec<Value> = Vec::new();
    let mut queue: VecDeque<(String, String, u32)> = VecDeque::new();
    queue.push_back((options.folder_id.clone(), String::new(), 0));

    let mut total_size_bytes: u64 = 0;
    let mut shortcuts_resolved = 0;
    let mut shortcuts_failed = 0;

    'folders: while let Some((folder_id, folder_path, depth)) = queue.pop_front() {
        let query = folder_query(&folder_id, options.include_trashed);
        let mut page_token: Option<String> = None;

        loop {
            if limit_reached(entries.len()) {
                break 'folders;
            }

            let mut params = vec![
                ("q", query.clone()),
                ("pageSize", "100".to_string()),
                ("fields", RECURSIVE_FIELDS.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let params = &params;

            let page = with_auth_retry(&ws.auth, "drive", "v3", move |svc| async move {
                svc.get_json("files", params).await
            })
            .await?;

            for file in page["files"].as_array().map(Vec::as_slice).unwrap_or_default() {
                if limit_reached(entries.len()) {
                    break 'folders;
                }

                let id = file["id"].as_str().unwrap_or_default();
                let name = file["name"].as_str().unwrap_or("Unknown");
                let mime_type = file["mimeType"].as_str().unwrap_or_default();
                let path = if folder_path.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", folder_path, name)
                };

                if mime_type == FOLDER_MIME {
                    if depth < max_depth {
                        queue.push_back((id.to_string(), path.clone(), depth + 1));
                    }
                    entries.push(if options.compact {
                        json!({"name": name, "path": path, "size_mb": null, "type": "folder"})
                    } else {
                        json!({
                            "id": id,
                            "name": name,
                            "path": path,
                            "mimeType": mime_type,
                            "size_bytes": null,
                            "size_mb": null,
                            "is_folder": true,
                            "is_shortcut": false,
                            "shortcut_target": null,
                        })
                    });
                    continue;
                }

                let mut size = parse_size(&file["size"]);
                let shortcut = &file["shortcutDetails"];

                if mime_type == SHORTCUT_MIME && shortcut.is_object() {
                    let mut resolved_name = None;
                    if options.resolve_shortcuts {
                        match resolve_shortcut(ws, shortcut).await {
                            Some(target) => {
                                shortcuts_resolved += 1;
                                size = parse_size(&target["size"]);
                                resolved_name = target["name"].as_str().map(String::from);
                            }
                            None => shortcuts_failed += 1,
                        }
                    }

                    entries.push(if options.compact {
                        json!({"name": name, "path": path, "size_mb": bytes_to_mb(size), "type": "shortcut"})
                    } else {
                        json!({
                            "id": id,
                            "name": name,
                            "path": path,
                            "mimeType": mime_type,
                            "size_bytes": size,
                            "size_mb": bytes_to_mb(size),
                            "is_folder": false,
                            "is_shortcut": true,
                            "shortcut_target": {
                                "id": shortcut["targetId"],
                                "mimeType": shortcut["targetMimeType"],
                                "resolved_name": resolved_name,
                            },
                        })
                    });
                } else {
                    entries.push(if options.compact {
                        json!({"name": name, "path": path, "size_mb": bytes_to_mb(size), "type": "file"})
                    } else {
                        json!({
                            "id": id,
                            "name": name,
                            "path": path,
                            "mimeType": mime_type,
                            "size_bytes": size,
                            "size_mb": bytes_to_mb(size),
                            "is_folder": false,
                            "is_shortcut": false,
                            "shortcut_target": null,
                        })
                    });
                }
                total_size_bytes += size.unwrap_or(0);
            }

            page_token = page["nextPageToken"].as_str().map(String::from);
            if page_token.is_none() {
                break;
            }
        }
    }

    let total_size_mb = bytes_to_mb(Some(total_size_bytes)).unwrap_or(0.0);
    info!(
        "Recursive list found {} items, total size: {} MB, shortcuts resolved: {}, failed: {}",
        entries.len(),
        total_size_mb,
        shortcuts_resolved,
        shortcuts_failed
    );

    Ok(json!({
        "status": "success",
        "folder_id": options.folder_id,
        "max_depth": max_depth,
        "total_items": entries.len(),
        "total_size_bytes": total_size_bytes,
        "total_size_mb": total_size_mb,
        "shortcuts_resolved": shortcuts_resolved,
        "shortcuts_failed": shortcuts_failed,
        "truncated": limit_reached(entries.len()),
        "files": entries,
    }))
}

async fn resolve_shortcut(ws: &Workspace, details: &Value) -> Option<Value> {
    let target_id = details["targetId"].as_str()?;
    let path = format!("files/{}", urlencoding::encode(target_id));
    let path = &path;

    let result = with_auth_retry(&ws.auth, "drive", "v3", move |svc| async move {
        svc.get_json(path, &[("fields", "id, name, mimeType, size, webViewLink".to_string())])
            .await
    })
    .await;

    match result {
        Ok(target) => Some(target),
        Err(e) => {
            warn!("Failed to resolve shortcut to {}: {}", target_id, e);
            None
        }
    }
}

/// Export format requested for Google Docs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Text,
    Html,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ExportFormat::Text),
            "html" => Ok(ExportFormat::Html),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::InvalidRequest(format!(
                "Unknown export_format '{}' (expected text, html or csv)",
                other
            ))),
        }
    }
}

enum ContentSource {
    Export(&'static str),
    Download,
    Unsupported,
}

fn content_source(mime_type: &str, format: ExportFormat) -> ContentSource {
    match mime_type {
        DOCUMENT_MIME => match format {
            ExportFormat::Html => ContentSource::Export("text/html"),
            ExportFormat::Text | ExportFormat::Csv => ContentSource::Export("text/plain"),
        },
        SPREADSHEET_MIME => ContentSource::Export("text/csv"),
        PRESENTATION_MIME => ContentSource::Export("text/plain"),
        m if m.starts_with("text/") || m == "application/json" => ContentSource::Download,
        _ => ContentSource::Unsupported,
    }
}

/// `1234567` -> `1,234,567`
fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Cut `content` to `max_length` characters, appending a notice.
/// Returns the (possibly shortened) text and whether it was cut.
pub fn truncate_content(content: String, max_length: Option<usize>) -> (String, bool) {
    let Some(max_length) = max_length.filter(|&m| m > 0) else {
        return (content, false);
    };
    let original_length = content.chars().count();
    if original_length <= max_length {
        return (content, false);
    }

    let mut truncated: String = content.chars().take(max_length).collect();
    truncated.push_str(&format!(
        "\n\n... [content truncated - original length: {} characters, showing first {}]",
        with_thousands(original_length),
        with_thousands(max_length)
    ));
    (truncated, true)
}

/// Read a file's text: Google Docs/Sheets/Slides are exported, plain text
/// and JSON are downloaded, anything else returns metadata only
pub async fn drive_get_content(
    ws: &Workspace,
    file_id: &str,
    export_format: ExportFormat,
    max_length: Option<usize>,
) -> Result<Value> {
    let file_path = format!("files/{}", urlencoding::encode(file_id));
    let file_path = &file_path;

    let meta = with_auth_retry(&ws.auth, "drive", "v3", move |svc| async move {
        svc.get_json(file_path, &[("fields", "id, name, mimeType, size".to_string())])
            .await
    })
    .await?;

    let mime_type = meta["mimeType"].as_str().unwrap_or_default().to_string();
    let file_name = meta["name"].as_str().unwrap_or("Unknown").to_string();

    let content = match content_source(&mime_type, export_format) {
        ContentSource::Export(export_mime) => {
            let export_path = format!("{}/export", file_path);
            let export_path = &export_path;
            with_auth_retry(&ws.auth, "drive", "v3", move |svc| async move {
                svc.get_text(export_path, &[("mimeType", export_mime.to_string())])
                    .await
            })
            .await?
        }
        ContentSource::Download => {
            with_auth_retry(&ws.auth, "drive", "v3", move |svc| async move {
                svc.get_text(file_path, &[("alt", "media".to_string())]).await
            })
            .await?
        }
        ContentSource::Unsupported => {
            info!("Unsupported MIME type for content extraction: {}", mime_type);
            return Ok(json!({
                "status": "success",
                "file_id": file_id,
                "file_name": file_name,
                "mime_type": mime_type,
                "content": null,
                "content_length": 0,
                "truncated": false,
                "message": format!("Cannot extract text content from {}. Use webViewLink to view.", mime_type),
            }));
        }
    };

    let content_length = content.chars().count();
    let (content, truncated) = truncate_content(content, max_length);
    info!("Retrieved content from {}", file_name);

    Ok(json!({
        "status": "success",
        "file_id": file_id,
        "file_name": file_name,
        "mime_type": mime_type,
        "content": content,
        "content_length": content_length,
        "truncated": truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::testing;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_plain_text_is_wrapped() {
        assert_eq!(
            normalize_drive_query("quarterly report"),
            r#"fullText contains "quarterly report""#
        );
        assert_eq!(
            normalize_drive_query("Better AI role for prompts"),
            r#"fullText contains "Better AI role for prompts""#
        );
    }

    #[test]
    fn test_quotes_and_backslashes_are_escaped() {
        assert_eq!(
            normalize_drive_query(r#"doc with "quotes""#),
            r#"fullText contains "doc with \"quotes\"""#
        );
        assert_eq!(
            normalize_drive_query(r"C:\reports"),
            r#"fullText contains "C:\\reports""#
        );
    }

    #[test]
    fn test_structured_queries_pass_through() {
        for query in [
            "name contains 'budget'",
            "mimeType = 'application/pdf'",
            "modifiedTime > '2024-01-01T00:00:00'",
            "'root' in parents",
            "starred = true and trashed = false",
            "not name contains 'draft'",
            "NAME CONTAINS 'Budget'",
            "mimeType!='application/pdf'",
        ] {
            assert_eq!(normalize_drive_query(query), query);
        }
    }

    #[test]
    fn test_keywords_must_be_whole_words() {
        // "information", "android", "ornament" contain keywords as substrings
        assert!(!is_structured_query("information android ornament"));
        assert!(is_structured_query("budget and forecast"));
    }

    #[test]
    fn test_blank_query_unchanged() {
        assert_eq!(normalize_drive_query(""), "");
        assert_eq!(normalize_drive_query("   "), "   ");
    }

    #[test]
    fn test_search_plan() {
        assert_eq!(
            SearchPlan::new("budget", Some(FileType::Spreadsheet)),
            SearchPlan::FreeText {
                title: "name contains \"budget\" and mimeType='application/vnd.google-apps.spreadsheet'"
                    .to_string(),
                content: "fullText contains \"budget\" and mimeType='application/vnd.google-apps.spreadsheet'"
                    .to_string(),
            }
        );
        assert_eq!(
            SearchPlan::new("starred = true", Some(FileType::Pdf)),
            SearchPlan::Structured("(starred = true) and mimeType='application/pdf'".to_string())
        );
        assert_eq!(
            SearchPlan::new("name contains 'a' or name contains 'b'", Some(FileType::Document)),
            SearchPlan::Structured(
                "(name contains 'a' or name contains 'b') and mimeType='application/vnd.google-apps.document'"
                    .to_string()
            )
        );
        assert_eq!(
            SearchPlan::new("starred = true", None),
            SearchPlan::Structured("starred = true".to_string())
        );
        assert_eq!(
            SearchPlan::new("", Some(FileType::Folder)),
            SearchPlan::Structured("mimeType='application/vnd.google-apps.folder'".to_string())
        );
    }

    #[test]
    fn test_file_type_parsing() {
        assert_eq!("PDF".parse::<FileType>().unwrap(), FileType::Pdf);
        assert!("video".parse::<FileType>().is_err());
    }

    #[test]
    fn test_merge_prefers_title_matches() {
        let title = vec![json!({"id": "a"}), json!({"id": "b"})];
        let content = vec![json!({"id": "b"}), json!({"id": "c"}), json!({"id": "d"})];

        let merged = merge_results(title, content, 3);
        let ids: Vec<_> = merged.iter().map(|f| f["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_truncate_content() {
        let (text, truncated) = truncate_content("x".repeat(1500), Some(1000));
        assert!(truncated);
        assert!(text.starts_with(&"x".repeat(1000)));
        assert!(text.ends_with(
            "[content truncated - original length: 1,500 characters, showing first 1,000]"
        ));

        let (text, truncated) = truncate_content("short".to_string(), Some(1000));
        assert!(!truncated);
        assert_eq!(text, "short");

        let (_, truncated) = truncate_content("abc".to_string(), None);
        assert!(!truncated);
    }

    #[test]
    fn test_thousands_separator() {
        assert_eq!(with_thousands(0), "0");
        assert_eq!(with_thousands(999), "999");
        assert_eq!(with_thousands(1000), "1,000");
        assert_eq!(with_thousands(1234567), "1,234,567");
    }

    #[tokio::test]
    async fn test_drive_search_merges_title_and_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "name contains \"roadmap\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "1", "name": "Roadmap 2025"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "fullText contains \"roadmap\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "2", "name": "Planning notes"},
                    {"id": "1", "name": "Roadmap 2025"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let result = drive_search(&ws, "roadmap", 10, None).await.unwrap();

        assert_eq!(result["status"], "success");
        assert_eq!(result["count"], 2);
        assert_eq!(result["files"][0]["id"], "1");
        assert_eq!(result["files"][1]["id"], "2");
    }

    #[tokio::test]
    async fn test_drive_get_content_exports_docs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/doc1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "doc1",
                "name": "Design",
                "mimeType": DOCUMENT_MIME
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/doc1/export"))
            .and(query_param("mimeType", "text/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Hello world"))
            .expect(1)
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let result = drive_get_content(&ws, "doc1", ExportFormat::Text, Some(5))
            .await
            .unwrap();

        assert_eq!(result["file_name"], "Design");
        assert_eq!(result["content_length"], 11);
        assert_eq!(result["truncated"], true);
        assert!(result["content"].as_str().unwrap().starts_with("Hello\n\n..."));
    }

    #[tokio::test]
    async fn test_drive_get_content_unsupported_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/img"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "img",
                "name": "photo.png",
                "mimeType": "image/png"
            })))
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let result = drive_get_content(&ws, "img", ExportFormat::Text, None)
            .await
            .unwrap();

        assert_eq!(result["status"], "success");
        assert!(result["content"].is_null());
        assert!(result["message"].as_str().unwrap().contains("image/png"));
    }

    #[tokio::test]
    async fn test_recursive_listing_walks_subfolders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'root' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "f1", "name": "Projects", "mimeType": FOLDER_MIME},
                    {"id": "a", "name": "notes.txt", "mimeType": "text/plain", "size": "1048576"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'f1' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "b", "name": "plan.pdf", "mimeType": "application/pdf", "size": "524288"}
                ]
            })))
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let result = drive_list_recursive(&ws, RecursiveListOptions::default())
            .await
            .unwrap();

        assert_eq!(result["total_items"], 3);
        assert_eq!(result["total_size_bytes"], 1572864);
        assert_eq!(result["total_size_mb"], 1.5);
        assert_eq!(result["truncated"], false);
        assert_eq!(result["files"][2]["path"], "Projects/plan.pdf");
    }

    #[tokio::test]
    async fn test_recursive_listing_respects_max_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "a", "name": "a.txt", "mimeType": "text/plain"},
                    {"id": "b", "name": "b.txt", "mimeType": "text/plain"},
                    {"id": "c", "name": "c.txt", "mimeType": "text/plain"}
                ]
            })))
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let options = RecursiveListOptions {
            max_files: Some(2),
            compact: true,
            ..Default::default()
        };
        let result = drive_list_recursive(&ws, options).await.unwrap();

        assert_eq!(result["total_items"], 2);
        assert_eq!(result["truncated"], true);
        assert_eq!(result["files"][0]["type"], "file");
    }

    #[tokio::test]
    async fn test_recursive_listing_zero_max_files_is_unlimited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "a", "name": "a.txt", "mimeType": "text/plain"},
                    {"id": "b", "name": "b.txt", "mimeType": "text/plain"}
                ]
            })))
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let options = RecursiveListOptions {
            max_files: Some(0),
            ..Default::default()
        };
        let result = drive_list_recursive(&ws, options).await.unwrap();

        assert_eq!(result["total_items"], 2);
        assert_eq!(result["truncated"], false);
    }
}
