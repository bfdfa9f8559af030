//! Gmail tools

use std::collections::HashMap;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{json, Value};
use tracing::info;

use super::Workspace;
use crate::auth::with_auth_retry;
use crate::error::Result;

/// Gmail sends URL-safe base64, sometimes without padding
fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn part_data(part: &Value) -> Option<String> {
    part["body"]["data"]
        .as_str()
        .filter(|d| !d.is_empty())
        .and_then(decode_body)
}

/// Extract a readable body from a message payload.
///
/// A body on the payload itself wins. Otherwise the first `text/plain` part
/// (searching into `multipart/alternative`), then the first `text/html` part.
pub fn extract_body(payload: &Value) -> String {
    if let Some(body) = part_data(payload) {
        return body;
    }

    let Some(parts) = payload["parts"].as_array() else {
        return String::new();
    };

    for part in parts {
        match part["mimeType"].as_str() {
            Some("text/plain") => {
                if let Some(body) = part_data(part) {
                    return body;
                }
            }
            Some("multipart/alternative") => {
                let body = extract_body(part);
                if !body.is_empty() {
                    return body;
                }
            }
            _ => {}
        }
    }

    parts
        .iter()
        .filter(|part| part["mimeType"] == "text/html")
        .find_map(part_data)
        .unwrap_or_default()
}

fn headers_of(message: &Value) -> HashMap<&str, &str> {
    message["payload"]["headers"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|h| Some((h["name"].as_str()?, h["value"].as_str()?)))
        .collect()
}

/// Search messages with Gmail query syntax and return header summaries
pub async fn gmail_search(
    ws: &Workspace,
    query: &str,
    max_results: usize,
    include_spam_trash: bool,
) -> Result<Value> {
    let max_results = max_results.clamp(1, 100);
    let params = [
        ("q", query.to_string()),
        ("maxResults", max_results.to_string()),
        ("includeSpamTrash", include_spam_trash.to_string()),
    ];
    let params = &params;

    let listing = with_auth_retry(&ws.auth, "gmail", "v1", move |svc| async move {
        svc.get_json("users/me/messages", params).await
    })
    .await?;

    let mut messages = Vec::new();
    for msg in listing["messages"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .take(max_results)
    {
        let Some(id) = msg["id"].as_str() else {
            continue;
        };
        let path = format!("users/me/messages/{}", urlencoding::encode(id));
        let path = &path;

        let detail = with_auth_retry(&ws.auth, "gmail", "v1", move |svc| async move {
            svc.get_json(
                path,
                &[
                    ("format", "metadata".to_string()),
                    ("metadataHeaders", "Subject".to_string()),
                    ("metadataHeaders", "From".to_string()),
                    ("metadataHeaders", "Date".to_string()),
                ],
            )
            .await
        })
        .await?;

        let headers = headers_of(&detail);
        messages.push(json!({
            "id": id,
            "threadId": msg["threadId"],
            "subject": headers.get("Subject").copied().unwrap_or("(No Subject)"),
            "from": headers.get("From").copied().unwrap_or("Unknown"),
            "date": headers.get("Date").copied().unwrap_or_default(),
            "snippet": detail["snippet"].as_str().unwrap_or_default(),
            "webLink": format!("https://mail.google.com/mail/u/0/#inbox/{}", id),
        }));
    }

    info!("Gmail search found {} messages for query: {}", messages.len(), query);

    Ok(json!({
        "status": "success",
        "query": query,
        "count": messages.len(),
        "messages": messages,
    }))
}

/// Full message with headers, decoded body and labels
pub async fn gmail_get_message(ws: &Workspace, message_id: &str) -> Result<Value> {
    let path = format!("users/me/messages/{}", urlencoding::encode(message_id));
    let path = &path;

    let message = with_auth_retry(&ws.auth, "gmail", "v1", move |svc| async move {
        svc.get_json(path, &[("format", "full".to_string())]).await
    })
    .await?;

    let headers = headers_of(&message);
    let body = extract_body(&message["payload"]);
    info!("Retrieved message {}", message_id);

    Ok(json!({
        "status": "success",
        "id": message["id"],
        "threadId": message["threadId"],
        "subject": headers.get("Subject").copied().unwrap_or("(No Subject)"),
        "from": headers.get("From").copied().unwrap_or("Unknown"),
        "to": headers.get("To").copied().unwrap_or_default(),
        "cc": headers.get("Cc").copied().unwrap_or_default(),
        "date": headers.get("Date").copied().unwrap_or_default(),
        "body": body,
        "labels": message["labelIds"].as_array().cloned().unwrap_or_default(),
    }))
}

/// All labels in the mailbox
pub async fn gmail_list_labels(ws: &Workspace) -> Result<Value> {
    let body = with_auth_retry(&ws.auth, "gmail", "v1", |svc| async move {
        svc.get_json("users/me/labels", &[]).await
    })
    .await?;

    let labels: Vec<Value> = body["labels"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|label| {
            json!({
                "id": label["id"],
                "name": label["name"],
                "type": label["type"].as_str().unwrap_or("user"),
            })
        })
        .collect();

    info!("Listed {} Gmail labels", labels.len());

    Ok(json!({
        "status": "success",
        "count": labels.len(),
        "labels": labels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::testing;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn test_extract_body_prefers_plain_text() {
        let payload = json!({
            "mimeType": "multipart/mixed",
            "parts": [
                {
                    "mimeType": "multipart/alternative",
                    "parts": [
                        {"mimeType": "text/html", "body": {"data": encode("<p>Hi</p>")}},
                        {"mimeType": "text/plain", "body": {"data": encode("Hi there")}}
                    ]
                },
                {"mimeType": "application/pdf", "filename": "a.pdf", "body": {"attachmentId": "x"}}
            ]
        });
        assert_eq!(extract_body(&payload), "Hi there");
    }

    #[test]
    fn test_extract_body_falls_back_to_html() {
        let payload = json!({
            "mimeType": "multipart/alternative",
            "parts": [
                {"mimeType": "text/html", "body": {"data": encode("<b>only html</b>")}}
            ]
        });
        assert_eq!(extract_body(&payload), "<b>only html</b>");
    }

    #[test]
    fn test_extract_body_single_part() {
        let payload = json!({"mimeType": "text/plain", "body": {"data": encode("plain ✓")}});
        assert_eq!(extract_body(&payload), "plain ✓");
        assert_eq!(extract_body(&json!({"mimeType": "text/plain", "body": {"size": 0}})), "");
    }

    #[tokio::test]
    async fn test_gmail_search_fetches_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("q", "is:unread"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "m1", "threadId": "t1"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(query_param("format", "metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "snippet": "Lunch tomorrow?",
                "payload": {"headers": [
                    {"name": "Subject", "value": "Lunch"},
                    {"name": "From", "value": "Ana <ana@example.com>"}
                ]}
            })))
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let result = gmail_search(&ws, "is:unread", 10, false).await.unwrap();

        assert_eq!(result["count"], 1);
        let msg = &result["messages"][0];
        assert_eq!(msg["subject"], "Lunch");
        assert_eq!(msg["from"], "Ana <ana@example.com>");
        assert_eq!(msg["date"], "");
        assert_eq!(msg["webLink"], "https://mail.google.com/mail/u/0/#inbox/m1");
    }

    #[tokio::test]
    async fn test_list_labels_defaults_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "labels": [
                    {"id": "INBOX", "name": "INBOX", "type": "system"},
                    {"id": "Label_1", "name": "Receipts"}
                ]
            })))
            .mount(&server)
            .await;

        let ws = testing::workspace(&server.uri());
        let result = gmail_list_labels(&ws).await.unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(result["labels"][1]["type"], "user");
    }
}
