//! OAuth 2.0 installed-app flow for the local token file

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{TokenFile, TokenResponse, TokenStore, DEFAULT_TOKEN_URI, SCOPES};
use crate::error::{Error, Result};

/// Google consent endpoint
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// How long to wait for the browser to come back
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth client from a `client_secret_*.json` download
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,

    pub client_secret: String,

    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,

    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The console wraps the client in `installed` (desktop) or `web`
#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "OAuth client secret not found at {}. Download a Desktop app client \
                 from the Google Cloud console and pass it with --client-secret",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let file: ClientSecretFile = serde_json::from_str(&contents)?;
        file.installed.or(file.web).ok_or_else(|| {
            Error::Config(format!(
                "{} has neither an \"installed\" nor a \"web\" client",
                path.display()
            ))
        })
    }
}

/// Browser consent, loopback redirect and code exchange
pub struct InstalledAppFlow {
    secret: ClientSecret,
    client: Client,
    scopes: Vec<String>,
}

impl InstalledAppFlow {
    pub fn new(secret: ClientSecret, client: Client) -> Self {
        Self {
            secret,
            client,
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Generate the consent URL for a loopback `redirect_uri`
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let mut url = Url::parse(&self.secret.auth_uri)
            .map_err(|e| Error::OAuth(format!("Invalid auth_uri: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.secret.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url.into())
    }

    /// Exchange an authorization code for a token file
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenFile> {
        info!("Exchanging authorization code for tokens");

        let params = [
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .client
            .post(&self.secret.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Token exchange failed: {} - {}", status, body);
            return Err(Error::OAuth(format!(
                "Token exchange failed: {} - {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        debug!("Token exchange successful");

        let refresh_token = token
            .refresh_token
            .ok_or_else(|| Error::OAuth("No refresh token in response".to_string()))?;

        Ok(TokenFile {
            token: Some(token.access_token),
            refresh_token: Some(refresh_token),
            token_uri: self.secret.token_uri.clone(),
            client_id: self.secret.client_id.clone(),
            client_secret: self.secret.client_secret.clone(),
            scopes: token
                .scope
                .map(|s| s.split_whitespace().map(String::from).collect())
                .unwrap_or_else(|| self.scopes.clone()),
            expiry: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    /// Run the whole flow and persist the result to `store`.
    ///
    /// `show_url` receives the consent URL so the caller can print it in
    /// case the browser does not open.
    pub async fn run(&self, store: &TokenStore, show_url: impl FnOnce(&str)) -> Result<TokenFile> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::OAuth(format!("Failed to start OAuth callback server: {}", e)))?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}/", port);

        let state = uuid::Uuid::new_v4().to_string();
        let auth_url = self.authorization_url(&redirect_uri, &state)?;

        show_url(&auth_url);
        if let Err(e) = open::that(&auth_url) {
            warn!("Failed to open browser automatically: {}", e);
        }

        info!("Waiting for OAuth callback on {}", redirect_uri);

        let code = match tokio::time::timeout(
            CALLBACK_TIMEOUT,
            wait_for_oauth_callback(&listener, &state),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::OAuth(
                    "OAuth timeout: no callback received within 5 minutes".to_string(),
                ))
            }
        };

        let token = self.exchange_code(&code, &redirect_uri).await?;
        store.save(&token)?;
        info!("Saved OAuth token to {}", store.path().display());
        Ok(token)
    }
}

/// Accept one redirect, verify `state` and return the authorization code
pub async fn wait_for_oauth_callback(listener: &TcpListener, expected_state: &str) -> Result<String> {
    let (mut socket, _) = listener
        .accept()
        .await
        .map_err(|e| Error::OAuth(format!("Failed to accept OAuth callback: {}", e)))?;

    let mut request_line = String::new();
    BufReader::new(&mut socket)
        .read_line(&mut request_line)
        .await
        .map_err(|e| Error::OAuth(format!("Failed to read OAuth callback: {}", e)))?;

    let (code, received_state) = match parse_oauth_callback(&request_line) {
        Ok(parsed) => parsed,
        Err(e) => {
            let _ = socket.write_all(html_response("400 Bad Request", &e.to_string()).as_bytes()).await;
            return Err(e);
        }
    };

    if received_state != expected_state {
        let _ = socket
            .write_all(html_response("400 Bad Request", "Error: Invalid state").as_bytes())
            .await;
        return Err(Error::OAuth(
            "OAuth state mismatch - possible CSRF attack".to_string(),
        ));
    }

    let _ = socket
        .write_all(
            html_response(
                "200 OK",
                "Authentication Successful! You can close this window and return to your terminal.",
            )
            .as_bytes(),
        )
        .await;

    Ok(code)
}

fn html_response(status: &str, message: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
         <!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>gworkspace</title></head>\
         <body style=\"font-family: sans-serif; padding: 40px; text-align: center;\">\
         <h1>{}</h1></body></html>",
        status, message
    )
}

/// Extract `(code, state)` from the redirect's request line
/// (`GET /?code=xxx&state=yyy HTTP/1.1`)
pub fn parse_oauth_callback(request_line: &str) -> Result<(String, String)> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::OAuth("Invalid HTTP request".to_string()))?;

    let url = Url::parse("http://127.0.0.1")
        .and_then(|base| base.join(target))
        .map_err(|e| Error::OAuth(format!("Invalid callback URL: {}", e)))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                return Err(Error::OAuth(format!("Authorization denied: {}", value)));
            }
            _ => {}
        }
    }

    let code = code.ok_or_else(|| Error::OAuth("No authorization code in callback".to_string()))?;
    let state = state.ok_or_else(|| Error::OAuth("No state in callback".to_string()))?;
    Ok((code, state))
}
