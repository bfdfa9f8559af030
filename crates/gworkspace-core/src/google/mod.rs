//! Google API handles and the read-only Workspace tools built on them

pub mod calendar;
pub mod drive;
pub mod gmail;
mod rate_limiter;
pub mod sheets;

pub use rate_limiter::ApiRateLimiter;

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use self::calendar::TimezoneResolver;
use crate::auth::{Credential, CredentialKind, WorkspaceAuth};
use crate::config::Config;
use crate::error::{Error, Result};

/// Query string parameters for a Google API call
pub type Params<'a> = [(&'a str, String)];

/// Resolves `(api, version)` to a base URL
#[derive(Debug, Clone, Default)]
pub struct ApiEndpoints {
    root_url: Option<String>,
}

impl ApiEndpoints {
    /// With a root override, every API is served from `<root>/<api>/<version>`
    pub fn new(root_url: Option<String>) -> Self {
        Self {
            root_url: root_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn base_url(&self, api: &str, version: &str) -> Result<String> {
        if let Some(root) = &self.root_url {
            return Ok(format!("{}/{}/{}", root, api, version));
        }

        let base = match (api, version) {
            ("drive", "v3") => "https://www.googleapis.com/drive/v3",
            ("gmail", "v1") => "https://gmail.googleapis.com/gmail/v1",
            ("calendar", "v3") => "https://www.googleapis.com/calendar/v3",
            ("sheets", "v4") => "https://sheets.googleapis.com/v4",
            _ => {
                return Err(Error::UnknownApi {
                    name: api.to_string(),
                    version: version.to_string(),
                })
            }
        };
        Ok(base.to_string())
    }
}

/// Builds service handles from credentials
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    endpoints: ApiEndpoints,
    limiter: ApiRateLimiter,
}

impl ApiClient {
    pub fn new(http: Client, endpoints: ApiEndpoints, limiter: ApiRateLimiter) -> Self {
        Self {
            http,
            endpoints,
            limiter,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()?;
        Ok(Self::new(
            http,
            ApiEndpoints::new(config.api.root_url.clone()),
            ApiRateLimiter::new(config.api.rate_limit_per_second),
        ))
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Bind a new handle to `credential`
    pub fn build_handle(
        &self,
        api: &str,
        version: &str,
        credential: &Credential,
    ) -> Result<ServiceHandle> {
        let access_token = credential
            .access_token
            .clone()
            .ok_or_else(|| Error::Authentication("credential has no access token".to_string()))?;

        Ok(ServiceHandle {
            api: api.to_string(),
            version: version.to_string(),
            base_url: self.endpoints.base_url(api, version)?,
            access_token,
            quota_project_id: credential.quota_project_id.clone(),
            credential_kind: credential.kind,
            http: self.http.clone(),
            limiter: self.limiter.clone(),
        })
    }
}

/// An authenticated client for one (api, version) pair.
///
/// Immutable once built; a credential change replaces handles rather than
/// updating them.
pub struct ServiceHandle {
    api: String,
    version: String,
    base_url: String,
    access_token: String,
    quota_project_id: Option<String>,
    credential_kind: CredentialKind,
    http: Client,
    limiter: ApiRateLimiter,
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("api", &self.api)
            .field("version", &self.version)
            .field("base_url", &self.base_url)
            .field("credential_kind", &self.credential_kind)
            .finish_non_exhaustive()
    }
}

impl ServiceHandle {
    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credential_kind(&self) -> CredentialKind {
        self.credential_kind
    }

    /// GET `<base>/<path>` and parse the JSON body
    pub async fn get_json(&self, path: &str, params: &Params<'_>) -> Result<Value> {
        let response = self.send(path, params).await?;
        Ok(response.json().await?)
    }

    /// GET `<base>/<path>` and return the body as text
    pub async fn get_text(&self, path: &str, params: &Params<'_>) -> Result<String> {
        let response = self.send(path, params).await?;
        Ok(response.text().await?)
    }

    async fn send(&self, path: &str, params: &Params<'_>) -> Result<reqwest::Response> {
        self.limiter.wait().await;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("GET {} {}", self.api, path);

        let mut request = self.http.get(&url).bearer_auth(&self.access_token).query(params);
        if let Some(project) = &self.quota_project_id {
            request = request.header("x-goog-user-project", project);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }
        Ok(response)
    }
}

/// Prefer the message from Google's JSON error envelope
fn api_error(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });
    Error::Api { status, message }
}

/// Everything a tool needs: credentials, handle cache and timezone cache
pub struct Workspace {
    pub auth: WorkspaceAuth,
    pub timezone: TimezoneResolver,
}

impl Workspace {
    pub fn new(auth: WorkspaceAuth) -> Self {
        Self {
            auth,
            timezone: TimezoneResolver::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(WorkspaceAuth::from_config(config)?))
    }
}
