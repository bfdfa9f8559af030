//! Credential sources: the local token file and Application Default Credentials
//!
//! A source never fails the resolver. Anything that keeps it from producing a
//! usable credential (missing file, malformed JSON, rejected refresh) is
//! reported as [`SourceOutcome::Unavailable`] and the resolver moves on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::credential::{ambient_scopes, default_token_uri, Credential, CredentialKind, Grant};
use super::endpoint::TokenEndpoint;
use super::store::TokenStore;
use crate::error::{Error, Result};

/// Environment variable naming an ADC file
pub const ADC_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// What a source produced
#[derive(Debug)]
pub enum SourceOutcome {
    Ready(Credential),
    Unavailable(String),
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn kind(&self) -> CredentialKind;

    /// Whether the source has anything on disk to try. No network.
    fn is_present(&self) -> bool;

    /// Load the credential, refreshing it when expired
    async fn load(&self) -> SourceOutcome;
}

/// The token file written by `gworkspace setup --oauth`
pub struct LocalTokenSource {
    store: TokenStore,
    endpoint: Arc<dyn TokenEndpoint>,
}

impl LocalTokenSource {
    pub fn new(store: TokenStore, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self { store, endpoint }
    }
}

#[async_trait]
impl CredentialSource for LocalTokenSource {
    fn kind(&self) -> CredentialKind {
        CredentialKind::LocalToken
    }

    fn is_present(&self) -> bool {
        self.store.exists()
    }

    async fn load(&self) -> SourceOutcome {
        let file = match self.store.load() {
            Ok(Some(file)) => file,
            Ok(None) => {
                return SourceOutcome::Unavailable(format!(
                    "no token file at {}",
                    self.store.path().display()
                ))
            }
            Err(e) => {
                warn!("Ignoring unreadable token file: {}", e);
                return SourceOutcome::Unavailable(e.to_string());
            }
        };

        let mut credential = file.into_credential();
        if credential.is_valid() {
            debug!("Local token is valid");
            return SourceOutcome::Ready(credential);
        }

        let Some(grant) = credential.grant.clone() else {
            return SourceOutcome::Unavailable(
                "local token expired and has no refresh token".to_string(),
            );
        };

        match self.endpoint.refresh(&grant, &credential.scopes).await {
            Ok(response) => {
                credential.apply(response);
                if let Some(file) = credential.to_token_file() {
                    if let Err(e) = self.store.save(&file) {
                        warn!("Refreshed token could not be saved: {}", e);
                    }
                }
                info!("Refreshed local OAuth token");
                SourceOutcome::Ready(credential)
            }
            Err(e) => {
                warn!("Local token refresh failed: {}", e);
                SourceOutcome::Unavailable(format!("refresh failed: {}", e))
            }
        }
    }
}

/// Application Default Credentials file contents
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdcFile {
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
        #[serde(default)]
        quota_project_id: Option<String>,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        private_key_id: Option<String>,
        #[serde(default = "default_token_uri")]
        token_uri: String,
        #[serde(default)]
        quota_project_id: Option<String>,
    },
}

impl AdcFile {
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!("Unsupported credentials file {:?}: {}", path, e))
        })
    }

    pub fn quota_project_id(&self) -> Option<&str> {
        match self {
            AdcFile::AuthorizedUser { quota_project_id, .. }
            | AdcFile::ServiceAccount { quota_project_id, .. } => quota_project_id.as_deref(),
        }
    }

    pub fn into_credential(self) -> Credential {
        let quota_project_id = self.quota_project_id().map(String::from);
        let grant = match self {
            AdcFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
                ..
            } => Grant::RefreshToken {
                token_uri,
                client_id,
                client_secret,
                refresh_token,
            },
            AdcFile::ServiceAccount {
                client_email,
                private_key,
                private_key_id,
                token_uri,
                ..
            } => Grant::ServiceAccount {
                token_uri,
                client_email,
                private_key,
                private_key_id,
            },
        };

        Credential {
            access_token: None,
            expires_at: None,
            grant: Some(grant),
            scopes: ambient_scopes(),
            quota_project_id,
            kind: CredentialKind::Ambient,
        }
    }
}

/// The gcloud well-known ADC location
pub fn well_known_adc_path() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var_os("APPDATA").map(|appdata| {
            PathBuf::from(appdata)
                .join("gcloud")
                .join("application_default_credentials.json")
        })
    }
    #[cfg(not(windows))]
    {
        dirs::home_dir().map(|home| {
            home.join(".config")
                .join("gcloud")
                .join("application_default_credentials.json")
        })
    }
}

/// The ADC file that would be used: configured path, then
/// `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud location
pub fn locate_adc_file(path_override: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = path_override {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(ADC_ENV_VAR).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    well_known_adc_path()
}

/// Application Default Credentials, refreshed in memory only
pub struct AmbientSource {
    path_override: Option<PathBuf>,
    endpoint: Arc<dyn TokenEndpoint>,
}

impl AmbientSource {
    pub fn new(path_override: Option<PathBuf>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            path_override,
            endpoint,
        }
    }

    pub fn locate(&self) -> Option<PathBuf> {
        locate_adc_file(self.path_override.as_deref())
    }
}

#[async_trait]
impl CredentialSource for AmbientSource {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Ambient
    }

    fn is_present(&self) -> bool {
        self.locate().is_some_and(|path| path.is_file())
    }

    async fn load(&self) -> SourceOutcome {
        let Some(path) = self.locate().filter(|path| path.is_file()) else {
            return SourceOutcome::Unavailable(
                "no application default credentials found".to_string(),
            );
        };

        let adc = match AdcFile::read(&path) {
            Ok(adc) => adc,
            Err(e) => {
                warn!("Ignoring application default credentials: {}", e);
                return SourceOutcome::Unavailable(e.to_string());
            }
        };

        let mut credential = adc.into_credential();
        let Some(grant) = credential.grant.clone() else {
            return SourceOutcome::Unavailable("credentials carry no grant".to_string());
        };

        match self.endpoint.refresh(&grant, &credential.scopes).await {
            Ok(response) => {
                credential.apply(response);
                info!("Using application default credentials from {:?}", path);
                SourceOutcome::Ready(credential)
            }
            Err(e) => {
                warn!("Application default credentials refresh failed: {}", e);
                SourceOutcome::Unavailable(format!("refresh failed: {}", e))
            }
        }
    }
}
