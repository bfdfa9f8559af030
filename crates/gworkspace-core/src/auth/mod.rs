//! Credential resolution and the service-handle cache
//!
//! Credentials come from two sources, tried in a fixed order:
//!
//! 1. the local OAuth token file (`~/.config/gworkspace/token.json`), refreshed
//!    and re-saved with owner-only permissions when expired;
//! 2. Application Default Credentials, refreshed in memory only.
//!
//! The resolved credential and every handle built from it are cached until
//! [`WorkspaceAuth::clear_cache`] is called.

mod credential;
mod endpoint;
mod retry;
mod sources;
mod store;

pub use credential::{
    ambient_scopes, Credential, CredentialKind, Grant, TokenFile, CLOUD_PLATFORM_SCOPE,
    DEFAULT_TOKEN_URI, SCOPES,
};
pub use endpoint::{GoogleTokenEndpoint, TokenEndpoint, TokenResponse};
pub use retry::{with_auth_retry, with_auth_retry_if};
pub use sources::{
    locate_adc_file, well_known_adc_path, AdcFile, AmbientSource, CredentialSource,
    LocalTokenSource, SourceOutcome, ADC_ENV_VAR,
};
pub use store::{write_private, TokenStore};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::google::{ApiClient, ServiceHandle};

/// Resolves credentials and caches the handles built from them
pub struct WorkspaceAuth {
    sources: Vec<Arc<dyn CredentialSource>>,
    client: ApiClient,
    credential: Mutex<Option<Credential>>,
    services: Mutex<HashMap<String, Arc<ServiceHandle>>>,
}

impl WorkspaceAuth {
    /// `sources` are tried in order; the first ready credential wins
    pub fn new(sources: Vec<Arc<dyn CredentialSource>>, client: ApiClient) -> Self {
        Self {
            sources,
            client,
            credential: Mutex::new(None),
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Local token file first, then Application Default Credentials
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = ApiClient::from_config(config)?;
        let endpoint: Arc<dyn TokenEndpoint> =
            Arc::new(GoogleTokenEndpoint::new(client.http().clone()));

        let sources: Vec<Arc<dyn CredentialSource>> = vec![
            Arc::new(LocalTokenSource::new(
                TokenStore::new(&config.auth.token_file),
                endpoint.clone(),
            )),
            Arc::new(AmbientSource::new(config.auth.adc_file.clone(), endpoint)),
        ];

        Ok(Self::new(sources, client))
    }

    /// Return the active credential, resolving it from the sources when
    /// there is none or it is no longer valid
    pub async fn get_credentials(&self) -> Result<Credential> {
        let cached = self.credential.lock().clone();
        if let Some(credential) = cached.filter(Credential::is_valid) {
            return Ok(credential);
        }

        for source in &self.sources {
            match source.load().await {
                SourceOutcome::Ready(credential) => {
                    info!("Authenticated with {}", credential.kind);
                    *self.credential.lock() = Some(credential.clone());
                    // Handles built from the old credential are stale
                    self.services.lock().clear();
                    return Ok(credential);
                }
                SourceOutcome::Unavailable(reason) => {
                    debug!("{} unavailable: {}", source.kind(), reason);
                }
            }
        }

        *self.credential.lock() = None;
        Err(Error::not_configured())
    }

    /// Return the cached handle for `(api, version)`, building it on a miss
    pub async fn get_service(&self, api: &str, version: &str) -> Result<Arc<ServiceHandle>> {
        let key = format!("{}_{}", api, version);
        if let Some(handle) = self.services.lock().get(&key).cloned() {
            return Ok(handle);
        }

        let credential = self.get_credentials().await?;
        let handle = Arc::new(self.client.build_handle(api, version, &credential)?);
        debug!("Built {} handle", key);
        self.services.lock().insert(key, handle.clone());
        Ok(handle)
    }

    /// Drop every cached handle and the active credential
    pub fn clear_cache(&self) {
        self.services.lock().clear();
        *self.credential.lock() = None;
        info!("Cleared credential and service cache");
    }

    pub fn has_local_token(&self) -> bool {
        self.has_source(CredentialKind::LocalToken)
    }

    pub fn has_ambient(&self) -> bool {
        self.has_source(CredentialKind::Ambient)
    }

    fn has_source(&self, kind: CredentialKind) -> bool {
        self.sources
            .iter()
            .any(|source| source.kind() == kind && source.is_present())
    }

    /// Whether any source currently yields a usable credential
    pub async fn is_authenticated(&self) -> bool {
        self.get_credentials().await.is_ok()
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}
