//! Credential material and the on-disk token format

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::TokenResponse;

/// Read-only scopes requested for every credential
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/calendar.readonly",
    "https://www.googleapis.com/auth/spreadsheets.readonly",
];

/// Extra scope requested for Application Default Credentials
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Google token endpoint
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are treated as expired
const EXPIRY_GRACE_SECS: i64 = 300;

pub(crate) fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// Scopes for the ambient (ADC) credential chain
pub fn ambient_scopes() -> Vec<String> {
    SCOPES
        .iter()
        .copied()
        .chain(std::iter::once(CLOUD_PLATFORM_SCOPE))
        .map(String::from)
        .collect()
}

/// Where a credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// The token file owned by gworkspace
    LocalToken,
    /// Application Default Credentials (gcloud or a service account key)
    Ambient,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::LocalToken => write!(f, "OAuth token"),
            CredentialKind::Ambient => write!(f, "Application Default Credentials"),
        }
    }
}

/// How a credential obtains a fresh access token
#[derive(Clone)]
pub enum Grant {
    RefreshToken {
        token_uri: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        token_uri: String,
        client_email: String,
        private_key: String,
        private_key_id: Option<String>,
    },
}

// Secrets stay out of logs
impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::RefreshToken { token_uri, client_id, .. } => f
                .debug_struct("RefreshToken")
                .field("token_uri", token_uri)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Grant::ServiceAccount { token_uri, client_email, .. } => f
                .debug_struct("ServiceAccount")
                .field("token_uri", token_uri)
                .field("client_email", client_email)
                .finish_non_exhaustive(),
        }
    }
}

/// Bearer-token material with an expiry and an optional refresh grant
#[derive(Clone)]
pub struct Credential {
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub grant: Option<Grant>,
    pub scopes: Vec<String>,
    pub quota_project_id: Option<String>,
    pub kind: CredentialKind,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("has_access_token", &self.access_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("grant", &self.grant)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Credential {
    /// Check if the access token is expired (with a 5 minute grace period)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at < Utc::now() + Duration::seconds(EXPIRY_GRACE_SECS),
            None => false,
        }
    }

    /// A token is present and not expired
    pub fn is_valid(&self) -> bool {
        self.access_token.is_some() && !self.is_expired()
    }

    pub fn can_refresh(&self) -> bool {
        self.grant.is_some()
    }

    /// Apply a token endpoint response in place
    pub fn apply(&mut self, response: TokenResponse) {
        self.access_token = Some(response.access_token);
        self.expires_at = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        // Google may rotate the refresh token
        if let (Some(new_refresh), Some(Grant::RefreshToken { refresh_token, .. })) =
            (response.refresh_token, self.grant.as_mut())
        {
            *refresh_token = new_refresh;
        }
    }

    /// The persisted form of this credential, if it has one
    pub fn to_token_file(&self) -> Option<TokenFile> {
        match &self.grant {
            Some(Grant::RefreshToken {
                token_uri,
                client_id,
                client_secret,
                refresh_token,
            }) => Some(TokenFile {
                token: self.access_token.clone(),
                refresh_token: Some(refresh_token.clone()),
                token_uri: token_uri.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                scopes: self.scopes.clone(),
                expiry: self.expires_at,
            }),
            _ => None,
        }
    }
}

/// The local token file, compatible with google-auth's authorized-user JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFile {
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,

    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    pub client_id: String,

    pub client_secret: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl TokenFile {
    pub fn into_credential(self) -> Credential {
        let grant = self.refresh_token.map(|refresh_token| Grant::RefreshToken {
            token_uri: self.token_uri,
            client_id: self.client_id,
            client_secret: self.client_secret,
            refresh_token,
        });
        let scopes = if self.scopes.is_empty() {
            SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            self.scopes
        };

        Credential {
            access_token: self.token,
            expires_at: self.expiry,
            grant,
            scopes,
            quota_project_id: None,
            kind: CredentialKind::LocalToken,
        }
    }
}
