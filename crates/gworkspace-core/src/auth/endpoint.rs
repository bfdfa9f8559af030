//! Token endpoint calls for refresh-token and service-account grants

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::credential::Grant;
use crate::error::{Error, Result};

/// Lifetime requested for service-account assertions
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Response from the Google token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// JWT claims for the service-account grant
#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges a grant for a fresh access token
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, grant: &Grant, scopes: &[String]) -> Result<TokenResponse>;
}

/// The real Google OAuth 2.0 token endpoint
pub struct GoogleTokenEndpoint {
    client: Client,
}

impl GoogleTokenEndpoint {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn post_form(&self, token_uri: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.client.post(token_uri).form(params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Token refresh failed: {} - {}", status, body);
            return Err(Error::TokenRefreshFailed {
                reason: format!("{} - {}", status, body),
            });
        }

        let token_response: TokenResponse = response.json().await?;
        debug!("Token refresh successful");
        Ok(token_response)
    }

    fn service_account_assertion(
        client_email: &str,
        private_key: &str,
        private_key_id: Option<&str>,
        token_uri: &str,
        scopes: &[String],
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            iss: client_email,
            scope: scopes.join(" "),
            aud: token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = private_key_id.map(String::from);

        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())?;
        Ok(encode(&header, &claims, &key)?)
    }
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn refresh(&self, grant: &Grant, scopes: &[String]) -> Result<TokenResponse> {
        match grant {
            Grant::RefreshToken {
                token_uri,
                client_id,
                client_secret,
                refresh_token,
            } => {
                debug!("Refreshing access token via refresh_token grant");
                let params = [
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("refresh_token", refresh_token.as_str()),
                    ("grant_type", "refresh_token"),
                ];
                self.post_form(token_uri, &params).await
            }
            Grant::ServiceAccount {
                token_uri,
                client_email,
                private_key,
                private_key_id,
            } => {
                debug!("Requesting access token for service account {}", client_email);
                let assertion = Self::service_account_assertion(
                    client_email,
                    private_key,
                    private_key_id.as_deref(),
                    token_uri,
                    scopes,
                )?;
                let params = [
                    ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                    ("assertion", assertion.as_str()),
                ];
                self.post_form(token_uri, &params).await
            }
        }
    }
}
