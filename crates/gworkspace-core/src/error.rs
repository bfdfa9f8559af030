//! Error types for gworkspace

use thiserror::Error;

/// Result type alias using gworkspace's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gworkspace
#[derive(Error, Debug)]
pub enum Error {
    // Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Token refresh failed: {reason}")]
    TokenRefreshFailed { reason: String },

    #[error("Token storage error: {0}")]
    Token(String),

    // Google API errors
    #[error("Google API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unknown Google API: {name} {version}")]
    UnknownApi { name: String, version: String },

    // MCP errors
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// The error returned when neither credential source is usable
    pub fn not_configured() -> Self {
        Error::Authentication("authentication not configured; run `gworkspace setup`".to_string())
    }

    /// Returns true for HTTP 401/403 responses from a Google API
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Api { status: 401 | 403, .. })
    }

    /// Returns true if the user needs to run setup again
    pub fn requires_setup(&self) -> bool {
        matches!(
            self,
            Error::Authentication(_) | Error::TokenRefreshFailed { .. }
        )
    }

    /// Returns an error code suitable for MCP error responses
    pub fn mcp_code(&self) -> &'static str {
        match self {
            Error::Authentication(_) | Error::TokenRefreshFailed { .. } | Error::OAuth(_) => {
                "AUTH_REQUIRED"
            }
            Error::Api { status: 401 | 403, .. } => "PERMISSION_DENIED",
            Error::Api { status: 404, .. } => "NOT_FOUND",
            Error::Api { status: 429, .. } => "RATE_LIMITED",
            Error::Api { .. } | Error::Http(_) => "API_ERROR",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::ToolNotFound(_) => "TOOL_NOT_FOUND",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Returns a user-friendly action message for recoverable errors
    pub fn action_hint(&self) -> Option<&'static str> {
        match self {
            Error::Authentication(_) | Error::TokenRefreshFailed { .. } => {
                Some("Run `gworkspace setup` to authenticate")
            }
            Error::Api { status: 403, .. } => {
                Some("Check that the API is enabled and the granted scopes are sufficient")
            }
            Error::Api { status: 429, .. } => Some("Please wait and try again"),
            Error::Http(_) => Some("Check your network connection"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_classification() {
        let unauthorized = Error::Api { status: 401, message: "Invalid Credentials".into() };
        let forbidden = Error::Api { status: 403, message: "Forbidden".into() };
        let not_found = Error::Api { status: 404, message: "File not found".into() };

        assert!(unauthorized.is_auth_failure());
        assert!(forbidden.is_auth_failure());
        assert!(!not_found.is_auth_failure());
        assert!(!Error::not_configured().is_auth_failure());
    }

    #[test]
    fn test_not_configured_mentions_setup() {
        let err = Error::not_configured();
        assert!(err.requires_setup());
        assert!(err.to_string().contains("authentication not configured"));
        assert!(err.to_string().contains("setup"));
        assert_eq!(err.mcp_code(), "AUTH_REQUIRED");
    }
}
