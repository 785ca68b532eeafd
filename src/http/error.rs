//! Classification of failed forge requests.

use reqwest::StatusCode;
use thiserror::Error;

/// A failed request against the forge API.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// HTTP 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 401 or 403
    #[error("Authentication failed for {0}. Check FORGE_TOKEN.")]
    Auth(String),

    /// Network failure, timeout, any other non-2xx status, or an undecodable body.
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

impl ForgeError {
    pub fn transport(url: &str, message: impl std::fmt::Display) -> Self {
        ForgeError::Transport {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ForgeError::NotFound(_))
    }

    /// Short label used when logging per-package failures.
    pub fn kind(&self) -> &'static str {
        match self {
            ForgeError::NotFound(_) => "not found",
            ForgeError::Auth(_) => "unauthorized",
            ForgeError::Transport { .. } => "transport",
        }
    }
}

/// Maps a status code to the taxonomy. Success codes map to `None`.
pub fn classify_status(url: &str, status: StatusCode) -> Option<ForgeError> {
    match status {
        s if s.is_success() => None,
        StatusCode::NOT_FOUND => Some(ForgeError::NotFound(url.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(ForgeError::Auth(url.to_string()))
        }
        s => Some(ForgeError::transport(url, format!("HTTP {}", s.as_u16()))),
    }
}

/// Converts a reqwest error into the taxonomy, using its status when present.
pub fn classify_error(url: &str, error: reqwest::Error) -> ForgeError {
    if let Some(status) = error.status()
        && let Some(classified) = classify_status(url, status)
    {
        return classified;
    }

    if error.is_timeout() {
        return ForgeError::transport(url, "request timed out");
    }

    ForgeError::transport(url, error)
}
