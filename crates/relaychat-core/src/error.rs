//! Error taxonomy shared by every relaychat component.
//!
//! Variants map one-to-one onto the HTTP-equivalent statuses the outer
//! transport layer returns. Missing rows and rows owned by another user both
//! surface as [`CoreError::NotFound`] so callers cannot distinguish
//! "does not exist" from "not yours".

use thiserror::Error;

/// Convenience alias used across the crate.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity missing or not owned by the caller.
    #[error("{what} not found")]
    NotFound { what: &'static str },

    /// Request payload rejected before any work happened.
    #[error("{0}")]
    Validation(String),

    /// Feature explicitly not supported (e.g. streaming completions).
    #[error("{0}")]
    NotImplemented(String),

    /// The caller has not set up what the operation needs.
    #[error("{0}")]
    ConfigurationMissing(String),

    /// Provider transport failure, non-2xx status, or malformed response.
    #[error("upstream error from {provider}: {detail}")]
    Upstream {
        provider: String,
        status: Option<u16>,
        detail: String,
    },

    /// Encryption or decryption failed. Callers holding a row whose secret
    /// fails to decrypt treat this as "key unusable", not a crash.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Record store failure.
    #[error("store failure: {0}")]
    Store(String),
}

impl CoreError {
    pub fn not_found(what: &'static str) -> Self {
        Self::NotFound { what }
    }

    /// HTTP-equivalent status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) => 400,
            Self::NotImplemented(_) => 501,
            Self::ConfigurationMissing(_) => 400,
            Self::Upstream { .. } => 502,
            Self::Crypto(_) => 500,
            Self::Store(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CoreError::not_found("chat").status_code(), 404);
        assert_eq!(CoreError::Validation("bad".into()).status_code(), 400);
        assert_eq!(
            CoreError::NotImplemented("streaming".into()).status_code(),
            501
        );
        assert_eq!(
            CoreError::Upstream {
                provider: "openai".into(),
                status: Some(500),
                detail: "boom".into(),
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn test_not_found_message_hides_ownership() {
        let err = CoreError::not_found("chat");
        assert_eq!(err.to_string(), "chat not found");
    }
}
