//! Handler error types.

use gatehouse_config::ConfigError;
use gatehouse_rules::RuleError;
use thiserror::Error;

/// Result type for handler operations.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors raised while building or running the handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Invalid handler configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A vhost's rules or headers failed to compile.
    #[error("vhost {vhost}: {source}")]
    Rules {
        /// Virtual host.
        vhost: String,
        /// Compilation error.
        #[source]
        source: RuleError,
    },

    /// No session with this id.
    #[error("session not found")]
    SessionNotFound,

    /// Session exists but is no longer valid.
    #[error("session expired: {reason}")]
    SessionExpired {
        /// Which limit was exceeded.
        reason: &'static str,
    },

    /// Session store failure.
    #[error("session store error: {message}")]
    Store {
        /// Error message.
        message: String,
    },

    /// Portal session creation failure.
    #[error("portal error: {message}")]
    Portal {
        /// Error message.
        message: String,
    },

    /// Encryption or decryption failure.
    #[error("cipher error: {message}")]
    Cipher {
        /// Error message.
        message: String,
    },

    /// Remote policy fetch or parse failure.
    #[error("remote policy for {vhost}: {message}")]
    RemotePolicy {
        /// Virtual host.
        vhost: String,
        /// Error message.
        message: String,
    },

    /// A collaborator did not answer in time.
    #[error("{operation} timed out")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
    },
}

impl HandlerError {
    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a portal error.
    pub fn portal(message: impl Into<String>) -> Self {
        Self::Portal {
            message: message.into(),
        }
    }

    /// Create a cipher error.
    pub fn cipher(message: impl Into<String>) -> Self {
        Self::Cipher {
            message: message.into(),
        }
    }

    /// Create a remote policy error.
    pub fn remote_policy(vhost: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemotePolicy {
            vhost: vhost.into(),
            message: message.into(),
        }
    }

    /// Whether the session is missing or invalid rather than unreachable.
    pub const fn is_session_miss(&self) -> bool {
        matches!(self, Self::SessionNotFound | Self::SessionExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HandlerError::store("connection refused");
        assert_eq!(err.to_string(), "session store error: connection refused");

        let err = HandlerError::Timeout {
            operation: "session lookup",
        };
        assert_eq!(err.to_string(), "session lookup timed out");

        let err = HandlerError::remote_policy("app.example.com", "status 500");
        assert!(err.to_string().contains("app.example.com"));
    }

    #[test]
    fn test_session_miss() {
        assert!(HandlerError::SessionNotFound.is_session_miss());
        assert!(HandlerError::SessionExpired { reason: "timeout" }.is_session_miss());
        assert!(!HandlerError::store("down").is_session_miss());
    }
}
