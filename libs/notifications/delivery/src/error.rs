//! Error types for the delivery pipeline.

use std::time::Duration;
use thiserror::Error;

/// Boxed error used for lookup failures coming from the resource store.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Errors that can occur while resolving, sending or confirming an email.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No sender configuration with the referenced name exists in scope.
    #[error("EmailSenderConfig {0} not found")]
    ConfigNotFound(String),

    /// The sender configuration points at a secret that does not exist.
    #[error("secret {0} not found")]
    CredentialNotFound(String),

    /// The secret exists but carries no token under the expected key.
    #[error("secret {secret} has no {key} entry")]
    CredentialKeyMissing { secret: String, key: &'static str },

    /// The resource store failed for a reason other than absence.
    #[error("failed to get {what}: {source}")]
    Lookup {
        what: &'static str,
        #[source]
        source: BoxError,
    },

    /// `spec.provider` names a provider this build does not know.
    #[error("unsupported email provider")]
    UnsupportedProvider(String),

    /// The provider requires a sending domain and none was configured.
    #[error("provider {0} requires a sending domain")]
    MissingDomain(&'static str),

    /// The provider (or the transport) rejected the send.
    #[error("failed to send email via {provider}: {message}")]
    Send {
        provider: &'static str,
        message: String,
    },

    /// A delivery status query failed.
    #[error("failed to check delivery via {provider}: {message}")]
    Check {
        provider: &'static str,
        message: String,
    },

    /// The provider never confirmed delivery before the deadline.
    #[error("timed out waiting for message delivery")]
    Timeout(Duration),
}

impl DeliveryError {
    /// Wrap a store failure that is not a plain "not found".
    pub fn lookup(what: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Lookup {
            what,
            source: source.into(),
        }
    }

    /// Short, stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "config_not_found",
            Self::CredentialNotFound(_) | Self::CredentialKeyMissing { .. } => {
                "credential_not_found"
            }
            Self::Lookup { .. } => "lookup",
            Self::UnsupportedProvider(_) => "unsupported_provider",
            Self::MissingDomain(_) => "missing_domain",
            Self::Send { .. } => "send",
            Self::Check { .. } => "check",
            Self::Timeout(_) => "timeout",
        }
    }
}
