use email_delivery::{BoxError, DeliveryError};
use thiserror::Error;

/// Errors returned from a reconcile pass.
///
/// Any of these makes the controller requeue the object.
#[derive(Debug, Error)]
pub enum Error {
    /// Resolution, send or confirmation failed. The `Failed` status has
    /// already been written.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("failed to update Email status: {0}")]
    StatusPersist(#[source] BoxError),

    #[error("failed to get Email: {0}")]
    Fetch(#[source] BoxError),

    #[error("Email {0} has no namespace")]
    MissingNamespace(String),
}

impl Error {
    /// Label for `email_operator_reconcile_errors_total`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delivery(e) => e.kind(),
            Self::StatusPersist(_) => "status_persist",
            Self::Fetch(_) => "fetch",
            Self::MissingNamespace(_) => "missing_namespace",
        }
    }

    /// Whether a prompt retry can succeed without anyone editing objects.
    ///
    /// Timeouts and check failures happen after the provider accepted the
    /// message, so they count as not transient: retrying them resends.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Delivery(e) => matches!(e, DeliveryError::Lookup { .. } | DeliveryError::Send { .. }),
            Self::StatusPersist(_) | Self::Fetch(_) => true,
            Self::MissingNamespace(_) => false,
        }
    }
}
