//! Domain model shared by the resolver, the providers and the confirmation engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::DeliveryError;

/// Email delivery services this crate can talk to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    /// Token-authenticated API with a direct status lookup.
    Mailersend,
    /// Domain-scoped API confirmed through the event log.
    Mailgun,
}

impl ProviderKind {
    /// Parse the free-form `spec.provider` value of a sender configuration.
    pub fn parse(raw: &str) -> Result<Self, DeliveryError> {
        Self::from_str(raw.trim()).map_err(|_| DeliveryError::UnsupportedProvider(raw.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Resolved sender configuration, detached from its storage representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Name the configuration was looked up by.
    pub name: String,
    /// Raw provider name, validated when the provider is built.
    pub provider: String,
    pub sender_email: String,
    /// Sending domain; only Mailgun requires one.
    pub domain: Option<String>,
    /// Name of the secret holding the API token.
    pub credential_ref: String,
}

/// Opaque API token for one delivery attempt.
///
/// Moved into the provider built for the attempt and dropped with it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Decode secret bytes; a trailing newline from `kubectl create secret --from-file` is dropped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(String::from_utf8_lossy(bytes).trim_end_matches(['\r', '\n']).to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Provider-neutral message assembled from a send request and its sender configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl OutgoingEmail {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
        }
    }
}

/// Delivery status as written to `status.deliveryStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum DeliveryStatus {
    /// Schema value for an object not attempted yet; attempts only ever
    /// produce `Delivered` or `Failed`.
    Pending,
    Delivered,
    Failed,
}

/// Terminal result of one delivery attempt.
///
/// `error` is non-empty exactly when `status` is `Failed`. A non-empty
/// `message_id` means the provider accepted the send, even when
/// confirmation later failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub message_id: String,
    pub error: String,
}

impl DeliveryOutcome {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            status: DeliveryStatus::Delivered,
            message_id: message_id.into(),
            error: String::new(),
        }
    }

    /// A failed outcome; the error text is never empty.
    pub fn failed(message_id: Option<String>, error: &DeliveryError) -> Self {
        let mut text = error.to_string();
        if text.is_empty() {
            text = error.kind().to_string();
        }
        Self {
            status: DeliveryStatus::Failed,
            message_id: message_id.unwrap_or_default(),
            error: text,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("mailersend").unwrap(), ProviderKind::Mailersend);
        assert_eq!(ProviderKind::parse(" MailGun ").unwrap(), ProviderKind::Mailgun);
        assert_eq!(ProviderKind::Mailgun.to_string(), "mailgun");
        assert_eq!(ProviderKind::Mailersend.as_str(), "mailersend");
    }

    #[test]
    fn test_provider_kind_unknown() {
        let err = ProviderKind::parse("unknown").unwrap_err();
        assert!(matches!(err, DeliveryError::UnsupportedProvider(ref raw) if raw == "unknown"));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("mlsn.super-secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.expose(), "mlsn.super-secret");
    }

    #[test]
    fn test_credential_from_secret_bytes() {
        assert_eq!(Credential::from_bytes(b"key-123\n").expose(), "key-123");
    }

    #[test]
    fn test_failed_outcome_keeps_accepted_id() {
        let err = DeliveryError::Timeout(std::time::Duration::from_secs(60));
        let outcome = DeliveryOutcome::failed(Some("m-123".to_string()), &err);
        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.message_id, "m-123");
        assert_eq!(outcome.error, "timed out waiting for message delivery");
    }

    #[test]
    fn test_delivered_outcome_has_no_error() {
        let outcome = DeliveryOutcome::delivered("m-123");
        assert!(outcome.is_delivered());
        assert!(outcome.error.is_empty());
        assert_eq!(outcome.status.to_string(), "Delivered");
    }

    #[test]
    fn test_status_labels_match_schema() {
        assert_eq!(DeliveryStatus::Pending.to_string(), "Pending");
        assert_eq!(DeliveryStatus::Failed.to_string(), "Failed");
        assert_eq!("Delivered".parse::<DeliveryStatus>().unwrap(), DeliveryStatus::Delivered);
    }
}
