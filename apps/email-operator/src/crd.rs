//! Custom resources served under `email.example.com/v1`.

use chrono::{DateTime, SecondsFormat, Utc};
use email_delivery::{DeliveryOutcome, DeliveryStatus, SenderConfig};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Desired state: send one email.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "email.example.com",
    version = "v1",
    kind = "Email",
    namespaced,
    status = "EmailStatus",
    shortname = "em",
    printcolumn = r#"{"name":"Recipient","type":"string","jsonPath":".spec.recipientEmail"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.deliveryStatus"}"#,
    printcolumn = r#"{"name":"MessageID","type":"string","jsonPath":".status.messageId"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EmailSpec {
    /// Name of the `EmailSenderConfig` in the same namespace
    pub sender_config_ref: String,
    pub recipient_email: String,
    pub subject: String,
    pub body: String,
}

/// Observed state of an `Email`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailStatus {
    /// `Delivered` or `Failed` once an attempt finished
    #[serde(default)]
    pub delivery_status: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// `metadata.generation` the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// RFC 3339 time of the delivery attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_time: Option<String>,
}

impl EmailStatus {
    pub fn from_outcome(
        outcome: &DeliveryOutcome,
        generation: Option<i64>,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            delivery_status: outcome.status.to_string(),
            message_id: outcome.message_id.clone(),
            error: outcome.error.clone(),
            observed_generation: generation,
            last_attempt_time: Some(attempted_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.delivery_status == DeliveryStatus::Delivered.to_string()
    }

    /// JSON merge patch for the status subresource.
    ///
    /// Empty fields are sent as `null` so a stale error from an earlier
    /// attempt is removed rather than left behind.
    pub fn merge_patch(&self) -> Value {
        let error = if self.error.is_empty() {
            Value::Null
        } else {
            Value::String(self.error.clone())
        };
        json!({
            "status": {
                "deliveryStatus": self.delivery_status,
                "messageId": self.message_id,
                "error": error,
                "observedGeneration": self.observed_generation,
                "lastAttemptTime": self.last_attempt_time,
            }
        })
    }
}

impl Email {
    pub fn current_status(&self) -> Option<&EmailStatus> {
        self.status.as_ref()
    }
}

/// Reusable provider and sender identity.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "email.example.com",
    version = "v1",
    kind = "EmailSenderConfig",
    namespaced,
    shortname = "esc",
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Sender","type":"string","jsonPath":".spec.senderEmail"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EmailSenderConfigSpec {
    /// `mailersend` or `mailgun`
    pub provider: String,
    pub sender_email: String,
    /// Sending domain, required by Mailgun
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Secret holding the API token under `apiToken`
    pub api_token_secret_ref: String,
}

impl EmailSenderConfigSpec {
    pub fn to_sender_config(&self, name: &str) -> SenderConfig {
        SenderConfig {
            name: name.to_string(),
            provider: self.provider.clone(),
            sender_email: self.sender_email.clone(),
            domain: self.domain.clone().filter(|d| !d.trim().is_empty()),
            credential_ref: self.api_token_secret_ref.clone(),
        }
    }
}
