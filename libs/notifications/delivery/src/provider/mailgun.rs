//! Mailgun provider.
//!
//! Sends are scoped to a sending domain and bounded by a hard request
//! timeout. Delivery is confirmed through the events API: a `delivered`
//! event for the message id means the message reached the recipient.

use super::{base_url, DeliveryCheck, DeliveryProvider};
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{Credential, OutgoingEmail, ProviderKind};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

/// Mailgun API base URL (US region)
pub const DEFAULT_API_URL: &str = "https://api.mailgun.net/v3";

/// Hard cap on a single send request
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size for the events query
const EVENTS_LIMIT: &str = "100";

const PROVIDER: &str = "mailgun";

/// Mailgun email provider
pub struct MailgunProvider {
    client: Client,
    api_url: String,
    domain: String,
    api_key: Credential,
}

impl MailgunProvider {
    /// Fails with `MissingDomain` when no sending domain is configured.
    pub fn new(
        client: Client,
        api_url: &str,
        domain: Option<&str>,
        api_key: Credential,
    ) -> DeliveryResult<Self> {
        let domain = domain
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(DeliveryError::MissingDomain(PROVIDER))?;

        Ok(Self {
            client,
            api_url: base_url(api_url),
            domain: domain.to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.api_url, self.domain, path)
    }
}

/// `POST /{domain}/messages` response
#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// `GET /{domain}/events` response
#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// Mailgun wraps message ids in angle brackets (`<id@domain>`).
pub(crate) fn trim_message_id(raw: &str) -> String {
    raw.trim().trim_matches(|c| c == '<' || c == '>').to_string()
}

#[async_trait]
impl DeliveryProvider for MailgunProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mailgun
    }

    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult<String> {
        let send_error = |message: String| DeliveryError::Send {
            provider: PROVIDER,
            message,
        };

        let form = [
            ("from", email.from.as_str()),
            ("to", email.to.as_str()),
            ("subject", email.subject.as_str()),
            ("text", email.text.as_str()),
        ];

        debug!(
            to = %email.to,
            subject = %email.subject,
            domain = %self.domain,
            "Sending email via Mailgun"
        );

        let response = self
            .client
            .post(self.url("messages"))
            .basic_auth("api", Some(self.api_key.expose()))
            .form(&form)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    send_error(format!("request timed out after {:?}", SEND_TIMEOUT))
                } else {
                    send_error(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %body, "Mailgun API error");
            return Err(send_error(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    "authentication failed".to_string()
                }
                StatusCode::TOO_MANY_REQUESTS => "rate limit exceeded".to_string(),
                _ => format!("HTTP {}: {}", status, body),
            }));
        }

        let accepted: SendResponse = response
            .json()
            .await
            .map_err(|e| send_error(format!("invalid response body: {}", e)))?;

        let message_id = trim_message_id(&accepted.id);
        if message_id.is_empty() {
            return Err(send_error("response carried an empty message id".to_string()));
        }

        debug!(message_id = %message_id, "Mailgun accepted the message");
        Ok(message_id)
    }

    async fn check_delivered(&self, message_id: &str) -> DeliveryResult<DeliveryCheck> {
        let check_error = |message: String| DeliveryError::Check {
            provider: PROVIDER,
            message,
        };

        let response = self
            .client
            .get(self.url("events"))
            .basic_auth("api", Some(self.api_key.expose()))
            .query(&[
                ("message-id", message_id),
                ("event", "delivered"),
                ("limit", EVENTS_LIMIT),
            ])
            .send()
            .await
            .map_err(|e| check_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(check_error(format!("HTTP {}: {}", status, body)));
        }

        let events: EventsResponse = response
            .json()
            .await
            .map_err(|e| check_error(format!("invalid response body: {}", e)))?;

        if events.items.is_empty() {
            Ok(DeliveryCheck::NotYetDelivered)
        } else {
            Ok(DeliveryCheck::Delivered)
        }
    }
}
