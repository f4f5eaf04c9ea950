//! MailerSend provider.
//!
//! Sends through the HTTP API and confirms delivery by looking the message
//! up directly: `GET /messages/{id}` lists the per-recipient email records,
//! and a record with status `delivered` confirms the send.

use super::{base_url, DeliveryCheck, DeliveryProvider};
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{Credential, OutgoingEmail, ProviderKind};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// MailerSend API base URL
pub const DEFAULT_API_URL: &str = "https://api.mailersend.com/v1";

/// Response header carrying the id of an accepted message
const MESSAGE_ID_HEADER: &str = "X-Message-Id";

/// Status label MailerSend uses once the receiving server accepted the message
const DELIVERED_STATUS: &str = "delivered";

const PROVIDER: &str = "mailersend";

/// MailerSend email provider
pub struct MailerSendProvider {
    client: Client,
    api_url: String,
    api_token: Credential,
}

impl MailerSendProvider {
    pub fn new(client: Client, api_url: &str, api_token: Credential) -> Self {
        Self {
            client,
            api_url: base_url(api_url),
            api_token,
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_token.expose())
    }
}

/// MailerSend send payload
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    name: &'a str,
}

/// `GET /messages/{id}` response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    data: MessageData,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[serde(default)]
    emails: Vec<EmailRecord>,
}

#[derive(Debug, Deserialize)]
struct EmailRecord {
    #[serde(default)]
    status: String,
}

impl MessageResponse {
    fn is_delivered(&self) -> bool {
        self.data
            .emails
            .iter()
            .any(|record| record.status.eq_ignore_ascii_case(DELIVERED_STATUS))
    }
}

/// Map a rejected send to an error, keeping the provider's explanation.
async fn send_error(response: Response) -> DeliveryError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(status = %status, error = %body, "MailerSend API error");

    let message = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "authentication failed".to_string(),
        StatusCode::TOO_MANY_REQUESTS => "rate limit exceeded".to_string(),
        _ => format!("HTTP {}: {}", status, body),
    };
    DeliveryError::Send {
        provider: PROVIDER,
        message,
    }
}

#[async_trait]
impl DeliveryProvider for MailerSendProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mailersend
    }

    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult<String> {
        let request = SendRequest {
            from: Address {
                email: &email.from,
                name: &email.from,
            },
            to: vec![Address {
                email: &email.to,
                name: &email.to,
            }],
            subject: &email.subject,
            text: &email.text,
        };

        debug!(to = %email.to, subject = %email.subject, "Sending email via MailerSend");

        let response = self
            .client
            .post(format!("{}/email", self.api_url))
            .header("Authorization", self.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Send {
                provider: PROVIDER,
                message: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(send_error(response).await);
        }

        let message_id = response
            .headers()
            .get(MESSAGE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DeliveryError::Send {
                provider: PROVIDER,
                message: format!("response carried no {} header", MESSAGE_ID_HEADER),
            })?;

        debug!(message_id = %message_id, "MailerSend accepted the message");
        Ok(message_id)
    }

    async fn check_delivered(&self, message_id: &str) -> DeliveryResult<DeliveryCheck> {
        let check_error = |message: String| DeliveryError::Check {
            provider: PROVIDER,
            message,
        };

        let response = self
            .client
            .get(format!("{}/messages/{}", self.api_url, message_id))
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| check_error(format!("request failed: {}", e)))?;

        let status = response.status();
        // The message record shows up a little after the send is accepted.
        if status == StatusCode::NOT_FOUND {
            debug!(message_id = %message_id, "MailerSend has no record of the message yet");
            return Ok(DeliveryCheck::NotYetDelivered);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(check_error(format!("HTTP {}: {}", status, body)));
        }

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| check_error(format!("invalid response body: {}", e)))?;

        if message.is_delivered() {
            Ok(DeliveryCheck::Delivered)
        } else {
            Ok(DeliveryCheck::NotYetDelivered)
        }
    }
}
