//! Delivery providers.
//!
//! Every provider exposes the same two capabilities: send a message and
//! ask whether a previously sent message has been delivered. Which
//! implementation backs a sender configuration is decided in exactly one
//! place, [`HttpProviderFactory::build`].

pub mod mailersend;
pub mod mailgun;
pub mod mock;

pub use mailersend::MailerSendProvider;
pub use mailgun::MailgunProvider;
pub use mock::ScriptedProvider;

use crate::error::DeliveryResult;
use crate::models::{Credential, OutgoingEmail, ProviderKind, SenderConfig};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Answer of a single delivery status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCheck {
    Delivered,
    NotYetDelivered,
}

/// Send + confirm contract implemented by every provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> ProviderKind;

    /// Submit the message once and return the provider's message id.
    ///
    /// Implementations never retry internally.
    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult<String>;

    /// Ask whether the message with the given id has been delivered.
    ///
    /// "No record yet" is `NotYetDelivered`, not an error.
    async fn check_delivered(&self, message_id: &str) -> DeliveryResult<DeliveryCheck>;
}

/// Turns a resolved sender configuration into a provider for one attempt.
#[cfg_attr(test, mockall::automock)]
pub trait ProviderFactory: Send + Sync {
    fn build(
        &self,
        config: &SenderConfig,
        credential: Credential,
    ) -> DeliveryResult<Box<dyn DeliveryProvider>>;
}

/// API base URLs, overridable for regional endpoints and local fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub mailersend: String,
    pub mailgun: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            mailersend: mailersend::DEFAULT_API_URL.to_string(),
            mailgun: mailgun::DEFAULT_API_URL.to_string(),
        }
    }
}

/// Builds the real HTTP providers, sharing one connection pool between attempts.
#[derive(Debug, Clone)]
pub struct HttpProviderFactory {
    client: Client,
    endpoints: ProviderEndpoints,
}

impl HttpProviderFactory {
    pub fn new(endpoints: ProviderEndpoints) -> Self {
        Self::with_client(Client::new(), endpoints)
    }

    pub fn with_client(client: Client, endpoints: ProviderEndpoints) -> Self {
        Self { client, endpoints }
    }
}

impl Default for HttpProviderFactory {
    fn default() -> Self {
        Self::new(ProviderEndpoints::default())
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(
        &self,
        config: &SenderConfig,
        credential: Credential,
    ) -> DeliveryResult<Box<dyn DeliveryProvider>> {
        let kind = ProviderKind::parse(&config.provider)?;
        debug!(config = %config.name, provider = %kind, "Building delivery provider");

        let provider: Box<dyn DeliveryProvider> = match kind {
            ProviderKind::Mailersend => Box::new(MailerSendProvider::new(
                self.client.clone(),
                &self.endpoints.mailersend,
                credential,
            )),
            ProviderKind::Mailgun => Box::new(MailgunProvider::new(
                self.client.clone(),
                &self.endpoints.mailgun,
                config.domain.as_deref(),
                credential,
            )?),
        };

        Ok(provider)
    }
}

/// Trim trailing slashes so paths can be joined with `format!`.
pub(crate) fn base_url(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;

    fn config(provider: &str, domain: Option<&str>) -> SenderConfig {
        SenderConfig {
            name: "cfg1".to_string(),
            provider: provider.to_string(),
            sender_email: "x@y.com".to_string(),
            domain: domain.map(str::to_string),
            credential_ref: "api-token".to_string(),
        }
    }

    #[test]
    fn test_factory_builds_each_kind() {
        let factory = HttpProviderFactory::default();

        let provider = factory
            .build(&config("mailersend", None), Credential::new("token"))
            .unwrap();
        assert_eq!(provider.kind(), ProviderKind::Mailersend);

        let provider = factory
            .build(&config("mailgun", Some("mg.example.com")), Credential::new("key"))
            .unwrap();
        assert_eq!(provider.kind(), ProviderKind::Mailgun);
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let factory = HttpProviderFactory::default();
        let err = factory
            .build(&config("unknown", None), Credential::new("token"))
            .err()
            .unwrap();
        assert!(matches!(err, DeliveryError::UnsupportedProvider(_)));
        assert_eq!(err.to_string(), "unsupported email provider");
    }

    #[test]
    fn test_factory_requires_mailgun_domain() {
        let factory = HttpProviderFactory::default();
        let err = factory
            .build(&config("mailgun", Some("  ")), Credential::new("key"))
            .err()
            .unwrap();
        assert!(matches!(err, DeliveryError::MissingDomain("mailgun")));
    }

    #[test]
    fn test_base_url_trims_slashes() {
        assert_eq!(base_url("http://localhost:8080/v3/"), "http://localhost:8080/v3");
    }
}
