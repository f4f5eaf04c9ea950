//! Scripted provider for tests and local runs without provider credentials.

use super::{DeliveryCheck, DeliveryProvider, ProviderFactory};
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{Credential, OutgoingEmail, ProviderKind, SenderConfig};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted answer for one `check_delivered` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedCheck {
    Delivered,
    NotYetDelivered,
    Fail(String),
}

#[derive(Debug, Default)]
struct Script {
    send_failure: Option<String>,
    message_id: String,
    checks: VecDeque<ScriptedCheck>,
    sent: Vec<OutgoingEmail>,
    check_calls: usize,
}

/// Provider that replays a fixed script and records what it was asked to do.
///
/// Once the scripted checks run out every further check answers
/// `NotYetDelivered`. Clones share the same script and call log.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    kind: ProviderKind,
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    /// Provider that accepts sends under `message_id`
    pub fn accepting(kind: ProviderKind, message_id: impl Into<String>) -> Self {
        Self {
            kind,
            script: Arc::new(Mutex::new(Script {
                message_id: message_id.into(),
                ..Script::default()
            })),
        }
    }

    /// Provider whose sends always fail
    pub fn failing(kind: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            script: Arc::new(Mutex::new(Script {
                send_failure: Some(message.into()),
                ..Script::default()
            })),
        }
    }

    /// Append answers for subsequent `check_delivered` calls
    pub fn with_checks(self, checks: impl IntoIterator<Item = ScriptedCheck>) -> Self {
        self.lock().checks.extend(checks);
        self
    }

    /// Messages passed to `send`, including rejected ones
    pub fn sent_emails(&self) -> Vec<OutgoingEmail> {
        self.lock().sent.clone()
    }

    pub fn send_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn check_count(&self) -> usize {
        self.lock().check_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panicking test thread must not hide the log from the assertions that follow.
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DeliveryProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn send(&self, email: &OutgoingEmail) -> DeliveryResult<String> {
        let mut script = self.lock();
        script.sent.push(email.clone());
        match &script.send_failure {
            Some(message) => Err(DeliveryError::Send {
                provider: self.kind.as_str(),
                message: message.clone(),
            }),
            None => Ok(script.message_id.clone()),
        }
    }

    async fn check_delivered(&self, _message_id: &str) -> DeliveryResult<DeliveryCheck> {
        let mut script = self.lock();
        script.check_calls += 1;
        match script.checks.pop_front() {
            Some(ScriptedCheck::Delivered) => Ok(DeliveryCheck::Delivered),
            Some(ScriptedCheck::Fail(message)) => Err(DeliveryError::Check {
                provider: self.kind.as_str(),
                message,
            }),
            Some(ScriptedCheck::NotYetDelivered) | None => Ok(DeliveryCheck::NotYetDelivered),
        }
    }
}

/// Factory handing out one shared [`ScriptedProvider`].
///
/// Provider names are still validated, so unknown kinds fail exactly as
/// they do with the HTTP factory. Built providers report the configured
/// kind; the script itself is shared.
#[derive(Debug, Clone)]
pub struct ScriptedProviderFactory {
    provider: ScriptedProvider,
    built: Arc<Mutex<Vec<(ProviderKind, Credential)>>>,
}

impl ScriptedProviderFactory {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self {
            provider,
            built: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn provider(&self) -> &ScriptedProvider {
        &self.provider
    }

    /// Kinds and credentials the factory was asked to build, in order
    pub fn built(&self) -> Vec<(ProviderKind, Credential)> {
        self.built
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ProviderFactory for ScriptedProviderFactory {
    fn build(
        &self,
        config: &SenderConfig,
        credential: Credential,
    ) -> DeliveryResult<Box<dyn DeliveryProvider>> {
        let kind = ProviderKind::parse(&config.provider)?;
        self.built
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((kind, credential));

        let mut provider = self.provider.clone();
        provider.kind = kind;
        Ok(Box::new(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutgoingEmail {
        OutgoingEmail::new("x@y.com", "a@b.com", "Hi", "Hello")
    }

    #[tokio::test]
    async fn test_scripted_provider_replays_checks() {
        let provider = ScriptedProvider::accepting(ProviderKind::Mailersend, "m-123")
            .with_checks([ScriptedCheck::NotYetDelivered, ScriptedCheck::Delivered]);

        assert_eq!(provider.send(&email()).await.unwrap(), "m-123");
        assert_eq!(
            provider.check_delivered("m-123").await.unwrap(),
            DeliveryCheck::NotYetDelivered
        );
        assert_eq!(
            provider.check_delivered("m-123").await.unwrap(),
            DeliveryCheck::Delivered
        );
        assert_eq!(
            provider.check_delivered("m-123").await.unwrap(),
            DeliveryCheck::NotYetDelivered
        );
        assert_eq!(provider.check_count(), 3);
        assert_eq!(provider.sent_emails()[0].to, "a@b.com");
    }

    #[tokio::test]
    async fn test_scripted_provider_fails_send() {
        let provider = ScriptedProvider::failing(ProviderKind::Mailgun, "Simulated failure");

        let err = provider.send(&email()).await.unwrap_err();
        assert!(err.to_string().contains("Simulated failure"));
        assert_eq!(provider.send_count(), 1);
    }

    #[test]
    fn test_scripted_factory_validates_kind() {
        let factory =
            ScriptedProviderFactory::new(ScriptedProvider::accepting(ProviderKind::Mailersend, "m-1"));
        let config = SenderConfig {
            name: "cfg1".to_string(),
            provider: "unknown".to_string(),
            sender_email: "x@y.com".to_string(),
            domain: None,
            credential_ref: "token".to_string(),
        };

        let err = factory.build(&config, Credential::new("t")).err().unwrap();
        assert!(matches!(err, DeliveryError::UnsupportedProvider(_)));
        assert!(factory.built().is_empty());
    }
}
