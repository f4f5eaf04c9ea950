//! Credential/config resolution.
//!
//! A send request names a sender configuration; the configuration names the
//! secret holding the API token. Resolution follows both hops and fails with
//! a distinct error for each missing link.

use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{Credential, SenderConfig};
use async_trait::async_trait;
use std::collections::HashMap;

/// Key under which the API token is stored in a credential secret
pub const API_TOKEN_KEY: &str = "apiToken";

/// Sender configuration together with the credential it references.
#[derive(Debug, Clone)]
pub struct ResolvedSender {
    pub config: SenderConfig,
    pub credential: Credential,
}

/// Pure lookup of a sender configuration and its credential within a namespace.
///
/// Implementations must not cache the credential: every call reads it anew.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigResolver: Send + Sync {
    async fn resolve(&self, config_ref: &str, namespace: &str) -> DeliveryResult<ResolvedSender>;
}

/// In-memory resolver for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    configs: HashMap<(String, String), SenderConfig>,
    secrets: HashMap<(String, String), HashMap<String, Vec<u8>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender configuration under its name in `namespace`
    pub fn with_config(mut self, namespace: &str, config: SenderConfig) -> Self {
        self.configs
            .insert((namespace.to_string(), config.name.clone()), config);
        self
    }

    /// Register a secret holding `token` under [`API_TOKEN_KEY`]
    pub fn with_token(self, namespace: &str, secret: &str, token: &str) -> Self {
        self.with_secret(
            namespace,
            secret,
            HashMap::from([(API_TOKEN_KEY.to_string(), token.as_bytes().to_vec())]),
        )
    }

    /// Register a secret with arbitrary entries
    pub fn with_secret(
        mut self,
        namespace: &str,
        secret: &str,
        data: HashMap<String, Vec<u8>>,
    ) -> Self {
        self.secrets
            .insert((namespace.to_string(), secret.to_string()), data);
        self
    }
}

#[async_trait]
impl ConfigResolver for StaticResolver {
    async fn resolve(&self, config_ref: &str, namespace: &str) -> DeliveryResult<ResolvedSender> {
        let config = self
            .configs
            .get(&(namespace.to_string(), config_ref.to_string()))
            .cloned()
            .ok_or_else(|| DeliveryError::ConfigNotFound(config_ref.to_string()))?;

        let secret = self
            .secrets
            .get(&(namespace.to_string(), config.credential_ref.clone()))
            .ok_or_else(|| DeliveryError::CredentialNotFound(config.credential_ref.clone()))?;

        let token = secret
            .get(API_TOKEN_KEY)
            .ok_or_else(|| DeliveryError::CredentialKeyMissing {
                secret: config.credential_ref.clone(),
                key: API_TOKEN_KEY,
            })?;

        Ok(ResolvedSender {
            credential: Credential::from_bytes(token),
            config,
        })
    }
}
