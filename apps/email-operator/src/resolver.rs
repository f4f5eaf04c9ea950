//! Sender configuration lookup against the cluster.

use crate::crd::EmailSenderConfig;
use async_trait::async_trait;
use email_delivery::{
    ConfigResolver, Credential, DeliveryError, DeliveryResult, ResolvedSender, API_TOKEN_KEY,
};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::debug;

/// Reads `EmailSenderConfig` and `Secret` objects from the Email's namespace.
///
/// Nothing is cached, so rotated tokens are picked up on the next reconcile.
#[derive(Clone)]
pub struct KubeConfigResolver {
    client: Client,
}

impl KubeConfigResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigResolver for KubeConfigResolver {
    async fn resolve(&self, config_ref: &str, namespace: &str) -> DeliveryResult<ResolvedSender> {
        let configs: Api<EmailSenderConfig> = Api::namespaced(self.client.clone(), namespace);
        let resource = configs
            .get_opt(config_ref)
            .await
            .map_err(|e| DeliveryError::lookup("EmailSenderConfig", e))?
            .ok_or_else(|| DeliveryError::ConfigNotFound(config_ref.to_string()))?;
        let config = resource.spec.to_sender_config(config_ref);

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get_opt(&config.credential_ref)
            .await
            .map_err(|e| DeliveryError::lookup("secret", e))?
            .ok_or_else(|| DeliveryError::CredentialNotFound(config.credential_ref.clone()))?;
        let credential = credential_from_secret(&config.credential_ref, &secret)?;

        debug!(config = %config_ref, provider = %config.provider, "Resolved sender configuration");
        Ok(ResolvedSender { config, credential })
    }
}

/// Extract the API token stored under [`API_TOKEN_KEY`].
pub fn credential_from_secret(name: &str, secret: &Secret) -> DeliveryResult<Credential> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(API_TOKEN_KEY))
        .map(|bytes| Credential::from_bytes(&bytes.0))
        .ok_or_else(|| DeliveryError::CredentialKeyMissing {
            secret: name.to_string(),
            key: API_TOKEN_KEY,
        })
}
