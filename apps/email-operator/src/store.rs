//! Access to `Email` objects and their status subresource.

use crate::crd::{Email, EmailStatus};
use async_trait::async_trait;
use email_delivery::BoxError;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

/// Field manager recorded on status patches
pub const FIELD_MANAGER: &str = "email-operator";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailStore: Send + Sync {
    /// Fetch the latest version of an `Email`; `None` once it is deleted
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Email>, BoxError>;

    /// Overwrite the status subresource of an `Email`
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EmailStatus,
    ) -> Result<(), BoxError>;
}

/// `EmailStore` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeEmailStore {
    client: Client,
}

impl KubeEmailStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Email> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl EmailStore for KubeEmailStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Email>, BoxError> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EmailStatus,
    ) -> Result<(), BoxError> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };
        self.api(namespace)
            .patch_status(name, &params, &Patch::Merge(status.merge_patch()))
            .await?;
        Ok(())
    }
}
