//! Reconciliation of `Email` objects.
//!
//! ```text
//! watch Email (generation changes only)
//!   ↓
//! reconcile: re-read → resolve sender → build provider → send + confirm
//!   ↓
//! status subresource (Delivered | Failed)
//! ```

use crate::config::OperatorConfig;
use crate::crd::{Email, EmailStatus};
use crate::error::Error;
use crate::resolver::KubeConfigResolver;
use crate::store::{EmailStore, KubeEmailStore};
use chrono::Utc;
use email_delivery::{
    metrics, ConfigResolver, ConfirmationEngine, DeliveryFailure, DeliveryOutcome,
    HttpProviderFactory, OutgoingEmail, ProviderFactory,
};
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::{predicates, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Knobs that change what a reconcile does, as opposed to how it talks to
/// the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub skip_delivered: bool,
    /// Requeue delay after a transient error
    pub error_requeue: Duration,
    /// Requeue delay after any other error
    pub permanent_error_requeue: Duration,
}

impl From<&OperatorConfig> for ReconcileSettings {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            skip_delivered: config.skip_delivered,
            error_requeue: config.error_requeue,
            permanent_error_requeue: config.permanent_error_requeue,
        }
    }
}

/// Shared state handed to every reconcile.
pub struct Context {
    pub emails: Arc<dyn EmailStore>,
    pub resolver: Arc<dyn ConfigResolver>,
    pub providers: Arc<dyn ProviderFactory>,
    pub engine: ConfirmationEngine,
    pub settings: ReconcileSettings,
}

impl Context {
    pub fn new(
        emails: Arc<dyn EmailStore>,
        resolver: Arc<dyn ConfigResolver>,
        providers: Arc<dyn ProviderFactory>,
        engine: ConfirmationEngine,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            emails,
            resolver,
            providers,
            engine,
            settings,
        }
    }

    /// Context talking to the cluster and the real provider APIs.
    pub fn from_client(client: Client, config: &OperatorConfig) -> Self {
        Self::new(
            Arc::new(KubeEmailStore::new(client.clone())),
            Arc::new(KubeConfigResolver::new(client)),
            Arc::new(HttpProviderFactory::new(config.endpoints.clone())),
            ConfirmationEngine::new(config.confirmation),
            ReconcileSettings::from(config),
        )
    }

    async fn reconcile_email(&self, email: &Email) -> Result<Action, Error> {
        let name = email.name_any();
        let namespace = email
            .namespace()
            .ok_or_else(|| Error::MissingNamespace(name.clone()))?;

        // The cached object may be stale; act on what the API server has now.
        let Some(email) = self.emails.get(&namespace, &name).await.map_err(Error::Fetch)? else {
            debug!("Email no longer exists");
            return Ok(Action::await_change());
        };

        let generation = email.metadata.generation;
        if generation == Some(1) {
            info!(recipient = %email.spec.recipient_email, "Created new Email");
        } else {
            info!(?generation, "Updated existing Email");
        }

        if self.settings.skip_delivered {
            if let Some(current) = email.current_status().filter(|s| s.is_delivered()) {
                info!(message_id = %current.message_id, "Email already delivered, not resending");
                let status = EmailStatus {
                    observed_generation: generation,
                    ..current.clone()
                };
                self.persist(&namespace, &name, &status).await?;
                return Ok(Action::await_change());
            }
        }

        let (outcome, result) = match self.attempt(&email, &namespace).await {
            Ok(message_id) => (DeliveryOutcome::delivered(message_id), Ok(())),
            Err(failure) => (failure.outcome(), Err(failure.error)),
        };

        let status = EmailStatus::from_outcome(&outcome, generation, Utc::now());
        self.persist(&namespace, &name, &status).await?;

        match result {
            Ok(()) => Ok(Action::await_change()),
            Err(e) => Err(Error::Delivery(e)),
        }
    }

    async fn attempt(&self, email: &Email, namespace: &str) -> Result<String, DeliveryFailure> {
        let resolved = self
            .resolver
            .resolve(&email.spec.sender_config_ref, namespace)
            .await
            .inspect_err(|e| warn!(error = %e, config = %email.spec.sender_config_ref, "Failed to resolve sender configuration"))?;

        let outgoing = OutgoingEmail::new(
            &resolved.config.sender_email,
            &email.spec.recipient_email,
            &email.spec.subject,
            &email.spec.body,
        );
        let provider = self
            .providers
            .build(&resolved.config, resolved.credential)
            .inspect_err(|e| warn!(error = %e, provider = %resolved.config.provider, "Failed to build provider"))?;

        match self.engine.deliver(provider.as_ref(), &outgoing).await {
            Ok(message_id) => {
                info!(
                    message_id = %message_id,
                    delivery_status = "Delivered",
                    subject = %outgoing.subject,
                    from = %outgoing.from,
                    to = %outgoing.to,
                    "Email sent successfully"
                );
                Ok(message_id)
            }
            Err(failure) => {
                warn!(
                    error = %failure.error,
                    message_id = failure.message_id.as_deref().unwrap_or_default(),
                    provider = %provider.kind(),
                    "Email delivery failed"
                );
                Err(failure)
            }
        }
    }

    async fn persist(&self, namespace: &str, name: &str, status: &EmailStatus) -> Result<(), Error> {
        self.emails
            .patch_status(namespace, name, status)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to update Email status");
                Error::StatusPersist(e)
            })
    }
}

/// Reconcile one `Email`.
///
/// Runs the whole attempt inline, so the call can take up to the
/// confirmation timeout plus one poll interval and one check timeout.
#[instrument(skip_all, fields(namespace = %email.namespace().unwrap_or_default(), name = %email.name_any()))]
pub async fn reconcile(email: Arc<Email>, ctx: Arc<Context>) -> Result<Action, Error> {
    ctx.reconcile_email(&email).await
}

/// Requeue after a failed reconcile.
///
/// Transient errors come back after `error_requeue`; the rest wait for
/// `permanent_error_requeue` or an edit, whichever comes first.
pub fn error_policy(email: Arc<Email>, error: &Error, ctx: Arc<Context>) -> Action {
    let delay = if error.is_transient() {
        ctx.settings.error_requeue
    } else {
        ctx.settings.permanent_error_requeue
    };
    warn!(
        namespace = %email.namespace().unwrap_or_default(),
        name = %email.name_any(),
        error = %error,
        kind = error.kind(),
        requeue_after = ?delay,
        "Reconcile failed, requeueing"
    );
    metrics::reconcile_failed(error.kind());
    Action::requeue(delay)
}

/// Watch `Email` objects and reconcile them until SIGINT/SIGTERM.
///
/// Status-only updates do not change `metadata.generation` and are filtered
/// out before they reach the controller, so writing status never triggers
/// another send.
pub async fn run(client: Client, config: &OperatorConfig, ctx: Arc<Context>) {
    let emails: Api<Email> = match &config.watch_namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    let (reader, writer) = reflector::store();
    let stream = watcher(emails, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    info!(namespace = ?config.watch_namespace, "Starting Email controller");

    Controller::for_stream(stream, reader)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(email = %object, "Reconciled"),
                Err(e) => debug!(error = %e, "Reconcile did not complete"),
            }
        })
        .await;

    info!("Email controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::EmailSpec;
    use crate::store::MockEmailStore;
    use email_delivery::{
        ConfirmationPolicy, DeliveryError, ProviderKind, ScriptedCheck, ScriptedProvider,
        ScriptedProviderFactory, SenderConfig, StaticResolver,
    };
    use std::sync::Mutex;

    const NS: &str = "default";

    fn email(generation: i64) -> Email {
        let mut email = Email::new(
            "welcome",
            EmailSpec {
                sender_config_ref: "cfg1".to_string(),
                recipient_email: "a@b.com".to_string(),
                subject: "Hi".to_string(),
                body: "Hello".to_string(),
            },
        );
        email.metadata.namespace = Some(NS.to_string());
        email.metadata.generation = Some(generation);
        email
    }

    fn sender(provider: &str) -> SenderConfig {
        SenderConfig {
            name: "cfg1".to_string(),
            provider: provider.to_string(),
            sender_email: "x@y.com".to_string(),
            domain: None,
            credential_ref: "mailersend-token".to_string(),
        }
    }

    fn resolver(provider: &str) -> StaticResolver {
        StaticResolver::new()
            .with_config(NS, sender(provider))
            .with_token(NS, "mailersend-token", "tok-1")
    }

    /// Store returning `current` on get and recording every status patch.
    fn recording_store(
        current: Option<Email>,
        patch_result: fn() -> Result<(), email_delivery::BoxError>,
    ) -> (MockEmailStore, Arc<Mutex<Vec<EmailStatus>>>) {
        let patches = Arc::new(Mutex::new(Vec::new()));
        let mut store = MockEmailStore::new();
        store.expect_get().returning(move |namespace, name| {
            assert_eq!((namespace, name), (NS, "welcome"));
            Ok(current.clone())
        });
        let recorded = patches.clone();
        store.expect_patch_status().returning(move |_, _, status| {
            recorded.lock().unwrap().push(status.clone());
            patch_result()
        });
        (store, patches)
    }

    fn patch_ok() -> Result<(), email_delivery::BoxError> {
        Ok(())
    }

    fn patch_conflict() -> Result<(), email_delivery::BoxError> {
        Err("the object has been modified".into())
    }

    fn context(
        store: MockEmailStore,
        resolver: StaticResolver,
        factory: &ScriptedProviderFactory,
        skip_delivered: bool,
    ) -> Arc<Context> {
        Arc::new(Context::new(
            Arc::new(store),
            Arc::new(resolver),
            Arc::new(factory.clone()),
            ConfirmationEngine::new(ConfirmationPolicy::default()),
            ReconcileSettings {
                skip_delivered,
                error_requeue: Duration::from_secs(15),
                permanent_error_requeue: Duration::from_secs(300),
            },
        ))
    }

    fn accepting(checks: Vec<ScriptedCheck>) -> ScriptedProviderFactory {
        ScriptedProviderFactory::new(
            ScriptedProvider::accepting(ProviderKind::Mailersend, "m-123").with_checks(checks),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_on_first_check() {
        let (store, patches) = recording_store(Some(email(1)), patch_ok);
        let factory = accepting(vec![ScriptedCheck::Delivered]);
        let ctx = context(store, resolver("mailersend"), &factory, false);

        let action = reconcile(Arc::new(email(1)), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        let patches = patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].delivery_status, "Delivered");
        assert_eq!(patches[0].message_id, "m-123");
        assert!(patches[0].error.is_empty());
        assert_eq!(patches[0].observed_generation, Some(1));

        let sent = factory.provider().sent_emails();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "x@y.com");
        assert_eq!(sent[0].to, "a@b.com");
        assert_eq!(sent[0].subject, "Hi");
        assert_eq!(sent[0].text, "Hello");
        assert_eq!(factory.built()[0].1.expose(), "tok-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_provider_fails_without_sending() {
        let (store, patches) = recording_store(Some(email(1)), patch_ok);
        let factory = accepting(vec![ScriptedCheck::Delivered]);
        let ctx = context(store, resolver("sendgrid"), &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::Delivery(DeliveryError::UnsupportedProvider(_))));
        let patches = patches.lock().unwrap();
        assert_eq!(patches[0].delivery_status, "Failed");
        assert_eq!(patches[0].error, "unsupported email provider");
        assert!(patches[0].message_id.is_empty());
        assert_eq!(factory.provider().send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sender_config() {
        let (store, patches) = recording_store(Some(email(1)), patch_ok);
        let factory = accepting(vec![]);
        let ctx = context(store, StaticResolver::new(), &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::Delivery(DeliveryError::ConfigNotFound(_))));
        assert_eq!(patches.lock().unwrap()[0].error, "EmailSenderConfig cfg1 not found");
        assert!(factory.built().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_secret_has_its_own_message() {
        let (store, patches) = recording_store(Some(email(1)), patch_ok);
        let factory = accepting(vec![]);
        let resolver = StaticResolver::new().with_config(NS, sender("mailersend"));
        let ctx = context(store, resolver, &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::Delivery(DeliveryError::CredentialNotFound(_))));
        assert_eq!(patches.lock().unwrap()[0].error, "secret mailersend-token not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_skips_confirmation() {
        let (store, patches) = recording_store(Some(email(1)), patch_ok);
        let factory = ScriptedProviderFactory::new(ScriptedProvider::failing(
            ProviderKind::Mailersend,
            "authentication failed",
        ));
        let ctx = context(store, resolver("mailersend"), &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::Delivery(DeliveryError::Send { .. })));
        assert_eq!(factory.provider().check_count(), 0);
        let patches = patches.lock().unwrap();
        assert_eq!(patches[0].delivery_status, "Failed");
        assert!(patches[0].error.contains("authentication failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_accepted_message_id() {
        let (store, patches) = recording_store(Some(email(1)), patch_ok);
        let factory = accepting(vec![]);
        let ctx = context(store, resolver("mailersend"), &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::Delivery(DeliveryError::Timeout(_))));
        assert_eq!(factory.provider().check_count(), 12);
        let patches = patches.lock().unwrap();
        assert_eq!(patches[0].delivery_status, "Failed");
        assert_eq!(patches[0].message_id, "m-123");
        assert_eq!(patches[0].error, "timed out waiting for message delivery");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_email_is_a_noop() {
        let (store, patches) = recording_store(None, patch_ok);
        let factory = accepting(vec![ScriptedCheck::Delivered]);
        let ctx = context(store, resolver("mailersend"), &factory, false);

        let action = reconcile(Arc::new(email(1)), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(patches.lock().unwrap().is_empty());
        assert_eq!(factory.provider().send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_write_failure_after_delivery() {
        let (store, _) = recording_store(Some(email(1)), patch_conflict);
        let factory = accepting(vec![ScriptedCheck::Delivered]);
        let ctx = context(store, resolver("mailersend"), &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::StatusPersist(_)));
        assert_eq!(factory.provider().send_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_write_failure_wins_over_delivery_error() {
        let (store, _) = recording_store(Some(email(1)), patch_conflict);
        let factory = accepting(vec![]);
        let ctx = context(store, StaticResolver::new(), &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::StatusPersist(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_does_not_touch_status() {
        let mut store = MockEmailStore::new();
        store
            .expect_get()
            .returning(|_, _| Err("connection refused".into()));
        store.expect_patch_status().never();
        let factory = accepting(vec![]);
        let ctx = context(store, resolver("mailersend"), &factory, false);

        let err = reconcile(Arc::new(email(1)), ctx).await.unwrap_err();

        assert!(matches!(err, Error::Fetch(_)));
        assert_eq!(factory.provider().send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_namespace() {
        let mut store = MockEmailStore::new();
        store.expect_get().never();
        let factory = accepting(vec![]);
        let ctx = context(store, resolver("mailersend"), &factory, false);
        let mut object = email(1);
        object.metadata.namespace = None;

        let err = reconcile(Arc::new(object), ctx).await.unwrap_err();

        assert!(matches!(err, Error::MissingNamespace(ref name) if name == "welcome"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_resends_by_default() {
        let mut current = email(2);
        current.status = Some(EmailStatus {
            delivery_status: "Delivered".to_string(),
            message_id: "m-001".to_string(),
            ..EmailStatus::default()
        });
        let (store, patches) = recording_store(Some(current), patch_ok);
        let factory = accepting(vec![ScriptedCheck::Delivered]);
        let ctx = context(store, resolver("mailersend"), &factory, false);

        reconcile(Arc::new(email(2)), ctx).await.unwrap();

        assert_eq!(factory.provider().send_count(), 1);
        assert_eq!(patches.lock().unwrap()[0].message_id, "m-123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_delivered_only_records_generation() {
        let mut current = email(3);
        current.status = Some(EmailStatus {
            delivery_status: "Delivered".to_string(),
            message_id: "m-001".to_string(),
            observed_generation: Some(1),
            ..EmailStatus::default()
        });
        let (store, patches) = recording_store(Some(current), patch_ok);
        let factory = accepting(vec![ScriptedCheck::Delivered]);
        let ctx = context(store, resolver("mailersend"), &factory, true);

        let action = reconcile(Arc::new(email(3)), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(factory.provider().send_count(), 0);
        let patches = patches.lock().unwrap();
        assert_eq!(patches[0].message_id, "m-001");
        assert_eq!(patches[0].observed_generation, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_delivered_still_retries_failures() {
        let mut current = email(2);
        current.status = Some(EmailStatus {
            delivery_status: "Failed".to_string(),
            error: "timed out waiting for message delivery".to_string(),
            ..EmailStatus::default()
        });
        let (store, patches) = recording_store(Some(current), patch_ok);
        let factory = accepting(vec![ScriptedCheck::Delivered]);
        let ctx = context(store, resolver("mailersend"), &factory, true);

        reconcile(Arc::new(email(2)), ctx).await.unwrap();

        assert_eq!(factory.provider().send_count(), 1);
        let patches = patches.lock().unwrap();
        assert_eq!(patches[0].delivery_status, "Delivered");
        assert!(patches[0].error.is_empty());
    }

    #[test]
    fn test_error_policy_requeues_transient_errors_quickly() {
        let factory = accepting(vec![]);
        let ctx = context(MockEmailStore::new(), StaticResolver::new(), &factory, false);
        let err = Error::StatusPersist("the object has been modified".into());

        let action = error_policy(Arc::new(email(1)), &err, ctx);

        assert_eq!(action, Action::requeue(Duration::from_secs(15)));
    }

    #[test]
    fn test_error_policy_backs_off_on_permanent_errors() {
        let factory = accepting(vec![]);
        let ctx = context(MockEmailStore::new(), StaticResolver::new(), &factory, false);

        for err in [
            Error::Delivery(DeliveryError::UnsupportedProvider("sendgrid".into())),
            Error::Delivery(DeliveryError::ConfigNotFound("cfg1".into())),
            Error::Delivery(DeliveryError::Timeout(Duration::from_secs(60))),
        ] {
            let action = error_policy(Arc::new(email(1)), &err, ctx.clone());
            assert_eq!(action, Action::requeue(Duration::from_secs(300)), "{err}");
        }
    }

    #[test]
    fn test_watch_triggers_on_generation_only() {
        let mut object = email(4);
        let before = predicates::generation(&object);
        object.status = Some(EmailStatus {
            delivery_status: "Delivered".to_string(),
            ..EmailStatus::default()
        });
        assert_eq!(predicates::generation(&object), before);

        object.metadata.generation = Some(5);
        assert_ne!(predicates::generation(&object), before);
    }
}
