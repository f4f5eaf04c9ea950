//! Email Operator
//!
//! Kubernetes operator that sends one email per `Email` object through the
//! provider named by its `EmailSenderConfig`, then records the outcome in
//! the object's status.
//!
//! ## Architecture
//!
//! ```text
//! Email (email.example.com/v1)
//!   ↓ watch, generation changes only
//! Controller → reconcile
//!   ↓ EmailSenderConfig + Secret (apiToken)
//! DeliveryProvider (MailerSend / Mailgun)
//!   ↓ send, then poll until delivered or 60s
//! Email status: Delivered | Failed
//! ```

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod health;
pub mod resolver;
pub mod store;

pub use config::OperatorConfig;
pub use controller::{Context, ReconcileSettings};
pub use crd::{Email, EmailSenderConfig, EmailSenderConfigSpec, EmailSpec, EmailStatus};
pub use error::Error;

use core_config::{app_info, Environment, FromEnv};
use email_delivery::metrics;
use eyre::{Result, WrapErr};
use health::HealthState;
use kube::api::ListParams;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info};

/// Fail early when the `Email` CRD is not installed.
async fn verify_crds(client: &Client) -> Result<()> {
    let emails: Api<Email> = Api::all(client.clone());
    emails
        .list(&ListParams::default().limit(1))
        .await
        .wrap_err("Email CRD is not served by the cluster; install it with `crdgen | kubectl apply -f -`")?;

    let configs: Api<EmailSenderConfig> = Api::all(client.clone());
    configs
        .list(&ListParams::default().limit(1))
        .await
        .wrap_err("EmailSenderConfig CRD is not served by the cluster")?;
    Ok(())
}

/// Run the operator
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev)
/// 2. Loads `OperatorConfig` from the environment
/// 3. Connects to the cluster and checks that both CRDs are served
/// 4. Starts the health server and runs the controller until SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if the configuration is invalid, no cluster
/// configuration is available, or the CRDs are missing.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting email operator");
    info!("Environment: {:?}", environment);

    let config = OperatorConfig::from_env().wrap_err("Failed to load operator configuration")?;
    info!(
        watch_namespace = ?config.watch_namespace,
        timeout_secs = config.confirmation.timeout.as_secs(),
        poll_interval_secs = config.confirmation.poll_interval.as_secs(),
        skip_delivered = config.skip_delivered,
        "Operator configuration loaded"
    );

    let client = Client::try_default()
        .await
        .wrap_err("Failed to create Kubernetes client")?;

    let health_state = HealthState::new(app_info);
    let health_port = config.health_port;
    let health = tokio::spawn({
        let state = health_state.clone();
        async move {
            if let Err(e) = health::serve(state, health_port).await {
                error!("Health server error: {:?}", e);
            }
        }
    });

    verify_crds(&client).await?;
    health_state.mark_ready();
    info!("CRDs verified, operator is ready");

    let ctx = Arc::new(Context::from_client(client.clone(), &config));
    controller::run(client, &config, ctx).await;

    health.abort();
    info!("Email operator shut down gracefully");
    Ok(())
}
