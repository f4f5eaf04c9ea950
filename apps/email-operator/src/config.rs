//! Operator settings loaded from the environment.

use core_config::{env_duration_secs, env_optional, env_or_default, env_parse, ConfigError, FromEnv};
use email_delivery::provider::{mailersend, mailgun};
use email_delivery::{ConfirmationPolicy, ProviderEndpoints};
use std::time::Duration;

pub const DEFAULT_HEALTH_PORT: u16 = 8081;
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(15);
pub const DEFAULT_PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Restrict the watch to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    pub health_port: u16,
    pub confirmation: ConfirmationPolicy,
    /// Delay before a failed reconcile is retried
    pub error_requeue: Duration,
    /// Retry delay for errors that only an edit can fix
    pub permanent_error_requeue: Duration,
    /// Do not resend when the object already reports `Delivered`
    pub skip_delivered: bool,
    pub endpoints: ProviderEndpoints,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            health_port: DEFAULT_HEALTH_PORT,
            confirmation: ConfirmationPolicy::default(),
            error_requeue: DEFAULT_ERROR_REQUEUE,
            permanent_error_requeue: DEFAULT_PERMANENT_ERROR_REQUEUE,
            skip_delivered: false,
            endpoints: ProviderEndpoints::default(),
        }
    }
}

impl FromEnv for OperatorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = ConfirmationPolicy::default();
        Ok(Self {
            watch_namespace: env_optional("EMAIL_OPERATOR_WATCH_NAMESPACE"),
            health_port: env_parse("EMAIL_OPERATOR_HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
            confirmation: ConfirmationPolicy {
                timeout: env_duration_secs("EMAIL_OPERATOR_DELIVERY_TIMEOUT_SECS", defaults.timeout)?,
                poll_interval: env_duration_secs(
                    "EMAIL_OPERATOR_POLL_INTERVAL_SECS",
                    defaults.poll_interval,
                )?,
                check_timeout: env_duration_secs(
                    "EMAIL_OPERATOR_CHECK_TIMEOUT_SECS",
                    defaults.check_timeout,
                )?,
            },
            error_requeue: env_duration_secs(
                "EMAIL_OPERATOR_ERROR_REQUEUE_SECS",
                DEFAULT_ERROR_REQUEUE,
            )?,
            permanent_error_requeue: env_duration_secs(
                "EMAIL_OPERATOR_PERMANENT_ERROR_REQUEUE_SECS",
                DEFAULT_PERMANENT_ERROR_REQUEUE,
            )?,
            skip_delivered: env_parse("EMAIL_OPERATOR_SKIP_DELIVERED", false)?,
            endpoints: ProviderEndpoints {
                mailersend: env_or_default("MAILERSEND_API_URL", mailersend::DEFAULT_API_URL),
                mailgun: env_or_default("MAILGUN_API_URL", mailgun::DEFAULT_API_URL),
            },
        })
    }
}
