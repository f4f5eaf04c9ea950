//! Delivery confirmation engine.
//!
//! Drives one send through to a terminal outcome:
//!
//! ```text
//! send ──err──────────────────────────────► Failed(send)
//!   │ ok
//!   ▼
//! Polling ──Delivered────────────────────► Delivered
//!   │   ──check error─────────────────────► Failed(check)
//!   │   ──not yet, deadline passed────────► Failed(timeout)
//!   └── not yet: sleep one interval, check again
//! ```
//!
//! The deadline is measured from the moment the send returned and is only
//! consulted before each check. The interval sleep is never shortened, so
//! a check that starts just before the deadline still runs: total polling
//! time can exceed the deadline by up to one interval. The sleep is a
//! tokio timer; dropping the future cancels the loop, there is no other
//! cancellation source.

use crate::error::DeliveryError;
use crate::metrics::DeliveryMetrics;
use crate::models::{DeliveryOutcome, OutgoingEmail};
use crate::provider::{DeliveryCheck, DeliveryProvider};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Time allowed for the provider to confirm delivery
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause between two delivery checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Longest a single delivery check may take
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing of the confirmation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// A check still running after this long fails with a check error.
    pub check_timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

/// A delivery attempt that ended in `Failed`.
#[derive(Debug)]
pub struct DeliveryFailure {
    /// Set when the provider accepted the send before things went wrong.
    pub message_id: Option<String>,
    pub error: DeliveryError,
}

impl DeliveryFailure {
    pub fn outcome(&self) -> DeliveryOutcome {
        DeliveryOutcome::failed(self.message_id.clone(), &self.error)
    }
}

impl From<DeliveryError> for DeliveryFailure {
    fn from(error: DeliveryError) -> Self {
        Self {
            message_id: None,
            error,
        }
    }
}

/// Runs send + bounded fixed-interval polling against one provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmationEngine {
    policy: ConfirmationPolicy,
}

impl ConfirmationEngine {
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    /// Send `email` and wait until the provider confirms delivery.
    ///
    /// Returns the provider message id on `Delivered`. Blocks the calling
    /// task for up to the policy timeout plus one interval plus one check
    /// timeout after the send.
    pub async fn deliver(
        &self,
        provider: &dyn DeliveryProvider,
        email: &OutgoingEmail,
    ) -> Result<String, DeliveryFailure> {
        let metrics = DeliveryMetrics::new(provider.kind().as_str());
        let started = Instant::now();

        let result = self.run(provider, email, &metrics).await;

        match &result {
            Ok(_) => metrics.delivered(started.elapsed()),
            Err(failure) => metrics.failed(failure.error.kind(), started.elapsed()),
        }
        result
    }

    async fn run(
        &self,
        provider: &dyn DeliveryProvider,
        email: &OutgoingEmail,
        metrics: &DeliveryMetrics,
    ) -> Result<String, DeliveryFailure> {
        let message_id = provider.send(email).await?;
        debug!(
            provider = %provider.kind(),
            message_id = %message_id,
            "Message accepted, waiting for delivery confirmation"
        );

        let deadline = Instant::now() + self.policy.timeout;
        let failure = |error: DeliveryError| DeliveryFailure {
            message_id: Some(message_id.clone()),
            error,
        };

        let mut checks: u32 = 0;
        loop {
            if Instant::now() >= deadline {
                warn!(
                    provider = %provider.kind(),
                    message_id = %message_id,
                    checks,
                    timeout = ?self.policy.timeout,
                    "Delivery not confirmed before the deadline"
                );
                return Err(failure(DeliveryError::Timeout(self.policy.timeout)));
            }

            checks += 1;
            metrics.checked();
            let check = timeout(
                self.policy.check_timeout,
                provider.check_delivered(&message_id),
            )
            .await
            .unwrap_or_else(|_| {
                Err(DeliveryError::Check {
                    provider: provider.kind().as_str(),
                    message: format!(
                        "no answer within {:?}",
                        self.policy.check_timeout
                    ),
                })
            });

            match check {
                Ok(DeliveryCheck::Delivered) => {
                    info!(
                        provider = %provider.kind(),
                        message_id = %message_id,
                        checks,
                        "Delivery confirmed"
                    );
                    return Ok(message_id);
                }
                Ok(DeliveryCheck::NotYetDelivered) => {
                    debug!(message_id = %message_id, checks, "Not delivered yet");
                }
                Err(error) => {
                    warn!(
                        provider = %provider.kind(),
                        message_id = %message_id,
                        error = %error,
                        "Delivery check failed"
                    );
                    return Err(failure(error));
                }
            }

            sleep(self.policy.poll_interval).await;
        }
    }
}
