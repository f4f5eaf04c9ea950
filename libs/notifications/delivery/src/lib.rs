//! Email delivery pipeline
//!
//! Turns a request to send one email into a terminal delivery outcome.
//!
//! ## Components
//!
//! - **Resolver**: `ConfigResolver` looks up a sender configuration and the
//!   credential it references
//! - **Providers**: `DeliveryProvider` with MailerSend and Mailgun
//!   implementations, built by `HttpProviderFactory` from a resolved config
//! - **Confirmation**: `ConfirmationEngine` sends once, then polls the
//!   provider at a fixed interval until delivery is confirmed or the
//!   deadline passes
//! - **Metrics**: Prometheus counters and histograms for deliveries
//!
//! ## Usage
//!
//! ```ignore
//! use email_delivery::{ConfirmationEngine, HttpProviderFactory, OutgoingEmail, ProviderFactory};
//!
//! let resolved = resolver.resolve("cfg1", "default").await?;
//! let email = OutgoingEmail::new(&resolved.config.sender_email, "a@b.com", "Hi", "Hello");
//! let provider = HttpProviderFactory::default().build(&resolved.config, resolved.credential)?;
//! let message_id = ConfirmationEngine::default().deliver(provider.as_ref(), &email).await?;
//! ```

pub mod confirmation;
pub mod error;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod resolver;

pub use confirmation::{ConfirmationEngine, ConfirmationPolicy, DeliveryFailure};
pub use error::{BoxError, DeliveryError, DeliveryResult};
pub use models::{
    Credential, DeliveryOutcome, DeliveryStatus, OutgoingEmail, ProviderKind, SenderConfig,
};
pub use provider::{
    DeliveryCheck, DeliveryProvider, HttpProviderFactory, MailerSendProvider, MailgunProvider,
    ProviderEndpoints, ProviderFactory, ScriptedProvider,
};
pub use provider::mock::{ScriptedCheck, ScriptedProviderFactory};
pub use resolver::{ConfigResolver, ResolvedSender, StaticResolver, API_TOKEN_KEY};
