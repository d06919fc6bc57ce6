//! # smsoptin
//!
//! SMS opt-in/opt-out service for a small business mailing list.
//!
//! - **Webhook**: Twilio posts inbound texts to `/sms`; JOIN/STOP keywords
//!   and a one-step name prompt update a local SQLite store
//! - **Bulk sender**: one message per opted-in number, `{name}` templating,
//!   dry runs, per-recipient results
//! - **Operator CLI**: list, add, opt in/out, rename, audit trail
//!
//! Delivery, queuing and carrier limits are Twilio's job; public exposure of
//! the webhook port is a tunnel's job.
//!
//! ## Configuration
//!
//! ```rust,ignore
//! use smsoptin::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("store at {}", config.store.path.display());
//! ```

pub mod admin;
pub mod bulk;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

pub use crate::config::*;
pub use error::{Error, Result};

/// Common imports
pub mod prelude {
    pub use crate::bulk::{BulkOptions, BulkReport, BulkSender, Delivery};
    pub use crate::config::{AppConfig, BulkConfig, LoggingConfig, ServerConfig, TwilioConfig};
    pub use sms_core::*;
    pub use sms_store::{ConsentStatus, Store, Subscriber};
}
