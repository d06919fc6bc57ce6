use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use sms_twilio::TwilioClient;
use sms_web_generic::OptInPolicy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Webhook server configuration
    pub server: ServerConfig,
    /// Twilio account and webhook configuration
    pub twilio: TwilioConfig,
    /// Opt-in database
    pub store: StoreConfig,
    /// Keyword flow
    pub optin: OptInPolicy,
    /// Bulk sender defaults
    pub bulk: BulkConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Server host (default: 127.0.0.1, the tunnel connects locally)
    pub host: String,
    /// Server port (default: 5000)
    pub port: u16,
    /// Timeout for outbound gateway calls in seconds (default: 30)
    pub timeout_seconds: u64,
}

/// Twilio configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwilioConfig {
    /// Account SID (AC...)
    pub account_sid: String,
    /// Auth token
    pub auth_token: String,
    /// Sender number in E.164, used when no messaging service is set
    pub from_number: String,
    /// Messaging Service SID (MG...), required for A2P 10DLC traffic
    pub messaging_service_sid: Option<String>,
    /// API base URL (default: https://api.twilio.com)
    pub base_url: String,
    /// Public webhook URL as configured in the Twilio console
    pub webhook_url: Option<String>,
    /// Webhook signature validation (default: true)
    pub verify_signatures: bool,
}

/// Opt-in store configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// SQLite file (default: contacts.db)
    pub path: PathBuf,
}

/// Bulk sender configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BulkConfig {
    /// Default message template; `{name}` is replaced per recipient
    pub template: Option<String>,
    /// Public image URL attached to every message (MMS)
    pub media_url: Option<String>,
    /// Log instead of sending (default: false)
    pub dry_run: bool,
    /// Pause between recipients in milliseconds (default: 400)
    pub send_interval_ms: u64,
}

/// Security configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    /// Maximum webhook body size in bytes (default: 64KB)
    pub max_body_size: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: json or pretty (default: pretty)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            timeout_seconds: 30,
        }
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            messaging_service_sid: None,
            base_url: "https://api.twilio.com".to_string(),
            webhook_url: None,
            verify_signatures: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("contacts.db"),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            template: None,
            media_url: None,
            dry_run: false,
            send_interval_ms: 400,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 64 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl TwilioConfig {
    /// Settings the bulk sender cannot run without.
    pub fn missing_for_send(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if blank(&self.account_sid) {
            missing.push("twilio.account_sid");
        }
        if blank(&self.auth_token) {
            missing.push("twilio.auth_token");
        }
        let has_service = self.messaging_service_sid.as_deref().is_some_and(|s| !blank(s));
        if !has_service && blank(&self.from_number) {
            missing.push("twilio.messaging_service_sid or twilio.from_number");
        }
        missing
    }

    /// Settings the webhook server cannot run without.
    pub fn missing_for_webhook(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.verify_signatures {
            if blank(&self.auth_token) {
                missing.push("twilio.auth_token");
            }
            if self.webhook_url.as_deref().is_none_or(blank) {
                missing.push("twilio.webhook_url");
            }
        }
        missing
    }

    /// Client for outbound sends.
    pub fn send_client(&self, timeout: Duration) -> Result<TwilioClient, Error> {
        require(self.missing_for_send())?;
        Ok(TwilioClient::with_base_url(
            self.account_sid.clone(),
            self.auth_token.clone(),
            self.base_url.clone(),
        )
        .with_timeout(timeout)?
        .with_messaging_service(self.messaging_service_sid.clone()))
    }

    /// Inbound parser/verifier for the webhook.
    pub fn webhook_client(&self) -> Result<TwilioClient, Error> {
        require(self.missing_for_webhook())?;
        let client = TwilioClient::with_base_url(
            self.account_sid.clone(),
            self.auth_token.clone(),
            self.base_url.clone(),
        );
        match (&self.webhook_url, self.verify_signatures) {
            (Some(url), true) => Ok(client.with_signature_verification(url)?),
            _ => Ok(client),
        }
    }
}

fn require(missing: Vec<&'static str>) -> Result<(), Error> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingConfig(missing.join(", ")))
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(Config::try_from(&AppConfig::default())?)
            // Add configuration file based on environment
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (gitignored)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (prefixed with SMSOPTIN__)
            .add_source(Environment::with_prefix("SMSOPTIN").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_seconds)
    }
}
