use sms_core::SmsError;
use sms_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("missing configuration: {0}")]
    MissingConfig(String),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("gateway: {0}")]
    Sms(#[from] SmsError),
    #[error("invalid phone number {0:?}")]
    InvalidPhone(String),
    #[error("logging: {0}")]
    Logging(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
