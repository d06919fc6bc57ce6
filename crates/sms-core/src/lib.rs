//! # SMS Core
//!
//! Core traits and types shared by the opt-in service crates.
//!
//! - [`SmsClient`] trait for sending messages through a gateway
//! - [`InboundWebhook`] trait for verifying and parsing gateway callbacks
//! - [`WebhookResponse`] a framework-agnostic reply the HTTP layer converts
//! - phone number normalisation into E.164
//!
//! ## Example
//!
//! ```rust,ignore
//! use sms_core::{SendRequest, SmsClient};
//!
//! let response = client.send(SendRequest {
//!     to: "+15551234567",
//!     from: "+15557654321",
//!     text: "Reminder",
//!     media_url: None,
//! }).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod phone;

pub use phone::normalize_e164;

/// Errors that can occur while talking to an SMS gateway
#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    /// HTTP communication error
    #[error("http error: {0}")]
    Http(String),
    /// Authentication/authorization error
    #[error("authentication error: {0}")]
    Auth(String),
    /// Invalid request parameters
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Gateway returned an error
    #[error("provider error: {0}")]
    Provider(String),
    /// Unexpected error occurred
    #[error("unexpected: {0}")]
    Unexpected(String),
}

/// Errors raised while handling an inbound webhook
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
    #[error("parsing failed: {0}")]
    ParseError(String),
    #[error("store error: {0}")]
    Store(String),
}

impl WebhookError {
    /// HTTP status the gateway should see for this failure.
    pub fn status(&self) -> HttpStatus {
        match self {
            WebhookError::VerificationFailed(_) => HttpStatus::Unauthorized,
            WebhookError::ParseError(_) => HttpStatus::BadRequest,
            WebhookError::Store(_) => HttpStatus::InternalServerError,
        }
    }
}

/// HTTP status code for web responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok = 200,
    BadRequest = 400,
    Unauthorized = 401,
    InternalServerError = 500,
}

impl HttpStatus {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub text: &'a str,
    /// Publicly reachable media URL; turns the message into an MMS.
    pub media_url: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResponse {
    pub id: String,
    /// Name of the gateway that produced the response, e.g. "twilio".
    pub provider: &'static str,
    /// Raw gateway payload for debugging / audit.
    pub raw: serde_json::Value,
}

/// Normalized inbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: Option<String>,
    pub from: String,
    pub to: String,
    pub text: String,
    pub provider: &'static str,
    pub raw: serde_json::Value,
}

/// Generic webhook response that can be converted to any framework's response type
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: HttpStatus,
    pub body: String,
    pub content_type: String,
}

impl WebhookResponse {
    /// 200 reply carrying a gateway-specific document (TwiML for Twilio).
    pub fn reply(body: String, content_type: &str) -> Self {
        Self {
            status: HttpStatus::Ok,
            body,
            content_type: content_type.to_string(),
        }
    }

    pub fn error(status: HttpStatus, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string(),
            content_type: "application/json".to_string(),
        }
    }
}

impl From<WebhookError> for WebhookResponse {
    fn from(err: WebhookError) -> Self {
        let status = err.status();
        let message = match &err {
            // keep store internals out of the gateway's logs
            WebhookError::Store(_) => "store unavailable".to_string(),
            other => other.to_string(),
        };
        WebhookResponse::error(status, &message)
    }
}

#[async_trait]
pub trait SmsClient: Send + Sync {
    /// Send a single message.
    async fn send(&self, req: SendRequest<'_>) -> Result<SendResponse, SmsError>;
}

/// Utility to create a pseudo id if a gateway doesn't return one.
pub fn fallback_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lightweight header representation to avoid tying the core to any HTTP framework.
pub type Headers = Vec<(String, String)>;

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Gateway-agnostic inbound webhook interface.
pub trait InboundWebhook: Send + Sync {
    /// Stable provider key, e.g. "twilio".
    fn provider(&self) -> &'static str;

    /// Parse the incoming HTTP payload (headers + raw body) into a normalized `InboundMessage`.
    fn parse_inbound(&self, headers: &Headers, body: &[u8]) -> Result<InboundMessage, SmsError>;

    /// Optional signature verification (no-op by default).
    fn verify(&self, _headers: &Headers, _body: &[u8]) -> Result<(), SmsError> {
        Ok(())
    }

    /// Render a plain-text reply in the gateway's acknowledgment format.
    fn render_reply(&self, text: &str) -> WebhookResponse;
}
