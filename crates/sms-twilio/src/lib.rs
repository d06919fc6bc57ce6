//! # Twilio gateway
//!
//! Outbound sends through the Programmable Messaging REST API, inbound
//! webhook parsing with `X-Twilio-Signature` verification, and TwiML replies.

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sms_core::{
    Headers, InboundMessage, InboundWebhook, SendRequest, SendResponse, SmsClient, SmsError,
    WebhookResponse,
};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub mod twiml;

const PROVIDER: &str = "twilio";
const DEFAULT_BASE_URL: &str = "https://api.twilio.com";
const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Twilio REST client and webhook verifier.
#[derive(Clone, Debug)]
pub struct TwilioClient {
    /// Account SID (`AC...`), also the basic-auth user.
    pub account_sid: String,
    /// Auth token; basic-auth password and webhook signing key.
    pub auth_token: String,
    /// API base URL; override for testing/mocking.
    pub base_url: String,
    /// Messaging Service SID (`MG...`). Takes precedence over the `from` number.
    pub messaging_service_sid: Option<String>,
    /// Public URL Twilio calls, as configured in the console. Needed for signatures.
    webhook_url: Option<String>,
    verify_signatures: bool,
    http: reqwest::Client,
}

impl TwilioClient {
    pub fn new<S: Into<String>>(account_sid: S, auth_token: S) -> Self {
        Self::with_base_url(account_sid, auth_token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url<S: Into<String>>(account_sid: S, auth_token: S, base_url: String) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            base_url,
            messaging_service_sid: None,
            webhook_url: None,
            verify_signatures: false,
            http: reqwest::Client::new(),
        }
    }

    /// Bound every outbound API call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, SmsError> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmsError::Unexpected(e.to_string()))?;
        Ok(self)
    }

    pub fn with_messaging_service(mut self, sid: Option<String>) -> Self {
        self.messaging_service_sid = sid.filter(|s| !s.trim().is_empty());
        self
    }

    /// Enable signature verification against the public webhook URL.
    pub fn with_signature_verification(mut self, webhook_url: &str) -> Result<Self, SmsError> {
        Url::parse(webhook_url)
            .map_err(|e| SmsError::Invalid(format!("webhook url {webhook_url:?}: {e}")))?;
        self.webhook_url = Some(webhook_url.to_string());
        self.verify_signatures = true;
        Ok(self)
    }

    fn messages_url(&self) -> Result<Url, SmsError> {
        let raw = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url.trim_end_matches('/'),
            self.account_sid
        );
        Url::parse(&raw).map_err(|e| SmsError::Invalid(format!("api url: {e}")))
    }

    /// Form fields for the Messages resource.
    fn send_form(&self, req: &SendRequest<'_>) -> Vec<(&'static str, String)> {
        let mut form = vec![("To", req.to.to_string()), ("Body", req.text.to_string())];
        match &self.messaging_service_sid {
            Some(sid) => form.push(("MessagingServiceSid", sid.clone())),
            None => form.push(("From", req.from.to_string())),
        }
        if let Some(media) = req.media_url {
            form.push(("MediaUrl", media.to_string()));
        }
        form
    }
}

#[derive(Debug, Deserialize)]
struct TwilioApiError {
    code: Option<i64>,
    message: Option<String>,
}

#[async_trait]
impl SmsClient for TwilioClient {
    async fn send(&self, req: SendRequest<'_>) -> Result<SendResponse, SmsError> {
        if req.to.is_empty() {
            return Err(SmsError::Invalid("missing recipient".into()));
        }
        if req.from.is_empty() && self.messaging_service_sid.is_none() {
            return Err(SmsError::Invalid(
                "no sender number or messaging service configured".into(),
            ));
        }

        let url = self.messages_url()?;
        let form = self.send_form(&req);
        let res = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| SmsError::Http(e.to_string()))?;

        let status = res.status();
        let raw_text = res
            .text()
            .await
            .map_err(|e| SmsError::Http(e.to_string()))?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<TwilioApiError>(&raw_text) {
                Ok(TwilioApiError {
                    code: Some(code),
                    message: Some(message),
                }) => format!("{code}: {message}"),
                _ => raw_text,
            };
            return Err(if status == reqwest::StatusCode::UNAUTHORIZED {
                SmsError::Auth(detail)
            } else {
                SmsError::Provider(format!("HTTP {}: {}", status, detail))
            });
        }

        let raw_json: serde_json::Value = serde_json::from_str(&raw_text)
            .unwrap_or_else(|_| serde_json::json!({ "raw": raw_text }));
        let id = raw_json
            .get("sid")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(sms_core::fallback_id);
        debug!(to = req.to, sid = %id, "twilio accepted message");

        Ok(SendResponse {
            id,
            provider: PROVIDER,
            raw: raw_json,
        })
    }
}

/// Compute the `X-Twilio-Signature` value for a form-encoded callback.
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let mac = signing_mac(auth_token, url, params);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

fn signing_mac(auth_token: &str, url: &str, params: &[(String, String)]) -> Hmac<Sha1> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    // HMAC accepts keys of any length
    let mut mac = Hmac::<Sha1>::new_from_slice(auth_token.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
    mac.update(url.as_bytes());
    for (k, v) in sorted {
        mac.update(k.as_bytes());
        mac.update(v.as_bytes());
    }
    mac
}

fn decode_form(body: &[u8]) -> Result<Vec<(String, String)>, SmsError> {
    serde_urlencoded::from_bytes(body).map_err(|e| SmsError::Invalid(format!("form decode: {e}")))
}

fn field(params: &[(String, String)], name: &str) -> Option<String> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

impl InboundWebhook for TwilioClient {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn verify(&self, headers: &Headers, body: &[u8]) -> Result<(), SmsError> {
        if !self.verify_signatures {
            return Ok(());
        }
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| SmsError::Auth("webhook url not configured".into()))?;
        let signature = sms_core::header(headers, SIGNATURE_HEADER)
            .ok_or_else(|| SmsError::Auth(format!("missing {SIGNATURE_HEADER}")))?;
        let expected = base64::engine::general_purpose::STANDARD
            .decode(signature.trim())
            .map_err(|_| SmsError::Auth("signature is not base64".into()))?;

        let params = decode_form(body)?;
        signing_mac(&self.auth_token, url, &params)
            .verify_slice(&expected)
            .map_err(|_| {
                warn!("rejected webhook with bad signature");
                SmsError::Auth("signature mismatch".into())
            })
    }

    fn parse_inbound(&self, _headers: &Headers, body: &[u8]) -> Result<InboundMessage, SmsError> {
        let params = decode_form(body)?;
        let from = field(&params, "From")
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| SmsError::Invalid("missing From".into()))?;

        let raw = serde_json::Value::Object(
            params
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        );
        Ok(InboundMessage {
            id: field(&params, "MessageSid").or_else(|| field(&params, "SmsSid")),
            from,
            to: field(&params, "To").unwrap_or_default(),
            text: field(&params, "Body").unwrap_or_default(),
            provider: PROVIDER,
            raw,
        })
    }

    fn render_reply(&self, text: &str) -> WebhookResponse {
        WebhookResponse::reply(twiml::message_response(text), twiml::CONTENT_TYPE)
    }
}
