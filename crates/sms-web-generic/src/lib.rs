//! Framework-agnostic webhook processing: verify, parse, run the keyword
//! flow against the opt-in store, and answer in the gateway's reply format.

use sms_core::{
    normalize_e164, Headers, InboundMessage, InboundWebhook, WebhookError, WebhookResponse,
};
use sms_store::{ConsentStatus, Store, StoreError, SYSTEM_ACTOR};
use std::sync::Arc;
use tracing::{debug, info, warn};

mod flow;

pub use flow::{clean_name, Intent, OptInPolicy, Outcome};

/// Handles inbound SMS callbacks for one gateway and one store.
#[derive(Clone)]
pub struct WebhookProcessor {
    hook: Arc<dyn InboundWebhook>,
    store: Store,
    policy: Arc<OptInPolicy>,
}

impl WebhookProcessor {
    pub fn new(hook: Arc<dyn InboundWebhook>, store: Store, policy: OptInPolicy) -> Self {
        Self {
            hook,
            store,
            policy: Arc::new(policy),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Process an incoming webhook request and return a framework-agnostic response.
    ///
    /// Blocks on the store; async callers should run it on a blocking thread.
    pub fn process_webhook(&self, headers: Headers, body: &[u8]) -> WebhookResponse {
        match self.process_webhook_internal(headers, body) {
            Ok(outcome) => self.hook.render_reply(&outcome.reply()),
            Err(e) => {
                warn!(provider = self.hook.provider(), error = %e, "webhook rejected");
                e.into()
            }
        }
    }

    fn process_webhook_internal(
        &self,
        headers: Headers,
        body: &[u8],
    ) -> Result<Outcome, WebhookError> {
        self.hook
            .verify(&headers, body)
            .map_err(|e| WebhookError::VerificationFailed(e.to_string()))?;

        let message = self
            .hook
            .parse_inbound(&headers, body)
            .map_err(|e| WebhookError::ParseError(e.to_string()))?;

        self.handle_message(&message)
    }

    /// Apply one inbound message to the store.
    pub fn handle_message(&self, message: &InboundMessage) -> Result<Outcome, WebhookError> {
        let Some(phone) = normalize_e164(&message.from, &self.policy.country_code) else {
            info!(from = %message.from, "ignoring message from unparseable number");
            return Ok(Outcome::InvalidNumber);
        };

        let intent = self.policy.classify(&message.text);
        debug!(%phone, ?intent, "classified inbound message");

        let outcome = match intent {
            Intent::OptOut => {
                let change = self
                    .store
                    .record_consent(&phone, ConsentStatus::OptedOut, SYSTEM_ACTOR)
                    .map_err(store_error)?;
                Outcome::OptedOut {
                    created: change.created,
                }
            }
            Intent::Help => Outcome::Help,
            Intent::OptIn => {
                let change = self
                    .store
                    .record_consent(&phone, ConsentStatus::OptedIn, SYSTEM_ACTOR)
                    .map_err(store_error)?;
                Outcome::OptedIn {
                    created: change.created,
                    ask_name: self.policy.ask_name_on_join && change.subscriber.name.is_none(),
                }
            }
            Intent::Other => self.capture_name(&phone, &message.text)?,
        };

        info!(%phone, outcome = outcome.label(), "processed inbound message");
        Ok(outcome)
    }

    /// A free-text reply right after joining is taken as the subscriber's name.
    fn capture_name(&self, phone: &str, text: &str) -> Result<Outcome, WebhookError> {
        if !self.policy.ask_name_on_join {
            return Ok(Outcome::Unrecognized);
        }
        let name = clean_name(text);
        if name.is_empty() {
            return Ok(Outcome::Unrecognized);
        }
        // the status and blank-name check happen in the same write as the update
        let captured = self
            .store
            .capture_name(phone, &name, SYSTEM_ACTOR)
            .map_err(store_error)?;
        Ok(match captured {
            Some(_) => Outcome::NameCaptured(name),
            None => Outcome::Unrecognized,
        })
    }
}

fn store_error(e: StoreError) -> WebhookError {
    WebhookError::Store(e.to_string())
}

/// Helper trait for framework adapters to convert headers
pub trait HeaderConverter {
    type HeaderType;

    fn to_generic_headers(headers: &Self::HeaderType) -> Headers;
}

/// Helper trait for framework adapters to convert responses
pub trait ResponseConverter {
    type ResponseType;

    fn from_webhook_response(response: WebhookResponse) -> Self::ResponseType;
}
