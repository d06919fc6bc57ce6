//! Broadcast one message to every opted-in subscriber.
//!
//! Each recipient gets exactly one gateway request. A failed send is logged
//! and reported but never stops the batch; a store failure does.

use serde::Serialize;
use sms_core::{SendRequest, SmsClient};
use sms_store::{SendStatus, Store};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;

/// Stand-in for `{name}` when a subscriber never gave one.
const ANONYMOUS: &str = "there";

#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Message body; `{name}` is replaced per recipient.
    pub template: String,
    pub media_url: Option<String>,
    pub dry_run: bool,
    /// Pause between recipients.
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Delivery {
    Sent { id: String },
    DryRun,
    Failed { error: String },
}

impl Delivery {
    fn status(&self) -> SendStatus {
        match self {
            Delivery::Sent { .. } => SendStatus::Sent,
            Delivery::DryRun => SendStatus::DryRun,
            Delivery::Failed { .. } => SendStatus::Failed,
        }
    }

    fn detail(&self) -> &str {
        match self {
            Delivery::Sent { id } => id,
            Delivery::DryRun => "",
            Delivery::Failed { error } => error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientOutcome {
    pub phone: String,
    pub name: Option<String>,
    #[serde(flatten)]
    pub delivery: Delivery,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl BulkReport {
    /// Sent or dry-run.
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.delivery, Delivery::Failed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

/// Fill `{name}` in a template.
pub fn render_body(template: &str, name: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(ANONYMOUS);
    template.replace("{name}", name)
}

pub struct BulkSender<C> {
    store: Store,
    client: C,
    /// Sender number; ignored by gateways configured with a messaging service.
    from: String,
}

impl<C: SmsClient> BulkSender<C> {
    pub fn new(store: Store, client: C, from: impl Into<String>) -> Self {
        Self {
            store,
            client,
            from: from.into(),
        }
    }

    /// Send to everyone opted in at the moment of the read.
    pub async fn run(&self, opts: &BulkOptions) -> Result<BulkReport> {
        let recipients = self.store.opted_in()?;
        let total = recipients.len();
        info!(total, dry_run = opts.dry_run, "starting bulk send");

        let mut report = BulkReport::default();
        for (i, subscriber) in recipients.into_iter().enumerate() {
            if i > 0 && !opts.interval.is_zero() {
                tokio::time::sleep(opts.interval).await;
            }

            let body = render_body(&opts.template, subscriber.name.as_deref());
            let delivery = if opts.dry_run {
                Delivery::DryRun
            } else {
                let req = SendRequest {
                    to: &subscriber.phone,
                    from: &self.from,
                    text: &body,
                    media_url: opts.media_url.as_deref(),
                };
                match self.client.send(req).await {
                    Ok(res) => Delivery::Sent { id: res.id },
                    Err(e) => Delivery::Failed {
                        error: e.to_string(),
                    },
                }
            };

            match &delivery {
                Delivery::Failed { error } => {
                    warn!("[{}/{}] FAILED -> {}: {}", i + 1, total, subscriber.phone, error)
                }
                other => info!(
                    "[{}/{}] {} -> {} {}",
                    i + 1,
                    total,
                    other.status(),
                    subscriber.phone,
                    other.detail()
                ),
            }

            self.store.record_send(
                &subscriber.phone,
                subscriber.name.as_deref().unwrap_or_default(),
                delivery.status(),
                delivery.detail(),
            )?;
            report.outcomes.push(RecipientOutcome {
                phone: subscriber.phone,
                name: subscriber.name,
                delivery,
            });
        }

        info!(
            delivered = report.delivered(),
            failed = report.failed(),
            "bulk send finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sms_core::{SendResponse, SmsError};
    use sms_store::{ConsentStatus, SYSTEM_ACTOR};
    use std::sync::Mutex;

    /// Records every request; fails for numbers in `reject`.
    #[derive(Default)]
    struct RecordingClient {
        sent: Mutex<Vec<(String, String, Option<String>)>>,
        reject: Vec<String>,
    }

    #[async_trait]
    impl SmsClient for RecordingClient {
        async fn send(&self, req: SendRequest<'_>) -> std::result::Result<SendResponse, SmsError> {
            if self.reject.iter().any(|r| r == req.to) {
                return Err(SmsError::Provider("HTTP 400: 21211: invalid To".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((
                req.to.to_string(),
                req.text.to_string(),
                req.media_url.map(str::to_string),
            ));
            Ok(SendResponse {
                id: format!("SM{}", sent.len()),
                provider: "test",
                raw: serde_json::Value::Null,
            })
        }
    }

    fn options(template: &str) -> BulkOptions {
        BulkOptions {
            template: template.to_string(),
            media_url: None,
            dry_run: false,
            interval: Duration::ZERO,
        }
    }

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.add("+15550000001", "Joey", "test").unwrap();
        store.add("+15550000002", "", "test").unwrap();
        store
            .record_consent("+15550000003", ConsentStatus::OptedOut, SYSTEM_ACTOR)
            .unwrap();
        store
    }

    #[test]
    fn renders_names() {
        assert_eq!(render_body("Hi {name}!", Some("Joey")), "Hi Joey!");
        assert_eq!(render_body("Hi {name}!", None), "Hi there!");
        assert_eq!(render_body("Hi {name}!", Some("  ")), "Hi there!");
        assert_eq!(render_body("No placeholder", Some("Joey")), "No placeholder");
    }

    #[tokio::test]
    async fn sends_only_to_opted_in() {
        let store = seeded();
        let sender = BulkSender::new(store.clone(), RecordingClient::default(), "+15559999999");
        let report = sender.run(&options("Hi {name}, sale Saturday")).await.unwrap();

        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 0);
        let sent = sender.client.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                ("+15550000001".to_string(), "Hi Joey, sale Saturday".to_string(), None),
                ("+15550000002".to_string(), "Hi there, sale Saturday".to_string(), None),
            ]
        );
        assert_eq!(store.recent_sends(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_batch() {
        let store = seeded();
        let client = RecordingClient {
            reject: vec!["+15550000001".to_string()],
            ..RecordingClient::default()
        };
        let sender = BulkSender::new(store.clone(), client, "+15559999999");
        let report = sender.run(&options("Reminder")).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.delivered(), 1);
        assert!(matches!(report.outcomes[0].delivery, Delivery::Failed { .. }));
        assert_eq!(
            report.outcomes[1].delivery,
            Delivery::Sent { id: "SM1".into() }
        );

        let log = store.recent_sends(10).unwrap();
        assert_eq!(log[1].status, "FAILED");
        assert!(log[1].detail.contains("21211"));
        assert_eq!(log[0].status, "SENT");
    }

    #[tokio::test]
    async fn dry_run_never_calls_gateway() {
        let store = seeded();
        let sender = BulkSender::new(store.clone(), RecordingClient::default(), "+15559999999");
        let report = sender
            .run(&BulkOptions {
                dry_run: true,
                ..options("Reminder")
            })
            .await
            .unwrap();

        assert_eq!(report.delivered(), 2);
        assert!(sender.client.sent.lock().unwrap().is_empty());
        assert!(store
            .recent_sends(10)
            .unwrap()
            .iter()
            .all(|e| e.status == "DRY_RUN"));
    }

    #[tokio::test]
    async fn media_url_is_forwarded() {
        let store = seeded();
        let sender = BulkSender::new(store, RecordingClient::default(), "+15559999999");
        sender
            .run(&BulkOptions {
                media_url: Some("https://example.com/flyer.png".into()),
                ..options("Reminder")
            })
            .await
            .unwrap();
        let sent = sender.client.sent.lock().unwrap();
        assert!(sent
            .iter()
            .all(|(_, _, media)| media.as_deref() == Some("https://example.com/flyer.png")));
    }

    #[tokio::test]
    async fn send_log_failure_stops_the_run() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("smsoptin-bulk-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("contacts.db");

        let store = Store::open(&path).unwrap();
        store.add("+15550000001", "Joey", "test").unwrap();
        store.add("+15550000002", "", "test").unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE send_log")
            .unwrap();

        let sender = BulkSender::new(store, RecordingClient::default(), "+15559999999");
        let err = sender.run(&options("Reminder")).await.unwrap_err();
        assert!(matches!(err, crate::Error::Store(_)));
        assert_eq!(sender.client.sent.lock().unwrap().len(), 1);

        drop(sender);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_store_sends_nothing() {
        let sender = BulkSender::new(
            Store::open_in_memory().unwrap(),
            RecordingClient::default(),
            "+15559999999",
        );
        let report = sender.run(&options("Reminder")).await.unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn outcome_serializes_flat() {
        let o = RecipientOutcome {
            phone: "+15550000001".into(),
            name: None,
            delivery: Delivery::Sent { id: "SM1".into() },
        };
        let v = serde_json::to_value(&o).unwrap();
        assert_eq!(v["status"], "SENT");
        assert_eq!(v["id"], "SM1");
    }
}
