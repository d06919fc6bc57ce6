use clap::{Parser, Subcommand};
use smsoptin::admin::Admin;
use smsoptin::bulk::{BulkOptions, BulkSender};
use smsoptin::{AppConfig, Error, logging, server};
use sms_store::{ConsentStatus, Store, Subscriber};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "smsoptin")]
#[command(about = "SMS opt-in webhook, bulk sender and contact admin")]
struct Cli {
    /// Override store.path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Name recorded in the audit log for operator changes
    #[arg(long, global = true, default_value = "admin")]
    actor: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the inbound webhook server
    Serve,
    /// Send one message to every opted-in subscriber
    Send {
        /// Message template, `{name}` is replaced per recipient (default: bulk.template)
        #[arg(long)]
        body: Option<String>,
        /// Public image URL to attach (MMS)
        #[arg(long)]
        media_url: Option<String>,
        /// Log what would be sent without calling the gateway
        #[arg(long)]
        dry_run: bool,
        /// Pause between recipients in milliseconds (default: bulk.send_interval_ms)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Manage subscribers
    Contacts {
        #[command(subcommand)]
        command: ContactsCommand,
    },
    /// Show recent audit entries
    Audit {
        #[arg(long, default_value_t = 250)]
        limit: usize,
    },
    /// Show recent bulk-send attempts
    Sends {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ContactsCommand {
    /// List subscribers, most recently updated first
    List {
        /// Substring of the phone number or name
        #[arg(long, short)]
        query: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Add an opted-in subscriber
    Add {
        phone: String,
        #[arg(long)]
        name: Option<String>,
    },
    OptIn {
        phone: String,
    },
    OptOut {
        phone: String,
    },
    Rename {
        phone: String,
        name: String,
    },
    /// Total, opted-in and opted-out counts
    Counts,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let mut cfg = AppConfig::load()?;
    if let Some(db) = cli.db {
        cfg.store.path = db;
    }
    logging::init(&cfg.logging)?;
    let store = Store::open(&cfg.store.path)?;

    match cli.command {
        Command::Serve => server::serve(&cfg, store).await?,
        Command::Send {
            body,
            media_url,
            dry_run,
            interval_ms,
        } => {
            let template = body
                .or_else(|| cfg.bulk.template.clone())
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| Error::MissingConfig("--body or bulk.template".into()))?;
            let opts = BulkOptions {
                template,
                media_url: media_url.or_else(|| cfg.bulk.media_url.clone()),
                dry_run: dry_run || cfg.bulk.dry_run,
                interval: Duration::from_millis(interval_ms.unwrap_or(cfg.bulk.send_interval_ms)),
            };
            let client = cfg.twilio.send_client(cfg.request_timeout())?;
            let sender = BulkSender::new(store, client, cfg.twilio.from_number.clone());
            let report = sender.run(&opts).await?;
            println!(
                "Sent/Dry: {} | Failed: {}",
                report.delivered(),
                report.failed()
            );
        }
        Command::Contacts { command } => {
            let admin = Admin::new(&store, &cli.actor, &cfg.optin.country_code);
            match command {
                ContactsCommand::List { query, json } => {
                    let rows = store.list(query.as_deref())?;
                    if json {
                        print_json(&rows)?;
                    } else {
                        rows.iter().for_each(print_subscriber);
                    }
                }
                ContactsCommand::Add { phone, name } => {
                    print_subscriber(&admin.add(&phone, name.as_deref())?);
                }
                ContactsCommand::OptIn { phone } => {
                    print_subscriber(&admin.set_status(&phone, ConsentStatus::OptedIn)?.subscriber);
                }
                ContactsCommand::OptOut { phone } => {
                    print_subscriber(&admin.set_status(&phone, ConsentStatus::OptedOut)?.subscriber);
                }
                ContactsCommand::Rename { phone, name } => {
                    print_subscriber(&admin.rename(&phone, &name)?);
                }
                ContactsCommand::Counts => {
                    let c = store.counts()?;
                    println!(
                        "total: {} | opted in: {} | opted out: {}",
                        c.total, c.opted_in, c.opted_out
                    );
                }
            }
        }
        Command::Audit { limit } => {
            for e in store.audit_entries(limit)? {
                println!(
                    "{}  {:<8} {:<8} {}",
                    e.created_at,
                    e.action.to_uppercase(),
                    e.actor,
                    e.summary()
                );
            }
        }
        Command::Sends { limit } => {
            for e in store.recent_sends(limit)? {
                println!(
                    "{}  {:<8} {} {} {}",
                    e.created_at, e.status, e.phone, e.name, e.detail
                );
            }
        }
    }
    Ok(())
}

fn print_subscriber(s: &Subscriber) {
    println!(
        "{:<16} {:<10} {:<24} updated {}",
        s.phone,
        s.status,
        s.name.as_deref().unwrap_or("-"),
        s.updated_at
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
