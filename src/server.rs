use axum::Router;
use sms_store::Store;
use sms_web_axum::AppState;
use sms_web_generic::WebhookProcessor;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::Result;

/// Webhook routes wired to `store` with the configured gateway and policy.
pub fn build_router(cfg: &AppConfig, store: Store) -> Result<Router> {
    let hook = cfg.twilio.webhook_client()?;
    let processor = WebhookProcessor::new(Arc::new(hook), store, cfg.optin.clone());
    Ok(sms_web_axum::router(
        AppState { processor },
        cfg.security.max_body_size,
    ))
}

/// Serve the webhook until Ctrl-C. Expose the port with a tunnel.
pub async fn serve(cfg: &AppConfig, store: Store) -> Result<()> {
    let app = build_router(cfg, store)?;
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "webhook listening on http://{}/sms (signatures {})",
        addr,
        if cfg.twilio.verify_signatures { "verified" } else { "NOT verified" }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
