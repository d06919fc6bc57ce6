use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use sms_core::{Headers, HttpStatus, WebhookResponse};
use sms_web_generic::{HeaderConverter, ResponseConverter, WebhookProcessor};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub processor: WebhookProcessor,
}

/// Axum-specific header converter
pub struct AxumHeaderConverter;

impl HeaderConverter for AxumHeaderConverter {
    type HeaderType = HeaderMap;

    fn to_generic_headers(headers: &Self::HeaderType) -> Headers {
        headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

/// Axum-specific response converter
pub struct AxumResponseConverter;

impl ResponseConverter for AxumResponseConverter {
    type ResponseType = Response;

    fn from_webhook_response(response: WebhookResponse) -> Self::ResponseType {
        let status = StatusCode::from_u16(response.status.as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = HeaderValue::from_str(&response.content_type)
            .unwrap_or(HeaderValue::from_static("text/plain"));
        (status, [(header::CONTENT_TYPE, content_type)], response.body).into_response()
    }
}

/// Gateway callback: POST /sms
pub async fn sms_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let processor = state.processor.clone();
    let generic_headers = AxumHeaderConverter::to_generic_headers(&headers);

    // the store is synchronous
    let response =
        tokio::task::spawn_blocking(move || processor.process_webhook(generic_headers, &body))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "webhook task failed");
                WebhookResponse::error(HttpStatus::InternalServerError, "internal error")
            });
    AxumResponseConverter::from_webhook_response(response)
}

pub async fn health() -> &'static str {
    "ok"
}

/// Routes for the public webhook surface.
pub fn router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/sms", post(sms_webhook))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use sms_store::Store;
    use sms_twilio::TwilioClient;
    use sms_web_generic::OptInPolicy;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, Store) {
        let store = Store::open_in_memory().unwrap();
        let processor = WebhookProcessor::new(
            Arc::new(TwilioClient::new("AC123", "token")),
            store.clone(),
            OptInPolicy::default(),
        );
        (router(AppState { processor }, 16 * 1024), store)
    }

    fn form(body: impl Into<String>) -> Request<Body> {
        Request::post("/sms")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.into()))
            .unwrap()
    }

    #[tokio::test]
    async fn join_returns_twiml() {
        let (app, store) = app();
        let res = app
            .oneshot(form("From=%2B15551234567&Body=JOIN"))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/xml");
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("<Response><Message>"));
        assert!(store.get("+15551234567").unwrap().unwrap().is_opted_in());
    }

    #[tokio::test]
    async fn malformed_form_is_bad_request() {
        let (app, _) = app();
        let res = app.oneshot(form("Body=JOIN")).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let (app, store) = app();
        let big = format!("From=%2B15551234567&Body={}", "x".repeat(20_000));
        let res = app.oneshot(form(big)).await.unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(store.counts().unwrap().total, 0);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = app();
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
