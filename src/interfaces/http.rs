//! Webhook HTTP surface.

use crate::application::webhooks::WebhookListener;
use crate::error::PaymentError;
use crate::providers::Provider;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

#[derive(Debug, Serialize)]
struct Acknowledgement {
    reference: Option<String>,
    outcome: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps a listener failure onto the status the provider will see.
struct WebhookError(PaymentError);

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PaymentError::InvalidSignature => StatusCode::UNAUTHORIZED,
            PaymentError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            PaymentError::UnknownReference(_) | PaymentError::Config(_) => StatusCode::NOT_FOUND,
            other => {
                error!(error = %other, "webhook processing failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(listener: Arc<WebhookListener>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/:provider", post(webhook))
        .with_state(listener)
}

async fn health() -> &'static str {
    "ok"
}

async fn webhook(
    State(listener): State<Arc<WebhookListener>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Acknowledgement>, WebhookError> {
    let Ok(provider) = provider.parse::<Provider>() else {
        return Err(WebhookError(PaymentError::Config(format!(
            "no webhook endpoint for {provider}"
        ))));
    };
    let signature = headers
        .get(provider.signature_header())
        .and_then(|v| v.to_str().ok());
    let settlement = listener
        .handle(provider, signature, &body)
        .await
        .map_err(WebhookError)?;
    Ok(Json(Acknowledgement {
        reference: settlement.transaction().map(|tx| tx.reference.clone()),
        outcome: settlement.label(),
    }))
}
