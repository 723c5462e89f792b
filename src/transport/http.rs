//! HTTP transport — CloudEvents push delivery.
//!
//! `POST /` accepts one event in binary or structured mode. The response code
//! tells the sender whether to retry:
//! - `200` acknowledged
//! - `202` rejected (not for us, don't retry)
//! - `400` malformed envelope or payload (sender's fault)
//! - `500` handler failure (may retry)
//! - `503` canceled during shutdown (retry elsewhere)

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use percent_encoding::percent_decode;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::Transport;
use crate::envelope::{Envelope, is_structured_content_type};
use crate::error::{EnvelopeError, TransportError};
use crate::pipeline::{Deliver, Outcome};

/// Handler state shared across requests.
#[derive(Clone)]
struct HttpState {
    receiver: Arc<dyn Deliver>,
    shutdown: CancellationToken,
}

/// JSON body returned with every response.
#[derive(Debug, Serialize)]
struct Receipt {
    ack: bool,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl From<&Outcome> for Receipt {
    fn from(outcome: &Outcome) -> Self {
        Self {
            ack: outcome.is_ack(),
            outcome: outcome.label(),
            detail: outcome.detail(),
        }
    }
}

/// Build the receiver router.
///
/// In-flight requests observe `shutdown` and answer `503` rather than
/// acknowledging work that never ran.
pub fn receiver_routes(receiver: Arc<dyn Deliver>, shutdown: CancellationToken) -> Router {
    let state = HttpState { receiver, shutdown };

    Router::new()
        .route("/", post(receive_event))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP status for an outcome.
pub fn status_for(outcome: &Outcome) -> StatusCode {
    match outcome {
        Outcome::Acknowledged => StatusCode::OK,
        Outcome::Rejected(_) => StatusCode::ACCEPTED,
        Outcome::DecodeFailed { .. } => StatusCode::BAD_REQUEST,
        Outcome::HandlerFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        Outcome::Canceled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "prepper"
    }))
}

// ── Events ──────────────────────────────────────────────────────────────

async fn receive_event(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = match envelope_from_request(&headers, body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Malformed CloudEvent request");
            let receipt = Receipt {
                ack: false,
                outcome: "malformed",
                detail: Some(e.to_string()),
            };
            return (StatusCode::BAD_REQUEST, Json(receipt)).into_response();
        }
    };

    let outcome = state.receiver.deliver(envelope, &state.shutdown).await;
    (status_for(&outcome), Json(Receipt::from(&outcome))).into_response()
}

fn envelope_from_request(headers: &HeaderMap, body: Bytes) -> Result<Envelope, EnvelopeError> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());

    if content_type.is_some_and(is_structured_content_type) {
        return Envelope::from_structured(&body);
    }

    Envelope::from_binary(
        |name| headers.get(format!("ce-{name}")).and_then(attribute_value),
        content_type,
        body.to_vec(),
    )
}

/// Binary-mode attribute values are percent-encoded UTF-8. Raw UTF-8 bytes
/// are tolerated as well.
fn attribute_value(value: &HeaderValue) -> Option<String> {
    percent_decode(value.as_bytes())
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

// ── Transport ───────────────────────────────────────────────────────────

/// Serves `receiver_routes` on a TCP port until shutdown.
pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    /// Listen on all interfaces at `port`.
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn run(
        &mut self,
        receiver: Arc<dyn Deliver>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: self.addr.to_string(),
                source,
            })?;
        info!(addr = %self.addr, "Starting receiver");

        let app = receiver_routes(receiver, shutdown.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}
