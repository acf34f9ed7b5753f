//! HTTP handlers
//!
//! The stable surface: `/register` allocates a viewer, `/watch` serves the
//! multipart image stream, `/stream` performs the publisher offer/answer
//! exchange. Per-request failures map onto plain-text status responses;
//! background failures never surface here.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::Error;
use crate::placeholder;
use crate::relay::{ConnectionManager, RelayError, Subscriber};
use crate::signaling::{self, SdpMessage};

use super::multipart;
use super::AppState;

const MAX_CODE_LEN: usize = 32;

/// Query parameters shared by the channel-scoped routes.
#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub code: Option<String>,
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
}

fn valid_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn required_code(query: &ChannelQuery) -> Option<String> {
    query.code.as_deref().filter(|code| valid_code(code)).map(str::to_string)
}

/// Parsed `clientID`, `None` when absent or empty, `Err` when not an
/// integer.
fn parsed_client_id(query: &ChannelQuery) -> Result<Option<u32>, ()> {
    match query.client_id.as_deref() {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<u32>().map(Some).map_err(|_| ()),
    }
}

/// `GET /register?code=` — ensure the channel exists and allocate a
/// viewer. Returns the viewer id as plain text.
pub async fn register(State(state): State<AppState>, Query(query): Query<ChannelQuery>) -> Response {
    let Some(code) = required_code(&query) else {
        return (StatusCode::BAD_REQUEST, "channel code required").into_response();
    };

    state.manager.create_channel(&code).await;
    match state.manager.add_subscriber(&code, 0).await {
        Ok(subscriber) => (StatusCode::OK, subscriber.id().to_string()).into_response(),
        Err(e) => {
            tracing::error!(channel = %code, error = %e, "viewer registration failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to add viewer").into_response()
        }
    }
}

/// `GET /watch?code=&clientID?=` — long-lived multipart image stream.
/// Reuses the registered viewer when `clientID` names one, otherwise
/// attaches a new viewer.
pub async fn watch(State(state): State<AppState>, Query(query): Query<ChannelQuery>) -> Response {
    let Some(code) = required_code(&query) else {
        return (StatusCode::BAD_REQUEST, "channel code required").into_response();
    };
    let Ok(client_id) = parsed_client_id(&query) else {
        return (StatusCode::BAD_REQUEST, "invalid clientID").into_response();
    };

    let Some(channel) = state.manager.validate_channel(&code).await else {
        return (StatusCode::NOT_FOUND, "channel not found").into_response();
    };

    let subscriber = match client_id {
        Some(id) => match channel.get_subscriber(id).await {
            Some(subscriber) => subscriber,
            None => match channel.add_subscriber(id).await {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    tracing::debug!(channel = %code, client = id, error = %e, "viewer attach failed");
                    return (StatusCode::BAD_REQUEST, "failed to attach viewer").into_response();
                }
            },
        },
        None => match channel.add_subscriber(0).await {
            Ok(subscriber) => subscriber,
            Err(e) => {
                tracing::error!(channel = %code, error = %e, "viewer attach failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "failed to attach viewer")
                    .into_response();
            }
        },
    };

    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, Infallible>>(1);
    tokio::spawn(egress_loop(
        Arc::clone(&state.manager),
        Arc::clone(&state.config),
        code,
        subscriber,
        body_tx,
    ));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, multipart::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(body_rx)),
    )
        .into_response()
}

/// Pump mailbox frames into the response body until the viewer is removed
/// or the client goes away. Mailbox silence is bridged with keep-alive
/// frames.
async fn egress_loop(
    manager: Arc<ConnectionManager>,
    config: Arc<crate::config::RelayConfig>,
    code: String,
    subscriber: Arc<Subscriber>,
    body_tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    loop {
        let frame = tokio::select! {
            _ = subscriber.done().cancelled() => break,
            received = timeout(config.keepalive_timeout, subscriber.mailbox().recv()) => {
                match received {
                    Ok(frame) => frame,
                    Err(_) => placeholder::keepalive_frame(),
                }
            }
        };

        // A failed send means the HTTP client disconnected.
        if body_tx
            .send(Ok(multipart::encode_part(&frame)))
            .await
            .is_err()
        {
            break;
        }
    }

    if let Err(e) = manager.remove_subscriber(&code, subscriber.id()).await {
        tracing::debug!(channel = %code, client = subscriber.id(), error = %e, "viewer already removed");
    }
    tracing::debug!(channel = %code, client = subscriber.id(), "egress finished");
}

/// `POST /stream?code=` — publisher offer/answer exchange.
pub async fn publish(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
    body: String,
) -> Response {
    let Some(code) = required_code(&query) else {
        return (StatusCode::BAD_REQUEST, "invalid channel code").into_response();
    };
    if parsed_client_id(&query).is_err() {
        return (StatusCode::BAD_REQUEST, "invalid clientID").into_response();
    }

    let offer: SdpMessage = match serde_json::from_str(&body) {
        Ok(offer) => offer,
        Err(e) => {
            tracing::debug!(channel = %code, error = %e, "unparsable offer");
            return (StatusCode::BAD_REQUEST, "invalid offer").into_response();
        }
    };

    match signaling::accept_offer(&state.manager, &state.config, &code, offer).await {
        Ok(answer) => axum::Json(answer).into_response(),
        Err(e) => publish_error_response(&code, e),
    }
}

fn publish_error_response(code: &str, error: Error) -> Response {
    match &error {
        Error::Relay(RelayError::ChannelNotFound(_)) => {
            (StatusCode::BAD_REQUEST, "invalid channel code").into_response()
        }
        Error::Relay(RelayError::NoSubscribers(_)) => {
            (StatusCode::BAD_REQUEST, "no viewers on channel").into_response()
        }
        Error::InvalidOffer(_) => (StatusCode::BAD_REQUEST, "invalid offer").into_response(),
        _ => {
            tracing::error!(channel = %code, error = %error, "publisher admission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to create media session",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::RelayConfig;
    use crate::server::{router, AppState};

    use super::*;

    fn test_state() -> AppState {
        AppState {
            manager: ConnectionManager::new(),
            config: Arc::new(RelayConfig::default()),
        }
    }

    async fn get(state: &AppState, uri: &str) -> Response {
        router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(state: &AppState, uri: &str, body: &str) -> Response {
        router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_register_requires_code() {
        let state = test_state();
        let response = get(&state, "/register").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_code() {
        let state = test_state();
        let response = get(&state, "/register?code=bad%20code").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_register_allocates_sequential_ids() {
        let state = test_state();

        let first = get(&state, "/register?code=ABC123").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_text(first).await, "1");

        let second = get(&state, "/register?code=ABC123").await;
        assert_eq!(body_text(second).await, "2");
    }

    #[tokio::test]
    async fn test_watch_unknown_channel() {
        let state = test_state();
        let response = get(&state, "/watch?code=ABC123").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_watch_rejects_non_integer_client_id() {
        let state = test_state();
        state.manager.create_channel("ABC123").await;

        let response = get(&state, "/watch?code=ABC123&clientID=abc").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_watch_streams_multipart() {
        let state = test_state();

        let registered = get(&state, "/register?code=ABC123").await;
        assert_eq!(body_text(registered).await, "1");

        let response = get(&state, "/watch?code=ABC123&clientID=1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some(multipart::CONTENT_TYPE)
        );
    }

    #[tokio::test]
    async fn test_publish_unknown_channel() {
        let state = test_state();
        let response = post(
            &state,
            "/stream?code=NOPE",
            r#"{"type":"offer","sdp":"v=0"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_rejects_unparsable_offer() {
        let state = test_state();
        state.manager.create_channel("ABC123").await;
        state.manager.add_subscriber("ABC123", 0).await.unwrap();

        let response = post(&state, "/stream?code=ABC123", "not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_removes_channel() {
        let state = test_state();
        state.manager.create_channel("XYZ000").await;

        let publish = post(
            &state,
            "/stream?code=XYZ000",
            r#"{"type":"offer","sdp":"v=0"}"#,
        )
        .await;
        assert_eq!(publish.status(), StatusCode::BAD_REQUEST);

        let watch = get(&state, "/watch?code=XYZ000").await;
        assert_eq!(watch.status(), StatusCode::NOT_FOUND);
    }
}
