//! Chat relay: forward one chat request to the vendor SSE endpoint and
//! re-emit its events to the caller.

use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use crate::config::RelayConfig;
use crate::sse::{error_stream, relay_frames, FrameStream};

/// Header carrying the application credential upstream.
pub const APP_KEY_HEADER: &str = "x-app-key";

/// Response headers of every chat stream, shared by both adapters.
pub const SSE_RESPONSE_HEADERS: [(&str, &str); 5] = [
    ("content-type", "text/event-stream"),
    ("cache-control", "no-cache"),
    ("x-accel-buffering", "no"),
    ("connection", "keep-alive"),
    ("access-control-allow-origin", "*"),
];

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid chat payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("{0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
}

/// Decode the inbound body. The payload is forwarded as-is, so any JSON
/// value is accepted.
pub fn parse_chat_payload(body: &[u8]) -> Result<Value, ChatError> {
    Ok(serde_json::from_slice(body)?)
}

/// Relay `payload` to the chat endpoint.
///
/// The returned stream always completes normally: failures to connect, a
/// non-2xx upstream status and read errors each end the stream with a single
/// `{"error": ...}` frame. There is exactly one upstream attempt.
pub fn relay_chat(http: &reqwest::Client, config: &RelayConfig, payload: &Value) -> FrameStream {
    let request = http
        .post(&config.chat_sse_url)
        .header("accept", "text/event-stream")
        .header(APP_KEY_HEADER, &config.bot_app_key)
        .json(payload);

    let frames = stream::once(async move {
        match open_upstream(request).await {
            Ok(resp) => relay_frames(Box::pin(resp.bytes_stream())),
            Err(err) => {
                tracing::warn!("Chat upstream failed: {}", err);
                error_stream(&err.to_string())
            }
        }
    })
    .flatten();

    Box::pin(frames)
}

async fn open_upstream(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ChatError> {
    let resp = request.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ChatError::Upstream {
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}
