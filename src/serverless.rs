//! Framework-free request handler for function-as-a-service hosting.
//!
//! `dispatch` maps an `http::Request<Bytes>` to an `http::Response` whose body
//! is a frame stream, so hosts that support streaming can forward chat events
//! as they arrive. Hosts that need a buffered body can use `collect_body`.
//! Routes, status codes and bodies mirror the actix-web adapter in `server`.

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use uuid::Uuid;

use crate::chat::{parse_chat_payload, relay_chat, SSE_RESPONSE_HEADERS};
use crate::server::{CHAT_SSE_PATH, UPLOAD_IMAGE_PATH};
use crate::sse::{error_stream, FrameStream};
use crate::upload::handle_upload;
use crate::util::{AppState, CORS_ALLOW_METHODS};

/// Response body type of the raw adapter.
pub type RelayBody = FrameStream;

fn full(bytes: Bytes) -> RelayBody {
    Box::pin(futures_util::stream::once(async move {
        Ok::<Bytes, std::io::Error>(bytes)
    }))
}

fn empty() -> RelayBody {
    Box::pin(futures_util::stream::empty::<Result<Bytes, std::io::Error>>())
}

fn with_headers(
    status: StatusCode,
    headers: &[(&'static str, &'static str)],
    body: RelayBody,
) -> Response<RelayBody> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    for &(name, value) in headers {
        resp.headers_mut().insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    resp
}

fn json_response(status: StatusCode, value: &impl serde::Serialize) -> Response<RelayBody> {
    match serde_json::to_vec(value) {
        Ok(body) => with_headers(
            status,
            &[
                ("content-type", "application/json"),
                ("access-control-allow-origin", "*"),
            ],
            full(Bytes::from(body)),
        ),
        Err(err) => {
            tracing::error!("Failed to serialize response: {}", err);
            with_headers(StatusCode::INTERNAL_SERVER_ERROR, &[], empty())
        }
    }
}

fn error_json(status: StatusCode, message: &str) -> Response<RelayBody> {
    json_response(status, &serde_json::json!({ "error": message }))
}

fn preflight() -> Response<RelayBody> {
    with_headers(
        StatusCode::OK,
        &[
            ("access-control-allow-origin", "*"),
            ("access-control-allow-methods", CORS_ALLOW_METHODS),
            ("access-control-allow-headers", "*"),
        ],
        empty(),
    )
}

/// Route one request.
pub async fn dispatch(state: &AppState, req: Request<Bytes>) -> Response<RelayBody> {
    let path = req.uri().path().to_string();
    match path.as_str() {
        CHAT_SSE_PATH | UPLOAD_IMAGE_PATH => {}
        _ => return error_json(StatusCode::NOT_FOUND, "Not found"),
    }

    let method = req.method().clone();
    match method {
        Method::OPTIONS => preflight(),
        Method::POST if path == CHAT_SSE_PATH => chat(state, req.into_body()),
        Method::POST => upload(state, req).await,
        _ => error_json(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
    }
}

fn chat(state: &AppState, body: Bytes) -> Response<RelayBody> {
    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, bytes = body.len(), "POST {} (raw handler)", CHAT_SSE_PATH);

    let frames = match parse_chat_payload(&body) {
        Ok(payload) => relay_chat(&state.http, &state.config, &payload),
        Err(err) => {
            tracing::warn!(%request_id, "Rejecting chat payload: {}", err);
            error_stream(&err.to_string())
        }
    };
    with_headers(StatusCode::OK, &SSE_RESPONSE_HEADERS, frames)
}

async fn upload(state: &AppState, req: Request<Bytes>) -> Response<RelayBody> {
    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, "POST {} (raw handler)", UPLOAD_IMAGE_PATH);

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match handle_upload(
        &state.http,
        &state.config,
        content_type.as_deref(),
        req.into_body(),
    )
    .await
    {
        Ok(result) => json_response(StatusCode::OK, &result.response()),
        Err(err) => {
            tracing::warn!(%request_id, "Upload failed: {}", err);
            error_json(err.status(), &err.to_string())
        }
    }
}

/// Buffer a response body, for hosts without streaming support.
pub async fn collect_body(mut body: RelayBody) -> Result<Bytes, std::io::Error> {
    let mut out = BytesMut::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out.freeze())
}
