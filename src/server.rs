use actix_web::http::{header, Method};
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use uuid::Uuid;

use crate::chat::{parse_chat_payload, relay_chat, SSE_RESPONSE_HEADERS};
use crate::sse::error_stream;
use crate::upload::handle_upload;
use crate::util::{error_response, AppState, CORS_ALLOW_METHODS};

pub const CHAT_SSE_PATH: &str = "/api/chat/sse";
pub const UPLOAD_IMAGE_PATH: &str = "/api/upload-image";

/// Configure Actix-web routes with AppState.
pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(status))
        .service(
            web::resource(CHAT_SSE_PATH)
                .route(web::post().to(chat_sse))
                .route(web::method(Method::OPTIONS).to(preflight))
                .default_service(web::to(method_not_allowed)),
        )
        .service(
            web::resource(UPLOAD_IMAGE_PATH)
                .route(web::post().to(upload_image))
                .route(web::method(Method::OPTIONS).to(preflight))
                .default_service(web::to(method_not_allowed)),
        );
}

/// Service status endpoint; reports which secrets are configured, never their values.
async fn status(state: web::Data<AppState>) -> impl Responder {
    let config = &state.config;
    web::Json(serde_json::json!({
        "name": "lke-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": ["/status", CHAT_SSE_PATH, UPLOAD_IMAGE_PATH],
        "configured": {
            "bot_app_key": !config.bot_app_key.is_empty(),
            "secret_id": !config.secret_id.is_empty(),
            "secret_key": !config.secret_key.is_empty(),
            "bot_biz_id": !config.bot_biz_id.is_empty(),
        },
        "region": config.region,
    }))
}

/// CORS preflight: 200, empty body, no upstream call.
async fn preflight() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(("access-control-allow-origin", "*"))
        .insert_header(("access-control-allow-methods", CORS_ALLOW_METHODS))
        .insert_header(("access-control-allow-headers", "*"))
        .finish()
}

async fn method_not_allowed() -> HttpResponse {
    error_response(http::StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/// Relay a chat request and stream the upstream events back as SSE.
async fn chat_sse(state: web::Data<AppState>, payload: web::Payload) -> HttpResponse {
    let request_id = Uuid::new_v4();

    let frames = match read_payload(payload).await {
        Ok(body) => {
            tracing::info!(%request_id, bytes = body.len(), "POST {}", CHAT_SSE_PATH);
            match parse_chat_payload(&body) {
                Ok(value) => relay_chat(&state.http, &state.config, &value),
                Err(err) => {
                    tracing::warn!(%request_id, "Rejecting chat payload: {}", err);
                    error_stream(&err.to_string())
                }
            }
        }
        Err(err) => {
            tracing::warn!(%request_id, "Failed to read chat body: {}", err);
            error_stream(&format!("Failed to read request body: {}", err))
        }
    };

    let mut response = HttpResponse::Ok();
    for (name, value) in SSE_RESPONSE_HEADERS {
        response.insert_header((name, value));
    }
    response.streaming(frames)
}

/// Read the whole request body. No local size limit is applied, unlike the
/// `web::Bytes` extractor.
async fn read_payload(
    mut payload: web::Payload,
) -> Result<Bytes, actix_web::error::PayloadError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body.freeze())
}

/// Store the uploaded `file` part and return its public URL.
async fn upload_image(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> HttpResponse {
    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, "POST {}", UPLOAD_IMAGE_PATH);

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match read_payload(payload).await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(%request_id, "Failed to read upload body: {}", err);
            return error_response(
                http::StatusCode::BAD_REQUEST,
                &format!("Failed to read request body: {}", err),
            );
        }
    };

    match handle_upload(&state.http, &state.config, content_type.as_deref(), body).await {
        Ok(result) => {
            tracing::info!(%request_id, cos_path = %result.cos_path, "Upload stored");
            HttpResponse::Ok()
                .insert_header(("access-control-allow-origin", "*"))
                .json(result.response())
        }
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                tracing::error!(%request_id, "Upload failed: {}", err);
            } else {
                tracing::warn!(%request_id, "Upload rejected: {}", err);
            }
            error_response(status, &err.to_string())
        }
    }
}
