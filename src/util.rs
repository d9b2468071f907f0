use actix_web::HttpResponse;
use http::StatusCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::RelayConfig;

/// Methods advertised on CORS preflight responses.
pub const CORS_ALLOW_METHODS: &str = "POST, OPTIONS";

/// Load dotenv files and initialize structured tracing based on RUST_LOG.
///
/// Lookup order for the environment file:
/// - explicit paths via ENV_FILE or DOTENV_PATH
/// - `.env` discovered from the working directory
///
/// Variables already present in the process environment are never overwritten.
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none" {
        if let Ok(path) = dotenvy::dotenv() {
            env_source = path.display().to_string();
        }
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,actix_web=info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::info!("Environment loaded from: {}", env_source);
}

/// Shared application state used by both adapters.
#[derive(Clone)]
pub struct AppState {
    pub http: reqwest::Client,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            http: build_http_client(&config),
            config: Arc::new(config),
        }
    }
}

/// Build the upstream HTTP client.
///
/// The upstream timeout bounds connection setup and every wait for the next
/// body bytes, never the total length of a streamed response.
///
/// Environment:
/// - LKE_RELAY_NO_PROXY = 1|true|yes|on -> disable all proxies
/// - LKE_RELAY_PROXY_URL = <url>        -> proxy for all schemes
pub fn build_http_client(config: &RelayConfig) -> reqwest::Client {
    let timeout = config.upstream_timeout();
    let mut builder = reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout);

    let no_proxy = std::env::var("LKE_RELAY_NO_PROXY")
        .map(|v| v.trim().to_ascii_lowercase())
        .map(|v| v == "1" || v == "true" || v == "yes" || v == "on")
        .unwrap_or(false);

    if no_proxy {
        builder = builder.no_proxy();
    } else if let Ok(url) = std::env::var("LKE_RELAY_PROXY_URL") {
        let u = url.trim();
        if !u.is_empty() {
            match reqwest::Proxy::all(u) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => tracing::warn!("Ignoring invalid LKE_RELAY_PROXY_URL: {}", e),
            }
        }
    }

    builder = builder.user_agent(format!("lke-relay/{}", env!("CARGO_PKG_VERSION")));

    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Falling back to default HTTP client: {}", e);
        reqwest::Client::new()
    })
}

/// Build a JSON error response `{"error": msg}` with permissive CORS.
pub fn error_response(status: StatusCode, msg: &str) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(status.as_u16())
        .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status)
        .insert_header(("access-control-allow-origin", "*"))
        .json(serde_json::json!({ "error": msg }))
}

/// Build a CORS configuration from environment variables for Actix-web.
///
/// Environment variables:
/// - CORS_ALLOWED_ORIGINS: "*" or comma-separated origins (e.g., "https://a.com, https://b.com")
/// - CORS_ALLOWED_METHODS: "*" or comma-separated methods (e.g., "POST,OPTIONS")
/// - CORS_ALLOWED_HEADERS: "*" or comma-separated request header names
/// - CORS_MAX_AGE: max age in seconds (usize)
///
/// Defaults are permissive.
pub fn cors_config_from_env() -> actix_cors::Cors {
    let mut cors = actix_cors::Cors::default();

    match std::env::var("CORS_ALLOWED_ORIGINS") {
        Ok(origins) if origins.trim() != "*" => {
            for part in split_list(&origins) {
                cors = cors.allowed_origin(part);
            }
        }
        _ => cors = cors.allow_any_origin().send_wildcard(),
    }

    match std::env::var("CORS_ALLOWED_METHODS") {
        Ok(methods) if methods.trim() != "*" => {
            let methods = split_list(&methods);
            if !methods.is_empty() {
                cors = cors.allowed_methods(methods);
            }
        }
        _ => cors = cors.allow_any_method(),
    }

    match std::env::var("CORS_ALLOWED_HEADERS") {
        Ok(headers) if headers.trim() != "*" => {
            for h in split_list(&headers) {
                cors = cors.allowed_header(h);
            }
        }
        _ => cors = cors.allow_any_header(),
    }

    if let Ok(secs) = std::env::var("CORS_MAX_AGE") {
        if let Ok(n) = secs.trim().parse::<usize>() {
            cors = cors.max_age(n);
        }
    }

    cors
}

fn split_list(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list(" https://a.com, ,https://b.com "),
            vec!["https://a.com", "https://b.com"]
        );
    }

    #[actix_rt::test]
    async fn error_response_uses_flat_error_shape() {
        let resp = error_response(StatusCode::BAD_REQUEST, "no file");
        assert_eq!(resp.status().as_u16(), 400);
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, serde_json::json!({ "error": "no file" }));
    }
}
