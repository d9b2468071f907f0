use std::path::PathBuf;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

use lke_relay::config::RelayConfig;
use lke_relay::server::config_routes;
use lke_relay::util::{cors_config_from_env, init_tracing, AppState};

/// Relay chat SSE streams and image uploads to the LKE bot platform.
#[derive(Debug, Parser)]
#[command(name = "lke-relay", version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8088")]
    bind: String,

    /// Optional YAML config file; environment variables take precedence.
    #[arg(long, env = "LKE_RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Loads .env before clap reads env fallbacks
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RelayConfig::default(),
    };
    config.apply_env();

    let missing = config.missing_secrets();
    if !missing.is_empty() {
        tracing::warn!(
            "Missing secrets: {}; upstream calls will fail until they are set",
            missing.join(", ")
        );
    }
    tracing::info!(?config, "Relay configuration loaded");

    let state = web::Data::new(AppState::new(config));

    tracing::info!("Listening on {}", args.bind);
    HttpServer::new(move || {
        App::new()
            .wrap(cors_config_from_env())
            .app_data(state.clone())
            .configure(config_routes)
    })
    .bind(&args.bind)
    .with_context(|| format!("binding {}", args.bind))?
    .run()
    .await?;

    Ok(())
}
