//! Facilitator HTTP entrypoint.
//!
//! Launches the axum server exposing the payment protocol interface:
//!
//! - `GET /` – liveness check
//! - `GET /supported` – supported payment kinds and signer addresses
//! - `POST /verify` – verify a payment payload against requirements
//! - `POST /settle` – settle an accepted payment payload on-chain
//!
//! Startup order: `.env`, config file (`--config`), logging, signing key from
//! `X402_FACILITATOR_PRIVATE_KEY`, RPC provider pre-dial, then bind. Any
//! startup failure exits non-zero before the server accepts traffic.

use alloy::network::EthereumWallet;
use axum::http::Method;
use axum::{Extension, Router, routing::get, routing::post};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use tollgate::config::{FacilitatorConfig, SignerConfig};
use tollgate::facilitator_local::FacilitatorLocal;
use tollgate::provider_cache::ProviderCache;
use tollgate::telemetry;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = match FacilitatorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.log.level);

    let signer = match SignerConfig::from_env() {
        Ok(signer) => signer,
        Err(e) => {
            tracing::error!("failed to load signing key: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(signer = %signer.address, "loaded facilitator signing key");

    let max_gas_price = config
        .max_gas_price_wei()
        .expect("validated at config load");
    let wallet = EthereumWallet::from(signer.signer.clone());
    let providers = ProviderCache::new(wallet, config.rpc_urls());
    if let Err(e) = providers.init_all().await {
        tracing::error!("failed to initialize RPC providers: {e}");
        std::process::exit(1);
    }

    let facilitator = FacilitatorLocal::new(
        providers,
        config.supported.clone(),
        signer.address,
        max_gas_price,
        Duration::from_secs(config.transaction.timeout_seconds),
    );

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/supported", get(tollgate::handlers::get_supported))
        .route("/verify", post(tollgate::handlers::post_verify))
        .route("/settle", post(tollgate::handlers::post_settle))
        .layer(Extension(Arc::new(facilitator)))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let host = match config.server.host.parse::<std::net::IpAddr>() {
        Ok(host) => host,
        Err(e) => {
            tracing::error!("invalid host {}: {e}", config.server.host);
            std::process::exit(1);
        }
    };
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("starting facilitator at http://{addr}");
    tracing::info!(supported = ?config.supported, "supported payment kinds");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind to {addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
    tracing::info!("facilitator stopped");
}

/// Resolves on SIGINT or SIGTERM so in-flight requests can drain.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
