pub mod api;
pub mod dtos;
pub mod error;
pub mod services;
pub mod utils;

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use once_cell::sync::Lazy;
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyCors, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use api::{RelayController, health_controller::health_endpoint};
use dtos::error_dto::ErrorResponse;
use services::RelayServices;

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

pub fn get_uptime_seconds() -> u64 {
    START_TIME.elapsed().as_secs()
}

pub fn get_app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub struct RelayApplicationServer;

impl RelayApplicationServer {
    pub async fn serve(config: Arc<AppConfig>) -> anyhow::Result<()> {
        Lazy::force(&START_TIME);

        let services = RelayServices::new(config.clone())?;
        let router = Self::router(services);

        let listener = TcpListener::bind(config.listen_address())
            .await
            .with_context(|| format!("failed to bind {}", config.listen_address()))?;

        let addr = listener
            .local_addr()
            .context("listener has no local address")?;
        info!("relay running at http://{}", addr);
        info!("use: http://{}/proxy?url=<encoded_stream_url>", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(Self::shutdown_signal())
            .await
            .context("relay server exited with an error")?;

        info!("relay shut down");
        Ok(())
    }

    pub fn router(services: RelayServices) -> Router {
        let cors = Self::cors_layer(&services.config.cors_origin);

        Router::new()
            .merge(RelayController::app())
            .route("/health", get(health_endpoint))
            .layer(Extension(services))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            // a panicking request gets a json 500, the listener keeps going
            .layer(CatchPanicLayer::custom(Self::panic_response))
    }

    fn cors_layer(cors_origin: &str) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods(AnyCors)
            .allow_headers(AnyCors);

        if cors_origin.trim() == "*" {
            return layer.allow_origin(AnyCors);
        }

        let origins: Vec<HeaderValue> = cors_origin
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring invalid CORS origin {}: {}", o, e);
                    None
                }
            })
            .collect();

        layer.allow_origin(AllowOrigin::list(origins))
    }

    fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
        let msg = if let Some(s) = panic.downcast_ref::<&'static str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "request handler panicked".to_string()
        };

        error!("Request handler panicked: {}", msg);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(msg)),
        )
            .into_response()
    }

    async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("shutdown signal received, draining connections...");
    }
}
