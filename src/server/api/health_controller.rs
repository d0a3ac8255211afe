use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;

use crate::logger::Logger;
use crate::server::dtos::health_dto::{HealthResponse, HealthStatus};
use crate::server::services::relay_services::RelayServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// liveness only, upstreams are never contacted from here
pub async fn health_endpoint(
    Extension(services): Extension<RelayServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: Logger::environment_name(services.config.relay_env).to_string(),
    };

    (StatusCode::OK, Json(response))
}
