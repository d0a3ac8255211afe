use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::server::dtos::error_dto::ErrorResponse;

pub type AppResult<T> = Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("URL parameter required")]
    MissingUrl,

    // upstream answered, just not with a 2xx
    #[error("Upstream error: {}", .0.as_u16())]
    Upstream(StatusCode),

    #[error("Playlist exceeds {0} byte limit")]
    PlaylistTooLarge(usize),

    #[error("{0}")]
    InvalidUrl(String),

    // dns, refused, tls, timeout, or the body dying halfway through
    #[error("{0}")]
    Fetch(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingUrl => StatusCode::BAD_REQUEST,
            Self::Upstream(status) => *status,
            Self::PlaylistTooLarge(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidUrl(_) | Self::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}
