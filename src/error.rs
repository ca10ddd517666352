use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::{datastore::DatastoreError, grant::GrantError, models::ErrorResponse};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Unauthorized(String),
    /// The message is what the client sees; the source only reaches the log.
    #[error("{message}")]
    Persistence {
        message: &'static str,
        #[source]
        source: DatastoreError,
    },
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn persistence(message: &'static str, source: DatastoreError) -> Self {
        Self::Persistence { message, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Configuration(_) | Self::Persistence { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<GrantError> for ApiError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::MissingPrivateKey => {
                Self::Configuration("ImageKit private key not configured".to_string())
            }
            GrantError::InvalidKey(_) => {
                Self::Configuration("Failed to generate authentication".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Configuration(message) => error!("configuration error: {}", message),
            Self::Persistence { message, source } => error!("{}: {}", message, source),
            Self::Internal(source) => error!("internal error: {:#}", source),
            other => warn!(status = status.as_u16(), "request rejected: {}", other),
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
