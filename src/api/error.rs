//! Translate service errors into HTTP responses.
//!
//! Denials all collapse to one 401 body so callers cannot tell an unknown
//! user from a wrong password. System failures are logged and answered with
//! a generic 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::{error::Error, store::StoreError};

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::AuthenticationDenied(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Conflict(_) | Error::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Decryption(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Store(StoreError::Timeout) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Store(StoreError::Backend(_))
            | Error::Encryption(_)
            | Error::Configuration(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            Error::Validation(err) => err.to_string(),
            Error::AuthenticationDenied(_) => "authentication failed".to_string(),
            Error::Forbidden => "forbidden".to_string(),
            Error::Conflict(_) | Error::Store(StoreError::Conflict(_)) => {
                "resource already exists".to_string()
            }
            Error::NotFound(what) => format!("{what} not found"),
            Error::Decryption(_) => "value could not be retrieved".to_string(),
            Error::Store(StoreError::Timeout) => "service temporarily unavailable".to_string(),
            _ => "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.message(),
            }),
        )
            .into_response()
    }
}
