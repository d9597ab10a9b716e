//! Error taxonomy shared by the alerting core.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::server::Envelope;

/// A domain-level error with a user-visible kind.
///
/// Infrastructure failures travel as `anyhow::Error` with context attached;
/// anything a caller (or end user) is expected to act on is one of these.
#[derive(Debug)]
pub enum Error {
    /// The request itself is malformed (unknown kind, bad pattern, ...).
    Validation(String),
    /// The named thing does not exist.
    NotFound(String),
    /// Uniqueness or limit violation; retrying the same request cannot succeed.
    Conflict(String),
    /// Network, timeout or pool exhaustion; retrying later may succeed.
    Transient(String),
    /// The store rejected a write it should have accepted.
    Integrity(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Transient(_) | Error::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg)
            | Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::Transient(msg)
            | Error::Integrity(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}

/// Wrapper turning any `anyhow::Error` into an HTTP response.
///
/// Domain errors keep their status and message; everything else renders as a
/// generic retry message so internals never leak to users.
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = self.0.downcast_ref::<Error>() {
            return (err.status(), Envelope::failure(err.to_string())).into_response();
        }
        tracing::error!("app error: {:?}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Envelope::failure("something went wrong, please try again later"),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}
