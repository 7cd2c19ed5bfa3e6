use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use kobs_core::Error;

/// Wraps the shared error kinds so handlers can use `?`. Every error is
/// rendered as a `{"error": "..."}` envelope with the status derived from
/// the kind.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Authentication => StatusCode::UNAUTHORIZED,
            Error::Authorization(_) => StatusCode::FORBIDDEN,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unsupported(_) => StatusCode::BAD_REQUEST,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_status() {
        let cases = [
            (Error::Configuration("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Authentication, StatusCode::UNAUTHORIZED),
            (Error::Authorization("x".into()), StatusCode::FORBIDDEN),
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::Unsupported("x".into()), StatusCode::BAD_REQUEST),
            (Error::Upstream("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }

    #[test]
    fn authentication_errors_hide_details() {
        assert_eq!(ApiError(Error::Authentication).0.to_string(), "unauthorized");
    }
}
