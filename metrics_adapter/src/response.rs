use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::provider::ProviderError;

pub type HandlerResult<T> = Result<Json<T>, ErrResponse>;

#[derive(Debug, Serialize)]
pub struct ErrResponse {
    pub msg: String,
    pub cause: Option<String>,
    #[serde(skip)]
    pub status: StatusCode,
}

impl ErrResponse {
    pub fn bad_request(msg: String) -> Self {
        Self {
            msg,
            cause: None,
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(msg: String) -> Self {
        Self {
            msg,
            cause: None,
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn unavailable(msg: String, cause: Option<String>) -> Self {
        Self {
            msg,
            cause,
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ProviderError> for ErrResponse {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(cause) => ErrResponse::unavailable(
                "metrics service unreachable".to_string(),
                Some(cause),
            ),
            ProviderError::Upstream(msg) if msg == "not-found" => {
                ErrResponse::not_found("unknown metric".to_string())
            },
            ProviderError::Upstream(msg) => Self {
                msg: "metrics service error".to_string(),
                cause: Some(msg),
                status: StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ErrResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self)).into_response()
    }
}
