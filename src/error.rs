use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::provider::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A required field is missing or the body is malformed
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Provider(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text placed in the `error` field of the response body.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::BadRequest(msg) => msg.clone(),
            ServerError::Provider(e) => e.user_message().to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.public_message() });
        (self.status_code(), Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
