use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dstore_engine::{EngineError, ErrorKind};
use dstore_store::StoreError;
use dstore_types::TypeError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

pub const NOT_FOUND_MESSAGE: &str = "Item not found";
pub const UNAVAILABLE_MESSAGE: &str = "Service currently unavailable";
pub const INTERNAL_MESSAGE: &str = "Unknown internal error";
pub const BAD_GATEWAY_MESSAGE: &str = "Error while communicating to other service";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid request: {0}")]
    Invalid(#[from] TypeError),

    #[error("Required query param '{0}' was not provided.")]
    MissingParam(&'static str),

    #[error("Item not found")]
    NotFound,

    /// The object was found but its body could not be read.
    #[error("failed reading object body: {0}")]
    BodyRead(#[source] StoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Engine(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
                ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Invalid(_) | Self::MissingParam(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BodyRead(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the client. Store and internal details stay in the log.
    pub fn public_message(&self) -> String {
        match self.status() {
            StatusCode::NOT_FOUND => NOT_FOUND_MESSAGE.to_string(),
            StatusCode::SERVICE_UNAVAILABLE => UNAVAILABLE_MESSAGE.to_string(),
            StatusCode::BAD_GATEWAY => BAD_GATEWAY_MESSAGE.to_string(),
            StatusCode::BAD_REQUEST => self.to_string(),
            _ => INTERNAL_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else if status != StatusCode::NOT_FOUND {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dstore_store::StoreOperation;
    use dstore_types::EntityId;

    #[test]
    fn engine_errors_map_by_kind() {
        let not_found = ServerError::from(EngineError::NotFound(EntityId::new("a").unwrap()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.public_message(), "Item not found");

        let store = StoreError::backend(StoreOperation::List, "content/", "timeout");
        let unavailable = ServerError::from(EngineError::from(store));
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.public_message(), "Service currently unavailable");

        let malformed = ServerError::from(EngineError::malformed("k", "bad"));
        assert_eq!(malformed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(malformed.public_message(), "Unknown internal error");
    }

    #[test]
    fn missing_param_message() {
        let err = ServerError::MissingParam("date");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Required query param 'date' was not provided.");
    }

    #[test]
    fn body_read_is_bad_gateway() {
        let err = ServerError::BodyRead(StoreError::backend(StoreOperation::Read, "k", "reset"));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
