use std::fmt;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

/// Error kinds of the explorer, mapped onto HTTP statuses at the API edge.
/// The transient kinds are retried by the background loops, never surfaced
/// as anything but 500 to callers.
#[derive(Debug)]
pub enum ExplorerError {
    Validation(String),
    Unauthenticated(String),
    PaymentRequired(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    ChainTransient(String),
    StoreTransient(String),
    Fatal(String),
}

impl fmt::Display for ExplorerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorerError::Validation(msg) => write!(f, "{}", msg),
            ExplorerError::Unauthenticated(msg) => write!(f, "{}", msg),
            ExplorerError::PaymentRequired(msg) => write!(f, "{}", msg),
            ExplorerError::Forbidden(msg) => write!(f, "{}", msg),
            ExplorerError::NotFound(msg) => write!(f, "{}", msg),
            ExplorerError::Conflict(msg) => write!(f, "{}", msg),
            ExplorerError::ChainTransient(msg) => write!(f, "chain error: {}", msg),
            ExplorerError::StoreTransient(msg) => write!(f, "store error: {}", msg),
            ExplorerError::Fatal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ExplorerError {}

impl From<redis::RedisError> for ExplorerError {
    fn from(err: redis::RedisError) -> Self {
        ExplorerError::StoreTransient(err.to_string())
    }
}

impl From<serde_json::Error> for ExplorerError {
    fn from(err: serde_json::Error) -> Self {
        ExplorerError::Validation(err.to_string())
    }
}

impl From<anyhow::Error> for ExplorerError {
    fn from(err: anyhow::Error) -> Self {
        ExplorerError::Fatal(err.to_string())
    }
}

impl actix_web::ResponseError for ExplorerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ExplorerError::Validation(_) => StatusCode::BAD_REQUEST,
            ExplorerError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ExplorerError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ExplorerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ExplorerError::NotFound(_) => StatusCode::NOT_FOUND,
            ExplorerError::Conflict(_) => StatusCode::CONFLICT,
            ExplorerError::ChainTransient(_)
            | ExplorerError::StoreTransient(_)
            | ExplorerError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

pub type Result<T> = std::result::Result<T, ExplorerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn kinds_map_to_the_documented_statuses() {
        let cases = [
            (ExplorerError::Validation("v".into()), 400),
            (ExplorerError::Unauthenticated("u".into()), 401),
            (ExplorerError::PaymentRequired("p".into()), 402),
            (ExplorerError::Forbidden("f".into()), 403),
            (ExplorerError::NotFound("n".into()), 404),
            (ExplorerError::Conflict("c".into()), 409),
            (ExplorerError::ChainTransient("c".into()), 500),
            (ExplorerError::StoreTransient("s".into()), 500),
            (ExplorerError::Fatal("f".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{:?}", err);
        }
    }
}
