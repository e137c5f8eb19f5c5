use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::{json, Value};
use shared::{ApiErrorBody, ApiResponse};

use crate::auth::cognito_service::IdentityError;
use crate::auth::jwt::JwtError;
use crate::db::RepositoryError;
use crate::predictor::PredictorError;
use crate::storage::s3_service::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{message}")]
    Upstream {
        status: StatusCode,
        message: String,
        details: Option<Value>,
    },
    #[error("{message}")]
    BadGateway {
        message: String,
        details: Option<Value>,
    },
    #[error("{message}")]
    Internal {
        message: String,
        details: Option<Value>,
    },
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal {
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Upstream { .. } => "UPSTREAM_ERROR",
            ApiError::BadGateway { .. } => "BAD_GATEWAY",
            ApiError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::Upstream { details, .. }
            | ApiError::BadGateway { details, .. }
            | ApiError::Internal { details, .. } => details.clone(),
            _ => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upstream { status, .. } => *status,
            ApiError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::failure(ApiErrorBody {
            message: self.to_string(),
            code: Some(self.code().to_string()),
            details: self.details(),
        }))
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        log::error!("Repository failure: {}", err);
        ApiError::Internal {
            message: "Database operation failed".to_string(),
            details: Some(json!(err.to_string())),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileTooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            StorageError::S3(_) => {
                log::error!("Object storage failure: {}", err);
                ApiError::Internal {
                    message: "Image upload failed".to_string(),
                    details: Some(json!(err.to_string())),
                }
            }
            _ => ApiError::Validation(err.to_string()),
        }
    }
}

impl From<PredictorError> for ApiError {
    fn from(err: PredictorError) -> Self {
        match err {
            PredictorError::Upstream { status, detail } => {
                match StatusCode::from_u16(status) {
                    Ok(status) if status.is_client_error() || status.is_server_error() => {
                        ApiError::Upstream {
                            status,
                            message: "Prediction service error".to_string(),
                            details: Some(detail),
                        }
                    }
                    _ => ApiError::BadGateway {
                        message: format!("Prediction service returned unexpected status {}", status),
                        details: Some(detail),
                    },
                }
            }
            PredictorError::Malformed(reason) => ApiError::BadGateway {
                message: "Prediction service returned a malformed response".to_string(),
                details: Some(json!(reason)),
            },
            PredictorError::Transport(e) => ApiError::Internal {
                message: "Prediction API call failed".to_string(),
                details: Some(json!(e.to_string())),
            },
        }
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        log::error!("Session token failure: {}", err);
        ApiError::internal("Failed to generate authentication token")
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        log::error!("Identity provider failure: {}", err);
        ApiError::Internal {
            message: "Authentication provider request failed".to_string(),
            details: Some(json!(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, Value) {
        let response = err.error_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_web::test]
    async fn validation_error_renders_envelope() {
        let (status, body) = body_json(ApiError::Validation("userId is required".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["message"], "userId is required");
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["error"].get("details").is_none());
    }

    #[actix_web::test]
    async fn upstream_status_and_detail_pass_through() {
        let err = ApiError::from(PredictorError::Upstream {
            status: 422,
            detail: json!("Error fetching image: 404"),
        });
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["message"], "Prediction service error");
        assert_eq!(body["error"]["details"], "Error fetching image: 404");
    }

    #[actix_web::test]
    async fn non_error_upstream_status_becomes_bad_gateway() {
        let err = ApiError::from(PredictorError::Upstream {
            status: 304,
            detail: Value::Null,
        });
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "BAD_GATEWAY");
    }

    #[test]
    fn storage_errors_map_to_client_statuses() {
        let too_large = ApiError::from(StorageError::FileTooLarge {
            size: 10,
            max: 5,
        });
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let empty = ApiError::from(StorageError::EmptyFile);
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);

        let s3 = ApiError::from(StorageError::S3("timeout".into()));
        assert_eq!(s3.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(s3.to_string(), "Image upload failed");
    }
}
