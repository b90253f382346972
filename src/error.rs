use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

/// Every way a request can be rejected. Each variant maps to an HTTP
/// status and a stable machine-readable `code` in the response body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    AuthenticationMissing,
    #[error("Token is invalid or expired, please log in again")]
    AuthenticationInvalid,
    #[error("Access denied: {0}")]
    AuthorizationDenied(String),
    #[error("Verification code has expired")]
    VerificationCodeExpired,
    #[error("Verification code is incorrect")]
    VerificationCodeMismatch,
    #[error("Invalid username or password")]
    CredentialMismatch,
    #[error("Account is frozen")]
    AccountFrozen,
    #[error("Username already exists")]
    UsernameTaken,
    #[error("User not found")]
    UserNotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("Too many attempts, try again in a few minutes")]
    RateLimited,
    #[error("Email delivery is not configured")]
    MailerUnavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationMissing | AppError::AuthenticationInvalid => {
                StatusCode::UNAUTHORIZED
            }
            AppError::AuthorizationDenied(_) | AppError::AccountFrozen => StatusCode::FORBIDDEN,
            AppError::VerificationCodeExpired
            | AppError::VerificationCodeMismatch
            | AppError::CredentialMismatch
            | AppError::UsernameTaken
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::MailerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::AuthenticationMissing => "authentication_missing",
            AppError::AuthenticationInvalid => "authentication_invalid",
            AppError::AuthorizationDenied(_) => "authorization_denied",
            AppError::VerificationCodeExpired => "captcha_expired",
            AppError::VerificationCodeMismatch => "captcha_mismatch",
            AppError::CredentialMismatch => "credential_mismatch",
            AppError::AccountFrozen => "account_frozen",
            AppError::UsernameTaken => "username_taken",
            AppError::UserNotFound => "user_not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::RateLimited => "rate_limited",
            AppError::MailerUnavailable => "mailer_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            self.status(),
            Json(json!({ "error": message, "code": self.code() })),
        )
            .into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(anyhow::Error::new(err).context("database operation failed"))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::Internal(anyhow::Error::new(err).context("cache operation failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_distinguishable() {
        let missing = AppError::AuthenticationMissing;
        let invalid = AppError::AuthenticationInvalid;
        let denied = AppError::AuthorizationDenied("missing permission `ddd`".into());

        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_ne!(missing.code(), invalid.code());
        assert_ne!(missing.code(), denied.code());
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let err = AppError::from(anyhow::anyhow!("connection refused at 10.0.0.3"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "internal_error");
        assert!(!body["error"].as_str().unwrap().contains("10.0.0.3"));
    }
}
