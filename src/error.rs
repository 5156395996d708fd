use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("not authorized: {0}")]
    Authorization(String),
    #[error("transient job failure: {0}")]
    TransientJob(String),
    #[error("job failed permanently after {attempts} attempt(s): {reason}")]
    PermanentJob { attempts: u32, reason: String },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        AppError::NotFound { entity, id }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Authorization(message.into())
    }

    /// Errors the fulfillment worker retries with backoff. Everything else
    /// marks the job dead on first sight.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransientJob(_) | AppError::Db(_) | AppError::Io(_) | AppError::Http(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_and_transient_errors_are_retryable() {
        assert!(AppError::TransientJob("renderer timeout".into()).is_retryable());
        assert!(AppError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_retryable());
        assert!(!AppError::validation("amount must be positive").is_retryable());
        assert!(!AppError::not_found("invoice", 7).is_retryable());
        assert!(!AppError::forbidden("bill 3 belongs to another user").is_retryable());
        assert!(!AppError::PermanentJob {
            attempts: 5,
            reason: "renderer offline".into()
        }
        .is_retryable());
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(AppError::not_found("bill", 12).to_string(), "bill 12 not found");
    }
}
