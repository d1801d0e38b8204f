use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnakeError {
    #[error("Enqueue error: {message}")]
    Enqueue { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Invocation error: {message}")]
    Invocation { message: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Lock wait timeout: {message}")]
    LockTimeout { message: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SnakeError {
    /// Errors that belong to a single job and end up recorded as its `Failure` result.
    pub fn is_job_level(&self) -> bool {
        matches!(
            self,
            SnakeError::Decode { .. } | SnakeError::Invocation { .. }
        )
    }

    /// Whether calling the same backend operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SnakeError::LockTimeout { .. } => true,
            SnakeError::Persistence(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        SnakeError::Decode {
            message: message.into(),
        }
    }

    /// Classify a failed statement: lock wait timeouts get their own variant so
    /// consumers can back off and poll again.
    pub(crate) fn from_statement(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // MySQL reports 1205 (ER_LOCK_WAIT_TIMEOUT) with SQLSTATE HY000,
            // PostgreSQL reports lock_not_available as 55P03.
            let code = db_err.code();
            let is_lock_timeout = match code.as_deref() {
                Some("55P03") => true,
                Some("HY000") => db_err.message().contains("Lock wait timeout"),
                _ => false,
            };
            if is_lock_timeout {
                return SnakeError::LockTimeout {
                    message: db_err.message().to_string(),
                };
            }
        }
        SnakeError::Persistence(err)
    }
}

impl From<toml::de::Error> for SnakeError {
    fn from(err: toml::de::Error) -> Self {
        SnakeError::Config(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for SnakeError {
    fn from(err: toml::ser::Error) -> Self {
        SnakeError::Config(format!("TOML serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let enqueue_error = SnakeError::Enqueue {
            message: "duplicate key".to_string(),
        };
        assert_eq!(enqueue_error.to_string(), "Enqueue error: duplicate key");

        let decode_error = SnakeError::decode("unknown target mailer::send");
        assert_eq!(
            decode_error.to_string(),
            "Decode error: unknown target mailer::send"
        );

        let not_found = SnakeError::JobNotFound { id: 42 };
        assert_eq!(not_found.to_string(), "Job not found: 42");
    }

    #[test]
    fn test_error_classification() {
        assert!(SnakeError::decode("bad").is_job_level());
        assert!(
            SnakeError::Invocation {
                message: "boom".to_string()
            }
            .is_job_level()
        );
        assert!(!SnakeError::Config("x".to_string()).is_job_level());

        let timeout = SnakeError::LockTimeout {
            message: "Lock wait timeout exceeded".to_string(),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_job_level());
        assert!(SnakeError::Persistence(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!SnakeError::Persistence(sqlx::Error::RowNotFound).is_retryable());
    }

    #[test]
    fn test_from_statement_passes_through_other_errors() {
        let err = SnakeError::from_statement(sqlx::Error::RowNotFound);
        assert!(matches!(err, SnakeError::Persistence(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_error.is_err());

        let snake_error: SnakeError = json_error.unwrap_err().into();
        assert!(matches!(snake_error, SnakeError::Serialization(_)));
    }
}
