use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed CDC envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Fatal Kafka error: {0}")]
    KafkaFatal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transport faults that end the consumer loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::KafkaFatal(_) | AppError::Config(_))
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        match err.rdkafka_error_code() {
            Some(rdkafka::types::RDKafkaErrorCode::Fatal) => AppError::KafkaFatal(err.to_string()),
            _ => AppError::Kafka(err.to_string()),
        }
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::KafkaFatal("x".into()).is_fatal());
        assert!(AppError::Config("x".into()).is_fatal());
        assert!(!AppError::Kafka("broker down".into()).is_fatal());
        assert!(!AppError::Validation("x".into()).is_fatal());
        assert!(!AppError::MalformedEnvelope("x".into()).is_fatal());
        assert!(!AppError::Internal("x".into()).is_fatal());
    }
}
