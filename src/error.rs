//! Error types for every stage of the pipeline.
use thiserror::Error;

/// Failure to append a transaction to the topic.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Broker could not be reached or rejected the record.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Delivery was not confirmed within the configured message timeout.
    #[error("timed out waiting for delivery confirmation")]
    Timeout,

    #[error("serializing transaction: {0}")]
    SerializationFailure(#[from] serde_json::Error),
}

/// Failure to turn a record payload into a transaction. Never retryable:
/// the same bytes fail the same way every time.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid transaction: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ConsumeError {
    #[error("deserialization failure: {0}")]
    DeserializationFailure(#[from] DecodeError),

    #[error("broker disconnected: {0}")]
    BrokerDisconnected(String),
}

#[derive(Error, Debug)]
pub enum PersistError {
    /// Store could not be reached or the write failed transiently.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The row was rejected by the schema.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl PersistError {
    /// Whether retrying the same write may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        // SQLSTATE class 23 is "integrity constraint violation"
        match err.as_database_error().and_then(|e| e.code()) {
            Some(code) if code.starts_with("23") => {
                PersistError::ConstraintViolation(err.to_string())
            }
            _ => PersistError::StoreUnavailable(err.to_string()),
        }
    }
}
