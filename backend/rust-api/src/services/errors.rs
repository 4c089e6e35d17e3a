use mongodb::bson::oid::ObjectId;
use thiserror::Error;

/// Domain failures that map onto a specific HTTP status.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    TooManyRequests {
        message: String,
        retry_after_secs: u64,
    },
}

/// Parses a hex ObjectId, reporting `what` as not found when malformed.
pub fn parse_object_id(raw: &str, what: &str) -> Result<ObjectId, ServiceError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ServiceError::NotFound(format!("{what} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_ids_read_as_not_found() {
        let err = parse_object_id("not-an-id", "Article").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(ref msg) if msg == "Article not found"));

        let id = ObjectId::new();
        assert_eq!(parse_object_id(&id.to_hex(), "Article").unwrap(), id);
    }
}
