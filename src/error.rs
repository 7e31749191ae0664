use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    #[error("Unsupported field {field}: {reason}")]
    UnsupportedField { field: String, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("Cursor not found: {0}")]
    CursorNotFound(String),

    #[error("Index buffer full ({capacity} messages pending)")]
    QueueFull { capacity: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Closed: {0}")]
    Closed(String),

    #[error("No search node available: {0}")]
    NoNodeAvailable(String),

    #[error("Cluster blocked: {0}")]
    ClusterBlocked(String),

    #[error("Search backend overloaded: {0}")]
    Overloaded(String),

    #[error("Search backend error: {0}")]
    Backend(String),

    #[error("Bulk request failed for {failed} of {total} items: {message}")]
    BulkFailure {
        failed: usize,
        total: usize,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Json(e.to_string())
    }
}

impl IndexError {
    /// Errors that mean the backend cluster itself is unreachable or refusing
    /// writes. Only these count toward client recycling.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            IndexError::NoNodeAvailable(_) | IndexError::ClusterBlocked(_)
        )
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, IndexError::Overloaded(_))
    }

    /// The same request may succeed if sent again later. Item-level bulk
    /// rejections are not: the backend refused the document itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::NoNodeAvailable(_)
                | IndexError::ClusterBlocked(_)
                | IndexError::Overloaded(_)
                | IndexError::QueueFull { .. }
                | IndexError::Io(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IndexError::InvalidEntity(_) => StatusCode::BAD_REQUEST,
            IndexError::UnsupportedField { .. } => StatusCode::BAD_REQUEST,
            IndexError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            IndexError::QueryParse(_) => StatusCode::BAD_REQUEST,
            IndexError::CursorNotFound(_) => StatusCode::NOT_FOUND,
            IndexError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            IndexError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IndexError::Json(_) => StatusCode::BAD_REQUEST,
            IndexError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IndexError::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
            IndexError::NoNodeAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IndexError::ClusterBlocked(_) => StatusCode::SERVICE_UNAVAILABLE,
            IndexError::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
            IndexError::Backend(_) => StatusCode::BAD_GATEWAY,
            IndexError::BulkFailure { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cluster_level_errors_count_as_connectivity() {
        assert!(IndexError::NoNodeAvailable("down".into()).is_connectivity());
        assert!(IndexError::ClusterBlocked("read_only".into()).is_connectivity());
        assert!(!IndexError::Overloaded("429".into()).is_connectivity());
        assert!(!IndexError::Backend("mapping".into()).is_connectivity());
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            IndexError::QueueFull { capacity: 10 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            IndexError::CursorNotFound("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            IndexError::InvalidQuery("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn bulk_item_rejections_are_not_retryable() {
        let err = IndexError::BulkFailure {
            failed: 1,
            total: 3,
            message: "mapper_parsing_exception".into(),
        };
        assert!(!err.is_retryable());
        assert!(IndexError::Overloaded("429".into()).is_retryable());
    }

    #[test]
    fn io_errors_convert() {
        let err: IndexError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, IndexError::Io(ref m) if m.contains("disk")));
        assert!(err.is_retryable());
    }
}
