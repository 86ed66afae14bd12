use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure reported by a [`RemoteCatalog`](crate::remote::RemoteCatalog).
///
/// A fetch failure never carries partial data; callers treat every variant as
/// "nothing was received".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network unavailable: {0}")]
    Network(String),

    #[error("Remote fetch timed out after {0} seconds")]
    Timeout(u64),

    #[error("Remote rejected the request: {0}")]
    Remote(String),

    #[error("Remote fetch was cancelled")]
    Cancelled,

    #[error("Malformed remote payload: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether retrying the same fetch later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Timeout(_))
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_transience() {
        assert!(FetchError::Network("offline".into()).is_transient());
        assert!(FetchError::Timeout(30).is_transient());
        assert!(!FetchError::Cancelled.is_transient());
        assert!(!FetchError::Remote("401".into()).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BridgeError = io.into();
        assert!(err.to_string().contains("missing"));
    }
}
