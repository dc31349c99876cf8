pub mod ports;

pub use ports::{AlertSink, NotificationSource, SnapshotSource};

/// Failure reported by an adapter behind one of the ports.
///
/// The display text of the transient variants carries the operator hint, so
/// callers that retry can log the error as-is.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("transport failure: {0}. Check the AMS service is reachable")]
    Transport(String),
    #[error("request rejected: {0}. Check the AMS access token is correct")]
    Auth(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("local resource unavailable: {0}")]
    Resource(String),
}

impl PortError {
    /// Local resource failures cannot be retried away
    pub fn is_fatal(&self) -> bool {
        matches!(self, PortError::Resource(_))
    }
}

pub type PortResult<T> = Result<T, PortError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_carries_hint() {
        let err = PortError::Auth("401 Unauthorized".to_string());
        assert!(err.to_string().contains("access token"));
        assert!(!err.is_fatal());
        assert!(PortError::Resource("queue gone".to_string()).is_fatal());
    }
}
