use thiserror::Error;

/// A single frame of the event stream could not be turned into an `Event`.
///
/// Protocol errors are per-frame: the stream reader logs and skips the frame
/// and keeps reading.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_display() {
        assert_eq!(ProtocolError::Empty.to_string(), "Empty frame");
    }

    #[test]
    fn malformed_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ProtocolError = serde_err.into();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(err.to_string().starts_with("Malformed frame:"));
    }
}
