use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetideError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid tidal constituent '{input}': {reason}")]
    InvalidConstituent { input: String, reason: String },

    #[error("could not load fir filter file [{path}]: {reason}")]
    FilterLoad { path: String, reason: String },

    #[error("could not find fir filter [{0}]")]
    FilterNotFound(String),

    #[error("unable to load stream selection [{source_name}]: {reason}")]
    Selection { source_name: String, reason: String },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DetideError {
    /// Errors that leave the process without a usable configuration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetideError::Config(_)
                | DetideError::InvalidConstituent { .. }
                | DetideError::FilterLoad { .. }
                | DetideError::FilterNotFound(_)
                | DetideError::Selection { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DetideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DetideError::FilterNotFound("fir2".into()).is_fatal());
        assert!(DetideError::Selection {
            source_name: "streams.txt".into(),
            reason: "missing".into()
        }
        .is_fatal());
        assert!(!DetideError::Decode("bad json".into()).is_fatal());
        assert!(!DetideError::Transform("nan".into()).is_fatal());
        assert!(!DetideError::Checkpoint("disk full".into()).is_fatal());
    }

    #[test]
    fn test_filter_not_found_message() {
        let err = DetideError::FilterNotFound("fir4".into());
        assert_eq!(err.to_string(), "could not find fir filter [fir4]");
    }
}
