use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid resource key: {0}")]
    InvalidKey(String),

    #[error("invalid key segment {segment:?}: {reason}")]
    InvalidSegment { segment: String, reason: &'static str },
}
