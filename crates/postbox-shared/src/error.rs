use thiserror::Error;

/// Failures of the binary framing and JSON codecs.
///
/// Frame-level problems (`Truncated`, `Oversize`) are kept apart from
/// content problems (`Malformed`, `Json`) so a stream reader can tell a
/// short read from a bad payload.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Truncated frame: expected {expected} bytes, got {available}")]
    Truncated { expected: usize, available: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    Oversize { size: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
