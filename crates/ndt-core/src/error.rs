//! Frame-level error types

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised while framing or parsing a control message.
///
/// Every variant is fatal to the frame it was raised for. Header problems
/// (`MissingInput`, `TruncatedHeader`, `LengthMismatch`, `UnknownType`) are
/// detected before the body is looked at, so a corrupted transport can be
/// told apart from a server sending a malformed body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// No bytes were supplied at all
    #[error("missing input: no frame bytes")]
    MissingInput,

    /// Fewer bytes than the fixed three-byte header
    #[error("truncated header: need 3 bytes, have {have}")]
    TruncatedHeader { have: usize },

    /// Length field disagrees with the payload actually present
    #[error("length mismatch: header declares {declared} bytes, payload has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Type byte outside the defined message codes
    #[error("unknown message type: {0}")]
    UnknownType(u8),

    /// Body is not a JSON object of the expected shape
    #[error("parse error: {0}")]
    ParseError(String),

    /// Encoded body does not fit the 16-bit length field
    #[error("body too large: {0} bytes (max 65535)")]
    BodyTooLarge(usize),
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        FrameError::ParseError(e.to_string())
    }
}
