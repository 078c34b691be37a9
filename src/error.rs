use thiserror::Error;

/// Failure kinds surfaced by reading, transforming and writing.
///
/// Functions return `anyhow::Result`; these travel inside the `anyhow::Error` and can be
/// recovered with `downcast_ref::<LljtError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LljtError {
    /// Progressive, arithmetic or lossless coding, or not a JPEG at all.
    #[error("unsupported format: {0}")]
    Unsupported(String),

    /// Truncated segments, bad Huffman codes, restart desynchronization, bad IFD counts.
    #[error("malformed stream: {0}")]
    Malformed(String),

    /// An error recorded during an earlier read step, replayed on the next attempt.
    #[error("Previous Error: {0}")]
    Deferred(String),

    #[error("image memory has been released")]
    Released,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub(crate) fn unsupported(msg: impl Into<String>) -> anyhow::Error {
    LljtError::Unsupported(msg.into()).into()
}

pub(crate) fn malformed(msg: impl Into<String>) -> anyhow::Error {
    LljtError::Malformed(msg.into()).into()
}

pub(crate) fn invalid_state(msg: impl Into<String>) -> anyhow::Error {
    LljtError::InvalidState(msg.into()).into()
}

pub(crate) fn invalid_argument(msg: impl Into<String>) -> anyhow::Error {
    LljtError::InvalidArgument(msg.into()).into()
}
