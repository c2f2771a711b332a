//! Error types for the XML engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing, formatting or streaming XML.
#[derive(Error, Debug)]
pub enum Error {
    /// Input text is not well-formed XML.
    #[error("malformed XML at byte {position}: {message}")]
    MalformedDocument {
        /// Byte offset into the input where the problem was detected.
        position: u64,
        /// Diagnostic from the reader or the structural checks.
        message: String,
    },

    /// The parser could not be set up for the given input.
    #[error("XML parser unavailable: {0}")]
    ParserUnavailable(String),

    /// A formatting engine could not be configured.
    #[error("XML formatter setup failed: {0}")]
    FormatterSetup(String),

    /// Serializing an in-memory document failed.
    #[error("XML render failed: {0}")]
    RenderFailure(String),

    /// The streaming writer could not be configured or its header written.
    #[error("XML stream writer setup failed: {0}")]
    WriterSetupFailure(String),

    /// An event written to an open streaming writer failed.
    #[error("XML stream write failed: {0}")]
    StreamingWriteFailure(String),
}

impl Error {
    pub(crate) fn malformed(position: u64, message: impl Into<String>) -> Self {
        Error::MalformedDocument {
            position,
            message: message.into(),
        }
    }
}
