//! Error types for Tardigrade

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn stored or received text back into records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input was not valid UTF-8
    #[error("Record data is not valid UTF-8")]
    InvalidUtf8,

    /// A quoted field was opened but never closed
    #[error("Unterminated quoted field in row {row}")]
    UnterminatedQuote {
        /// Zero-based row index
        row: usize,
    },

    /// Row did not carry exactly the expected number of fields
    #[error("Row {row} has {found} fields, expected {expected}")]
    FieldCount {
        /// Zero-based row index
        row: usize,
        /// Number of fields the codec expects
        expected: usize,
        /// Number of fields actually present
        found: usize,
    },

    /// A field could not be converted to its typed value
    #[error("Row {row}: invalid {field} value {value:?}")]
    InvalidField {
        /// Zero-based row index
        row: usize,
        /// Field name
        field: &'static str,
        /// Offending text
        value: String,
    },
}

/// Errors surfaced by [`RecordStore`](crate::store::RecordStore) operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading the store file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the store file failed; the previous file is left in place
    #[error("Failed to write store file {path}: {source}")]
    Write {
        /// Target store file
        path: PathBuf,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// Stored or incoming rows could not be parsed
    #[error("Parse error: {0}")]
    Codec(#[from] CodecError),

    /// A background store task panicked or was cancelled
    #[error("Background store task failed: {0}")]
    Join(String),
}

/// Out-of-order or malformed framing seen by a receiving session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Zero-length chunk
    #[error("Empty chunk")]
    EmptyChunk,

    /// Leading byte is not a known frame tag
    #[error("Unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Start frame without a complete length header
    #[error("Malformed start frame ({0} bytes)")]
    MalformedStart(usize),

    /// End frame arrived with no message in progress
    #[error("End of message received while awaiting start")]
    UnexpectedEnd,

    /// Start frame arrived while a message was still being received
    #[error("Start of message received mid-message; {discarded} buffered bytes discarded")]
    RestartMidMessage {
        /// Partial payload bytes thrown away
        discarded: usize,
    },

    /// More payload arrived than the start frame announced
    #[error("Payload overran announced length {expected}")]
    LengthOverrun {
        /// Length announced by the start frame
        expected: usize,
    },

    /// End frame arrived before the announced length was reached
    #[error("Message ended after {received} of {expected} bytes")]
    LengthMismatch {
        /// Length announced by the start frame
        expected: usize,
        /// Bytes actually received
        received: usize,
    },

    /// Announced length exceeds the configured limit
    #[error("Announced message of {announced} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Length announced by the start frame
        announced: usize,
        /// Configured maximum
        limit: usize,
    },
}

/// Main error type for sync sessions and the discovery loop
#[derive(Error, Debug)]
pub enum SyncError {
    /// Store operation failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Framing violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Link chunk size too small to carry a start frame
    #[error("Link chunk size {size} is below the minimum of {min}")]
    ChunkSize {
        /// Link's maximum chunk size
        size: usize,
        /// Smallest usable chunk size
        min: usize,
    },

    /// Message exceeds what a start frame can announce
    #[error("Message of {0} bytes is too large to frame")]
    MessageTooLarge(usize),

    /// Transmission did not finish before its deadline
    #[error("Transmission timed out after {0:?}")]
    TransmissionTimedOut(std::time::Duration),

    /// Link kept refusing sends
    #[error("Link refused {0} consecutive sends")]
    RetriesExhausted(u32),

    /// Link event channel closed
    #[error("Peer link closed")]
    LinkClosed,

    /// Remote backend hook failed
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias using StoreError
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;
