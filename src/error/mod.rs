use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The store root itself cannot be read, so no data can be produced.
    #[error("storage root {} is not accessible: {source}", root.display())]
    StoreUnavailable {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid date {0:?}: expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid file name {0:?}")]
    InvalidFileName(String),

    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Why a directory entry is not a camera file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{0:?} does not match expected pattern")]
    NoMatch(String),

    #[error("{filename:?} carries an invalid timestamp {timestamp}")]
    InvalidTimestamp { filename: String, timestamp: String },

    #[error("{filename:?} carries an out-of-range sequence number {sequence}")]
    SequenceOutOfRange { filename: String, sequence: String },
}

pub type Result<T> = std::result::Result<T, Error>;
