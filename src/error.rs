use std::io;

use thiserror::Error;

/// Coarse classification used by callers to decide between "failed", "warn and continue" and
/// "cancelled".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Archive/part I/O, unsafe entry names, offset bookkeeping, client setup. Always fatal to the
    /// document.
    Structural,
    /// The translation backend gave up (retries exhausted, empty or invalid response).
    Engine,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Zip {
        context: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("unsafe entry path in archive: {0}")]
    UnsafeEntryPath(String),

    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("unsupported input (expected .xlsx or .docx): {0}")]
    UnsupportedInput(String),

    #[error("part is not valid UTF-8: {0}")]
    NotUtf8(String),

    #[error("items count ({items}) and translations count ({translations}) do not match")]
    CountMismatch { items: usize, translations: usize },

    #[error("extraction span {start}..{end} is out of order or outside content (len {len})")]
    InvalidSpan { start: usize, end: usize, len: usize },

    #[error("build http client: {0}")]
    HttpClient(String),

    #[error("translation task failed: {0}")]
    Task(String),

    #[error("translation engine failure: {0}")]
    Engine(String),

    #[error("translation cancelled")]
    Cancelled,
}

impl TranslateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslateError::Engine(_) => ErrorKind::Engine,
            TranslateError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Structural,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub fn is_engine(&self) -> bool {
        self.kind() == ErrorKind::Engine
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        TranslateError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn zip(context: impl Into<String>, source: zip::result::ZipError) -> Self {
        TranslateError::Zip {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TranslateError>;
