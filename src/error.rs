// Error taxonomy and context enrichment.
//
// Every failure carries a kind plus optional location context (row,
// column, byte offset, field name). Kinds map 1:1 onto the conditions
// the parser, binder, and streaming layer can hit; helpers attach
// context as errors propagate outward.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Longest raw payload fragment ever embedded in an error message.
/// Keeps log lines free of multi-KB field dumps.
const PAYLOAD_PREVIEW_MAX: usize = 32;

/// Render a short, lossy preview of raw field bytes for messages.
pub(crate) fn payload_preview(bytes: &[u8]) -> String {
    if bytes.len() <= PAYLOAD_PREVIEW_MAX {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        let mut s = String::from_utf8_lossy(&bytes[..PAYLOAD_PREVIEW_MAX]).into_owned();
        s.push('…');
        s
    }
}

/// Failure classification.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Options failed validation at reader construction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input could not be transcoded / decoded.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A quoted field was still open when the input (or row) ended.
    #[error("quoted field not terminated")]
    UnterminatedQuote,

    /// A quote byte appeared in an unexpected position (strict mode).
    #[error("quote character in unexpected position")]
    MalformedQuote,

    /// Column count exceeded `Limits::max_columns`.
    #[error("column count exceeds limit of {limit}")]
    TooManyColumns { limit: usize },

    /// Row count exceeded `Limits::max_rows`.
    #[error("row count exceeds limit of {limit}")]
    TooManyRows { limit: u64 },

    /// A single field exceeded `Limits::max_field_size`.
    #[error("field of {size} bytes exceeds limit of {limit}")]
    FieldTooLarge { size: usize, limit: usize },

    /// A single row exceeded `Limits::max_row_size`.
    #[error("row of {size} bytes exceeds limit of {limit}")]
    RowTooLarge { size: usize, limit: usize },

    /// A fixed-width record ended before an active column's end offset.
    #[error("record of {len} bytes ends before column end {required}")]
    RecordTooShort { len: usize, required: usize },

    /// A header name required by a binding was not present.
    #[error("column {name:?} not found in header row")]
    MissingColumn { name: String },

    /// The same header name appeared twice (detection enabled).
    #[error("duplicate header {name:?}")]
    DuplicateHeader { name: String },

    /// Column-to-value conversion failed.
    #[error("cannot parse {input:?} as {target}: {reason}")]
    Parse {
        /// Truncated preview of the offending bytes.
        input: String,
        /// Target type name.
        target: &'static str,
        /// Converter-specific explanation.
        reason: String,
    },

    /// A user validator rejected an otherwise well-formed value.
    #[error("validation rejected value: {0}")]
    Validation(String),

    /// Cooperative cancellation was signaled.
    #[error("operation canceled")]
    Canceled,

    /// The underlying byte source reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// An error with attached location context.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    row: Option<u64>,
    column: Option<usize>,
    byte_offset: Option<u64>,
    field_name: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            row: None,
            column: None,
            byte_offset: None,
            field_name: None,
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// 1-based row index, when known.
    pub fn row(&self) -> Option<u64> {
        self.row
    }

    /// 0-based column index, when known.
    pub fn column(&self) -> Option<usize> {
        self.column
    }

    /// Absolute byte offset into the input, when known.
    pub fn byte_offset(&self) -> Option<u64> {
        self.byte_offset
    }

    /// Bound member / header name, when known.
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn with_row(mut self, row: u64) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_column(mut self, column: usize) -> Self {
        self.column = Some(column);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.byte_offset = Some(offset);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Shift a buffer-relative byte offset to an absolute stream
    /// offset.
    pub(crate) fn rebase_offset(mut self, base: u64) -> Self {
        if let Some(off) = self.byte_offset {
            self.byte_offset = Some(off + base);
        }
        self
    }

    /// True for errors that leave a reader in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Canceled | ErrorKind::Io(_) | ErrorKind::RowTooLarge { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        let mut sep = " (";
        if let Some(row) = self.row {
            write!(f, "{sep}row {row}")?;
            sep = ", ";
        }
        if let Some(col) = self.column {
            write!(f, "{sep}column {col}")?;
            sep = ", ";
        }
        if let Some(off) = self.byte_offset {
            write!(f, "{sep}byte {off}")?;
            sep = ", ";
        }
        if let Some(name) = &self.field_name {
            write!(f, "{sep}field {name:?}")?;
            sep = ", ";
        }
        if sep == ", " {
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io(err))
    }
}

/// Shorthand for config validation failures.
pub(crate) fn config_error(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::Config(msg.into()))
}

/// Shorthand for conversion failures; truncates the payload preview.
pub(crate) fn parse_error(
    bytes: &[u8],
    target: &'static str,
    reason: impl Into<String>,
) -> Error {
    Error::new(ErrorKind::Parse {
        input: payload_preview(bytes),
        target,
        reason: reason.into(),
    })
}
