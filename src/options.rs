// Reader configuration and DoS limits.
//
// Plain data, validated once at reader construction and treated as
// immutable afterwards. Higher-level builder surfaces live outside this
// crate; everything here is the validated ground truth the parsers run
// against.

use crate::error::{config_error, Result};

/// Absolute ceiling for streaming buffer growth when `max_row_size`
/// is not set (128 MiB).
pub const DEFAULT_BUFFER_CEILING: usize = 128 * 1024 * 1024;

/// Whitespace trimming applied to column views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trim {
    /// No trimming.
    #[default]
    None,
    /// Trim leading ASCII space/tab.
    Start,
    /// Trim trailing ASCII space/tab.
    End,
    /// Trim both ends.
    Both,
}

impl Trim {
    #[inline]
    pub(crate) fn leading(self) -> bool {
        matches!(self, Trim::Start | Trim::Both)
    }

    #[inline]
    pub(crate) fn trailing(self) -> bool {
        matches!(self, Trim::End | Trim::Both)
    }
}

/// How ambiguous quote placement is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteMode {
    /// A quote in an unexpected position raises `MalformedQuote`; an
    /// open quote at end of input raises `UnterminatedQuote`.
    #[default]
    Strict,
    /// Stray quotes are literal bytes; an open quote at end of input
    /// yields the tail as the final row.
    Lax,
}

/// Routing for column-conversion failures during binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Surface the error immediately.
    #[default]
    Throw,
    /// Discard the offending row and continue with the next one.
    SkipRow,
    /// Keep the member's default value and flag the row.
    UseDefault,
}

/// Resource limits enforced while parsing. `None` disables a limit.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum columns per row.
    pub max_columns: Option<usize>,
    /// Maximum rows per reader.
    pub max_rows: Option<u64>,
    /// Maximum bytes in a single field.
    pub max_field_size: Option<usize>,
    /// Maximum bytes in a single row (including quoted newlines).
    pub max_row_size: Option<usize>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_columns: Some(16_384),
            max_rows: None,
            max_field_size: Some(16 * 1024 * 1024),
            max_row_size: Some(64 * 1024 * 1024),
        }
    }
}

impl Limits {
    /// Effective streaming-buffer cap: `max_row_size` if set, else the
    /// absolute ceiling.
    pub(crate) fn buffer_ceiling(&self) -> usize {
        self.max_row_size.unwrap_or(DEFAULT_BUFFER_CEILING)
    }
}

/// Parser configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Field delimiter, single ASCII byte.
    pub delimiter: u8,
    /// Quote byte, single ASCII byte, distinct from the delimiter.
    pub quote: u8,
    /// Escape byte. `None` (the default) selects the RFC 4180
    /// doubled-quote rule; `Some(quote)` is equivalent.
    pub escape: Option<u8>,
    /// Lines whose first byte matches are skipped entirely.
    pub comment: Option<u8>,
    /// Whether quote handling is active at all.
    pub quoting: bool,
    /// Whether newlines may appear inside quoted fields.
    pub newlines_in_quotes: bool,
    /// Whether a lone CR (not followed by LF) terminates a row.
    pub lone_cr_terminates: bool,
    /// Whitespace trimming policy for column views.
    pub trim: Trim,
    /// Quote strictness.
    pub quote_mode: QuoteMode,
    /// First accepted row is a header row.
    pub has_headers: bool,
    /// Header-name matching is case sensitive.
    pub case_sensitive_headers: bool,
    /// Bindings naming absent headers bind to `None`/default instead of
    /// failing `MissingColumn`.
    pub allow_missing_columns: bool,
    /// Fail `DuplicateHeader` when the same name appears twice.
    pub detect_duplicate_headers: bool,
    /// Skip rows that contain no bytes (or only trimmable whitespace
    /// when trimming is on).
    pub ignore_empty_lines: bool,
    /// Fixed-width only: tolerate records shorter than a column's end
    /// (short columns clamp, absent ones are empty).
    pub allow_short_records: bool,
    /// Maintain `source_line` across rows (quoted newlines included).
    pub track_source_lines: bool,
    /// Raw byte sequences treated as null when binding nullable members.
    pub null_tokens: Vec<Vec<u8>>,
    /// Tokens accepted as boolean true (case-insensitive ASCII).
    pub true_tokens: Vec<String>,
    /// Tokens accepted as boolean false (case-insensitive ASCII).
    pub false_tokens: Vec<String>,
    /// Opaque format hint forwarded to converters (e.g. a date format).
    pub format: Option<String>,
    /// Opaque culture tag forwarded to converters.
    pub culture: Option<String>,
    /// Resource limits.
    pub limits: Limits,
    /// Binder error routing.
    pub error_policy: ErrorPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            delimiter: b',',
            quote: b'"',
            escape: None,
            comment: None,
            quoting: true,
            newlines_in_quotes: true,
            lone_cr_terminates: true,
            trim: Trim::None,
            quote_mode: QuoteMode::Strict,
            has_headers: false,
            case_sensitive_headers: true,
            allow_missing_columns: false,
            detect_duplicate_headers: true,
            ignore_empty_lines: false,
            allow_short_records: false,
            track_source_lines: true,
            null_tokens: Vec::new(),
            true_tokens: vec!["true".into(), "1".into(), "yes".into()],
            false_tokens: vec!["false".into(), "0".into(), "no".into()],
            format: None,
            culture: None,
            limits: Limits::default(),
            error_policy: ErrorPolicy::Throw,
        }
    }
}

impl Options {
    /// Default options with a different delimiter.
    pub fn with_delimiter(delimiter: u8) -> Self {
        Options {
            delimiter,
            ..Options::default()
        }
    }

    /// Effective escape byte: configured escape, or the quote byte
    /// itself (the doubled-quote rule).
    #[inline]
    pub(crate) fn effective_escape(&self) -> u8 {
        self.escape.unwrap_or(self.quote)
    }

    /// True when a distinct escape byte (not the quote) is configured.
    #[inline]
    pub(crate) fn has_distinct_escape(&self) -> bool {
        matches!(self.escape, Some(e) if e != self.quote)
    }

    /// Validate option combinations and limits. Called once per reader
    /// construction; readers treat a validated `Options` as invariant.
    pub fn validate(&self) -> Result<()> {
        if self.delimiter == 0 || !self.delimiter.is_ascii() {
            return Err(config_error("delimiter must be a non-NUL 7-bit ASCII byte"));
        }
        if self.quote == 0 || !self.quote.is_ascii() {
            return Err(config_error("quote must be a non-NUL 7-bit ASCII byte"));
        }
        if self.delimiter == self.quote {
            return Err(config_error("delimiter and quote must differ"));
        }
        if self.delimiter == b'\r' || self.delimiter == b'\n' {
            return Err(config_error("delimiter must not be a line terminator"));
        }
        if self.quote == b'\r' || self.quote == b'\n' {
            return Err(config_error("quote must not be a line terminator"));
        }
        if let Some(c) = self.comment {
            if !c.is_ascii() {
                return Err(config_error("comment must be a 7-bit ASCII byte"));
            }
            if c == self.quote {
                return Err(config_error("comment and quote must differ"));
            }
            if c == self.delimiter {
                return Err(config_error("comment and delimiter must differ"));
            }
        }
        if let Some(e) = self.escape {
            if !e.is_ascii() {
                return Err(config_error("escape must be a 7-bit ASCII byte"));
            }
            if e == self.delimiter && e != self.quote {
                return Err(config_error(
                    "escape must not equal the delimiter unless equal to the quote",
                ));
            }
        }

        let limits = &self.limits;
        if limits.max_columns == Some(0) {
            return Err(config_error("max_columns must be positive"));
        }
        if limits.max_rows == Some(0) {
            return Err(config_error("max_rows must be positive"));
        }
        if limits.max_field_size == Some(0) {
            return Err(config_error("max_field_size must be positive"));
        }
        if limits.max_row_size == Some(0) {
            return Err(config_error("max_row_size must be positive"));
        }
        if let (Some(row), Some(field)) = (limits.max_row_size, limits.max_field_size) {
            if row < field {
                return Err(config_error("max_row_size must be >= max_field_size"));
            }
        }

        for token in &self.null_tokens {
            let bad = token
                .iter()
                .any(|&b| b == self.delimiter || b == self.quote || b == b'\r' || b == b'\n');
            if bad {
                return Err(config_error(
                    "null token must not contain delimiter, quote, or line terminators",
                ));
            }
        }

        Ok(())
    }
}
