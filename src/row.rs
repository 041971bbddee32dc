// Row and column views: non-owning, offset-addressed readers over the
// parser buffer.
//
// Nothing is materialized until a consumer asks for a specific column;
// trimming, quote stripping, and unescaping are lazy and allocation is
// deferred to the unavoidable cases (a field with escape work, via the
// caller's scratch buffer).

use crate::convert::{ConvertCtx, FromColumn};
use crate::core::field;
use crate::error::{parse_error, Error, Result};
use crate::options::{Options, Trim};

/// A parsed row borrowed from the reader's buffer.
///
/// The view is invalidated by the next `next_row()` call; the borrow
/// checker enforces that (the view holds the reader borrow).
#[derive(Debug, Clone, Copy)]
pub struct RowView<'r> {
    data: &'r [u8],
    ends: &'r [u32],
    row_index: u64,
    source_line: u64,
    opts: &'r Options,
}

impl<'r> RowView<'r> {
    pub(crate) fn new(
        data: &'r [u8],
        ends: &'r [u32],
        row_index: u64,
        source_line: u64,
        opts: &'r Options,
    ) -> Self {
        debug_assert!(!ends.is_empty(), "a row always has at least one column");
        RowView {
            data,
            ends,
            row_index,
            source_line,
            opts,
        }
    }

    /// 1-based index of this row among emitted rows.
    #[inline]
    pub fn row_index(&self) -> u64 {
        self.row_index
    }

    /// 1-based source line the row started on; 0 when line tracking is
    /// disabled.
    #[inline]
    pub fn source_line(&self) -> u64 {
        self.source_line
    }

    /// Number of columns in this row (always at least one).
    #[inline]
    pub fn column_count(&self) -> usize {
        self.ends.len()
    }

    /// Raw row content, terminator excluded.
    #[inline]
    pub fn as_bytes(&self) -> &'r [u8] {
        self.data
    }

    /// Column `idx`, or `None` past the end.
    #[inline]
    pub fn column(&self, idx: usize) -> Option<ColumnView<'r>> {
        let end = *self.ends.get(idx)? as usize;
        let start = if idx == 0 {
            0
        } else {
            self.ends[idx - 1] as usize + 1
        };
        Some(ColumnView {
            raw: &self.data[start..end],
            index: idx,
            row_index: self.row_index,
            opts: self.opts,
        })
    }

    /// Left-to-right column iterator.
    #[inline]
    pub fn columns(&self) -> Columns<'r> {
        Columns { row: *self, idx: 0 }
    }

    /// True when the row is a single zero-length column.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ends.len() == 1 && self.data.is_empty()
    }
}

/// Iterator over a row's columns.
#[derive(Debug, Clone)]
pub struct Columns<'r> {
    row: RowView<'r>,
    idx: usize,
}

impl<'r> Iterator for Columns<'r> {
    type Item = ColumnView<'r>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let col = self.row.column(self.idx)?;
        self.idx += 1;
        Some(col)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.row.column_count().saturating_sub(self.idx);
        (remaining, Some(remaining))
    }
}

impl<'r> ExactSizeIterator for Columns<'r> {}

/// One column of a row: a raw slice plus lazy decode operations.
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'r> {
    raw: &'r [u8],
    index: usize,
    row_index: u64,
    opts: &'r Options,
}

impl<'r> ColumnView<'r> {
    pub(crate) fn new(raw: &'r [u8], index: usize, row_index: u64, opts: &'r Options) -> Self {
        ColumnView {
            raw,
            index,
            row_index,
            opts,
        }
    }

    /// 0-based column index within the row.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw field bytes: quotes, padding and all.
    #[inline]
    pub fn as_bytes(&self) -> &'r [u8] {
        self.raw
    }

    /// Raw bytes with ASCII space/tab trimmed from both ends.
    #[inline]
    pub fn trimmed(&self) -> &'r [u8] {
        field::trim_slice(self.raw, Trim::Both)
    }

    /// Field content after the configured trim policy and quote
    /// stripping. Escape work (doubled quotes) is still present; see
    /// `unescaped`.
    #[inline]
    pub fn content(&self) -> &'r [u8] {
        let trimmed = field::trim_slice(self.raw, self.opts.trim);
        if self.opts.quoting {
            field::strip_quotes(trimmed, self.opts.quote)
        } else {
            trimmed
        }
    }

    /// True when the field is wrapped in the configured quote byte
    /// (after the trim policy).
    #[inline]
    pub fn is_quoted(&self) -> bool {
        self.opts.quoting
            && field::is_quoted(field::trim_slice(self.raw, self.opts.trim), self.opts.quote)
    }

    /// True when `content()` still carries escape sequences.
    #[inline]
    pub fn needs_unescape(&self) -> bool {
        self.opts.quoting
            && self.is_quoted()
            && field::needs_unescape(
                self.content(),
                self.opts.quote,
                self.opts.effective_escape(),
            )
    }

    /// Content with escapes resolved. Borrows `scratch` only when
    /// resolution is needed; idempotent when `needs_unescape` is false.
    pub fn unescaped<'s>(&self, scratch: &'s mut Vec<u8>) -> &'s [u8]
    where
        'r: 's,
    {
        let content = self.content();
        if !self.is_quoted() {
            return content;
        }
        field::unescape_into(
            content,
            self.opts.quote,
            self.opts.effective_escape(),
            scratch,
        )
    }

    /// Content as UTF-8. Escape sequences are still present; use
    /// `unescaped` first when they matter.
    pub fn as_str(&self) -> Result<&'r str> {
        std::str::from_utf8(self.content())
            .map_err(|e| {
                parse_error(self.content(), "str", e.to_string())
                    .with_row(self.row_index)
                    .with_column(self.index)
            })
    }

    /// Content as a character iterator (UTF-8 validated).
    pub fn as_chars(&self) -> Result<std::str::Chars<'r>> {
        Ok(self.as_str()?.chars())
    }

    /// Byte-exact match of the raw slice against the configured null
    /// tokens.
    pub fn is_null(&self) -> bool {
        self.opts
            .null_tokens
            .iter()
            .any(|t| t.as_slice() == self.raw)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Parse the (unescaped) content as `T` using the reader-level
    /// format/culture hints.
    pub fn parse<T: FromColumn>(&self) -> Result<T> {
        self.parse_with(self.opts.format.as_deref(), self.opts.culture.as_deref())
    }

    /// Parse with a format override (binding-level format), keeping
    /// the reader-level culture.
    pub fn parse_format<T: FromColumn>(&self, format: Option<&str>) -> Result<T> {
        self.parse_with(
            format.or(self.opts.format.as_deref()),
            self.opts.culture.as_deref(),
        )
    }

    /// Parse with explicit format/culture hints (binding-level hints
    /// override the reader-level ones).
    pub fn parse_with<T: FromColumn>(
        &self,
        format: Option<&str>,
        culture: Option<&str>,
    ) -> Result<T> {
        let ctx = ConvertCtx {
            format,
            culture,
            true_tokens: &self.opts.true_tokens,
            false_tokens: &self.opts.false_tokens,
        };
        let mut scratch = Vec::new();
        let bytes = self.unescaped(&mut scratch);
        T::from_column(bytes, &ctx)
            .map_err(|e: Error| e.with_row(self.row_index).with_column(self.index))
    }
}
