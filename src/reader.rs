// In-memory pull reader over a byte slice.
//
// The reader owns the scan state (kernel selection, column-end buffer,
// row/line counters) and lends out `RowView`s that borrow its buffer.
// A view is invalidated by the next `next_row()` call; the borrow
// checker enforces that.

use tracing::debug;

use crate::core::field::trim_slice;
use crate::core::kernel::{ByteClasses, Kernel};
use crate::core::machine::{classes_for, parse_row, RowStep};
use crate::error::{Error, ErrorKind, Result};
use crate::options::{Options, Trim};
use crate::row::RowView;

/// UTF-8 byte order mark, consumed at input start.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub(crate) fn strip_utf8_bom(input: &[u8]) -> &[u8] {
    input.strip_prefix(UTF8_BOM).unwrap_or(input)
}

/// Pull-based row reader over an in-memory byte slice.
pub struct Reader<'a> {
    input: &'a [u8],
    opts: Options,
    classes: ByteClasses,
    kernel: Kernel,
    pos: usize,
    row_index: u64,
    source_line: u64,
    column_ends: Vec<u32>,
    headers: Option<Vec<String>>,
    header_pending: bool,
    done: bool,
    // Slot for the row just produced by `next_row_inner`, consumed by
    // `next_row` to build the lending view.
    emitted_start: usize,
    emitted_len: usize,
    emitted_line: u64,
}

impl<'a> Reader<'a> {
    /// Validate options, select a kernel, and position past any BOM.
    pub fn new(input: &'a [u8], opts: Options) -> Result<Self> {
        opts.validate()?;
        let kernel = Kernel::detect();
        debug!(kernel = ?kernel.width(), "selected scan kernel");
        let classes = classes_for(&opts);
        let source_line = if opts.track_source_lines { 1 } else { 0 };
        let header_pending = opts.has_headers;
        Ok(Reader {
            input: strip_utf8_bom(input),
            opts,
            classes,
            kernel,
            pos: 0,
            row_index: 0,
            source_line,
            column_ends: Vec::new(),
            headers: None,
            header_pending,
            done: false,
            emitted_start: 0,
            emitted_len: 0,
            emitted_line: 0,
        })
    }

    /// Same kernel and options as `new`, but with an explicit kernel
    /// (used by the conformance tests to pin a variant).
    pub fn with_kernel(input: &'a [u8], opts: Options, kernel: Kernel) -> Result<Self> {
        let mut reader = Reader::new(input, opts)?;
        reader.kernel = kernel;
        Ok(reader)
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Current byte offset into the (BOM-stripped) input.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Rows emitted so far.
    #[inline]
    pub fn rows_emitted(&self) -> u64 {
        self.row_index
    }

    /// Header names captured from the first accepted row, when headers
    /// are enabled and at least one row has been pulled.
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// Force header capture without emitting a data row.
    pub fn read_headers(&mut self) -> Result<Option<&[String]>> {
        if self.header_pending {
            self.next_row_inner(true)?;
        }
        Ok(self.headers.as_deref())
    }

    /// Pull the next row. `None` means end of input (not an error).
    #[allow(clippy::should_implement_trait)]
    pub fn next_row(&mut self) -> Option<Result<RowView<'_>>> {
        match self.next_row_inner(false) {
            Ok(Some(())) => {
                let row_start = self.emitted_start;
                let content = &self.input[row_start..row_start + self.emitted_len];
                Some(Ok(RowView::new(
                    content,
                    &self.column_ends,
                    self.row_index,
                    self.emitted_line,
                    &self.opts,
                )))
            }
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    /// Collect every remaining row as owned, unescaped fields.
    pub fn read_all_rows(&mut self) -> Result<Vec<Vec<Vec<u8>>>> {
        let mut rows = Vec::new();
        let mut scratch = Vec::new();
        while let Some(row) = self.next_row() {
            let row = row?;
            let mut fields = Vec::with_capacity(row.column_count());
            for col in row.columns() {
                fields.push(col.unescaped(&mut scratch).to_vec());
            }
            rows.push(fields);
        }
        Ok(rows)
    }

    /// Shared row loop. With `header_only`, stops after the header row
    /// is captured (returning `Ok(None)`); otherwise stops at the first
    /// emitted row (`Ok(Some(()))`, details in the `emitted_*` fields)
    /// or at end of input.
    fn next_row_inner(&mut self, header_only: bool) -> Result<Option<()>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if self.pos >= self.input.len() {
                self.done = true;
                return Ok(None);
            }

            let step = parse_row(
                self.input,
                self.pos,
                &self.opts,
                &self.classes,
                self.kernel,
                true,
                &mut self.column_ends,
            )
            .map_err(|e| e.with_row(self.row_index + 1))?;

            match step {
                RowStep::Comment { consumed, newlines } => {
                    self.pos += consumed;
                    self.bump_lines(newlines);
                }
                RowStep::NeedMore => {
                    // In-memory input is always at EOF; nothing left.
                    self.done = true;
                    return Ok(None);
                }
                RowStep::Row(out) => {
                    let row_start = self.pos;
                    let content = &self.input[row_start..row_start + out.content_len];

                    if self.opts.ignore_empty_lines && self.is_blank_row(content) {
                        self.pos += out.consumed;
                        self.bump_lines(out.newlines);
                        continue;
                    }

                    if self.header_pending {
                        self.headers = Some(crate::bind::header_names_from(
                            content,
                            &self.column_ends,
                            &self.opts,
                        ));
                        self.header_pending = false;
                        self.pos += out.consumed;
                        self.bump_lines(out.newlines);
                        if header_only {
                            return Ok(None);
                        }
                        continue;
                    }
                    if header_only {
                        return Ok(None);
                    }

                    if let Some(max) = self.opts.limits.max_rows {
                        if self.row_index >= max {
                            self.done = true;
                            return Err(Error::new(ErrorKind::TooManyRows { limit: max })
                                .with_row(self.row_index + 1)
                                .with_offset(row_start as u64));
                        }
                    }

                    self.row_index += 1;
                    self.emitted_start = row_start;
                    self.emitted_len = out.content_len;
                    self.emitted_line = self.source_line;
                    self.pos += out.consumed;
                    self.bump_lines(out.newlines);
                    return Ok(Some(()));
                }
            }
        }
    }

    #[inline]
    fn bump_lines(&mut self, newlines: u32) {
        if self.opts.track_source_lines {
            self.source_line += newlines as u64;
        }
    }

    fn is_blank_row(&self, content: &[u8]) -> bool {
        if self.column_ends.len() != 1 {
            return false;
        }
        if content.is_empty() {
            return true;
        }
        self.opts.trim != Trim::None && trim_slice(content, Trim::Both).is_empty()
    }
}
