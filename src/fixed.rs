// Fixed-width record parsing.
//
// Columns live at absolute [start, start+len) offsets within each
// record; records are either a fixed byte length or newline-delimited.
// Overlapping columns are allowed (redefinitions). Pad trimming
// follows each column's alignment: Left-aligned data is padded on the
// right, Right-aligned data on the left.
//
// Conversion and binding ride the same column views and descriptors as
// the DSV side; only record/column slicing differs.

use memchr::memchr2;
use tracing::debug;

use crate::bind::{Bindable, Binder, ColumnAccess};
use crate::error::{config_error, Error, ErrorKind, Result};
use crate::options::Options;
use crate::reader::strip_utf8_bom;
use crate::row::ColumnView;

/// Which side of a column carries data; padding sits on the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    /// Data left, padding right (text fields).
    #[default]
    Left,
    /// Data right, padding left (numeric fields).
    Right,
}

/// One fixed-width column.
#[derive(Debug, Clone)]
pub struct FixedColumn {
    pub name: String,
    pub start: usize,
    pub len: usize,
    pub pad: u8,
    pub align: Alignment,
    pub format: Option<String>,
}

impl FixedColumn {
    pub fn new(name: impl Into<String>, start: usize, len: usize) -> Self {
        FixedColumn {
            name: name.into(),
            start,
            len,
            pad: b' ',
            align: Alignment::Left,
            format: None,
        }
    }

    pub fn with_pad(mut self, pad: u8) -> Self {
        self.pad = pad;
        self
    }

    pub fn right_aligned(mut self) -> Self {
        self.align = Alignment::Right;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    #[inline]
    fn end(&self) -> usize {
        self.start + self.len
    }

    /// Slice and pad-trim this column out of a record.
    fn slice<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        let end = self.end().min(record.len());
        if self.start >= end {
            return &[];
        }
        let raw = &record[self.start..end];
        match self.align {
            Alignment::Left => {
                let trimmed = raw.iter().rev().take_while(|&&b| b == self.pad).count();
                &raw[..raw.len() - trimmed]
            }
            Alignment::Right => {
                let trimmed = raw.iter().take_while(|&&b| b == self.pad).count();
                &raw[trimmed..]
            }
        }
    }
}

/// Ordered column layout plus the record framing mode.
#[derive(Debug, Clone)]
pub struct FixedLayout {
    columns: Vec<FixedColumn>,
    /// `Some(n)`: records are exactly `n` bytes, back to back.
    /// `None`: records are newline-delimited.
    record_len: Option<usize>,
}

impl FixedLayout {
    /// Newline-delimited records.
    pub fn new(columns: Vec<FixedColumn>) -> Result<Self> {
        if columns.is_empty() {
            return Err(config_error("fixed-width layout needs at least one column"));
        }
        Ok(FixedLayout {
            columns,
            record_len: None,
        })
    }

    /// Fixed-length records of exactly `record_len` bytes.
    pub fn with_record_len(columns: Vec<FixedColumn>, record_len: usize) -> Result<Self> {
        if record_len == 0 {
            return Err(config_error("record length must be positive"));
        }
        for col in &columns {
            if col.end() > record_len {
                return Err(config_error(format!(
                    "column {:?} ends at {} past record length {}",
                    col.name,
                    col.end(),
                    record_len
                )));
            }
        }
        let mut layout = FixedLayout::new(columns)?;
        layout.record_len = Some(record_len);
        Ok(layout)
    }

    #[inline]
    pub fn columns(&self) -> &[FixedColumn] {
        &self.columns
    }

    /// Bytes every record must cover (largest column end).
    #[inline]
    pub fn required_len(&self) -> usize {
        self.columns.iter().map(FixedColumn::end).max().unwrap_or(0)
    }

    /// Column names, in declaration order (the binder resolves header
    /// targets against these).
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// One fixed-width record.
#[derive(Debug, Clone, Copy)]
pub struct FixedRecord<'a> {
    record: &'a [u8],
    layout: &'a FixedLayout,
    row_index: u64,
    opts: &'a Options,
}

impl<'a> FixedRecord<'a> {
    /// Raw record bytes, terminator excluded.
    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.record
    }

    #[inline]
    pub fn row_index(&self) -> u64 {
        self.row_index
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.layout.columns.len()
    }

    /// Pad-trimmed column `idx` as a column view.
    pub fn column(&self, idx: usize) -> Option<ColumnView<'a>> {
        let col = self.layout.columns.get(idx)?;
        Some(ColumnView::new(
            col.slice(self.record),
            idx,
            self.row_index,
            self.opts,
        ))
    }

    /// Pad-trimmed raw bytes of column `idx`.
    pub fn column_bytes(&self, idx: usize) -> Option<&'a [u8]> {
        Some(self.layout.columns.get(idx)?.slice(self.record))
    }
}

impl ColumnAccess for FixedRecord<'_> {
    #[inline]
    fn get_column(&self, idx: usize) -> Option<ColumnView<'_>> {
        self.column(idx)
    }

    #[inline]
    fn bound_row_index(&self) -> u64 {
        self.row_index
    }
}

/// Pull reader over fixed-width records in a byte slice.
pub struct FixedReader<'a> {
    input: &'a [u8],
    layout: FixedLayout,
    opts: Options,
    pos: usize,
    row_index: u64,
    done: bool,
}

impl<'a> FixedReader<'a> {
    pub fn new(input: &'a [u8], layout: FixedLayout, opts: Options) -> Result<Self> {
        opts.validate()?;
        // Quote and DSV-trim semantics do not apply to fixed columns;
        // the layout's pad trimming is authoritative.
        let opts = Options {
            quoting: false,
            trim: crate::options::Trim::None,
            ..opts
        };
        debug!(
            columns = layout.columns().len(),
            record_len = ?layout.record_len,
            "fixed-width reader"
        );
        Ok(FixedReader {
            input: strip_utf8_bom(input),
            layout,
            opts,
            pos: 0,
            row_index: 0,
            done: false,
        })
    }

    #[inline]
    pub fn layout(&self) -> &FixedLayout {
        &self.layout
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Pull the next record; `None` at end of input.
    #[allow(clippy::should_implement_trait)]
    pub fn next_record(&mut self) -> Option<Result<FixedRecord<'_>>> {
        if self.done {
            return None;
        }
        loop {
            if self.pos >= self.input.len() {
                self.done = true;
                return None;
            }

            let (record, consumed) = match self.layout.record_len {
                Some(len) => {
                    let avail = self.input.len() - self.pos;
                    let take = len.min(avail);
                    (&self.input[self.pos..self.pos + take], take)
                }
                None => {
                    let (line, consumed) =
                        next_line(&self.input[self.pos..], self.opts.lone_cr_terminates);
                    (line, consumed)
                }
            };

            // Empty newline-delimited records are skippable framing.
            if record.is_empty()
                && self.layout.record_len.is_none()
                && self.opts.ignore_empty_lines
            {
                self.pos += consumed;
                continue;
            }

            if let Some(max) = self.opts.limits.max_rows {
                if self.row_index >= max {
                    self.done = true;
                    return Some(Err(Error::new(ErrorKind::TooManyRows { limit: max })
                        .with_row(self.row_index + 1)));
                }
            }

            let required = self.layout.required_len();
            if record.len() < required && !self.opts.allow_short_records {
                self.done = true;
                return Some(Err(Error::new(ErrorKind::RecordTooShort {
                    len: record.len(),
                    required,
                })
                .with_row(self.row_index + 1)
                .with_offset(self.pos as u64)));
            }

            self.row_index += 1;
            self.pos += consumed;
            return Some(Ok(FixedRecord {
                record,
                layout: &self.layout,
                row_index: self.row_index,
                opts: &self.opts,
            }));
        }
    }
}

/// Pull reader over fixed-width records from a byte stream.
///
/// Fixed-length layouts read records back to back; newline-delimited
/// layouts buffer until a terminator arrives. Suspension happens only
/// while refilling, between records.
pub struct FixedStreamReader<R: std::io::Read> {
    src: R,
    layout: FixedLayout,
    opts: Options,
    pending: Vec<u8>,
    start: usize,
    eof: bool,
    bom_checked: bool,
    row_index: u64,
    done: bool,
    emitted: (usize, usize),
}

impl<R: std::io::Read> FixedStreamReader<R> {
    pub fn new(src: R, layout: FixedLayout, opts: Options) -> Result<Self> {
        opts.validate()?;
        let opts = Options {
            quoting: false,
            trim: crate::options::Trim::None,
            ..opts
        };
        Ok(FixedStreamReader {
            src,
            layout,
            opts,
            pending: Vec::new(),
            start: 0,
            eof: false,
            bom_checked: false,
            row_index: 0,
            done: false,
            emitted: (0, 0),
        })
    }

    #[inline]
    pub fn layout(&self) -> &FixedLayout {
        &self.layout
    }

    /// Pull the next record; `None` at end of input.
    #[allow(clippy::should_implement_trait)]
    pub fn next_record(&mut self) -> Option<Result<FixedRecord<'_>>> {
        match self.next_record_inner() {
            Ok(true) => {
                let (at, len) = self.emitted;
                Some(Ok(FixedRecord {
                    record: &self.pending[at..at + len],
                    layout: &self.layout,
                    row_index: self.row_index,
                    opts: &self.opts,
                }))
            }
            Ok(false) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    fn next_record_inner(&mut self) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        loop {
            if !self.bom_checked {
                while self.pending.len() - self.start < 3 && !self.eof {
                    self.refill()?;
                }
                let rest = &self.pending[self.start..];
                let bom = rest.len() - strip_utf8_bom(rest).len();
                self.start += bom;
                self.bom_checked = true;
            }

            let (rec_start, rec_len, consumed) = match self.layout.record_len {
                Some(len) => {
                    while self.pending.len() - self.start < len && !self.eof {
                        self.refill()?;
                    }
                    let avail = self.pending.len() - self.start;
                    if avail == 0 {
                        self.done = true;
                        return Ok(false);
                    }
                    let take = len.min(avail);
                    (self.start, take, take)
                }
                None => {
                    let (line_len, consumed, complete) = self.pending_line();
                    if !complete && !self.eof {
                        self.refill()?;
                        continue;
                    }
                    if line_len == 0 && consumed == 0 {
                        self.done = true;
                        return Ok(false);
                    }
                    if line_len == 0 && self.opts.ignore_empty_lines {
                        self.start += consumed;
                        continue;
                    }
                    (self.start, line_len, consumed)
                }
            };

            if let Some(max) = self.opts.limits.max_rows {
                if self.row_index >= max {
                    self.done = true;
                    return Err(Error::new(ErrorKind::TooManyRows { limit: max })
                        .with_row(self.row_index + 1));
                }
            }

            let required = self.layout.required_len();
            if rec_len < required && !self.opts.allow_short_records {
                self.done = true;
                return Err(Error::new(ErrorKind::RecordTooShort {
                    len: rec_len,
                    required,
                })
                .with_row(self.row_index + 1));
            }

            self.row_index += 1;
            self.emitted = (rec_start, rec_len);
            self.start += consumed;
            return Ok(true);
        }
    }

    /// Locate the next line in `pending[start..]`:
    /// `(content_len, consumed, complete)`. `complete` is false when
    /// the terminator may continue past the buffered bytes.
    fn pending_line(&self) -> (usize, usize, bool) {
        let buf = &self.pending[self.start..];
        let mut from = 0;
        loop {
            match memchr2(b'\n', b'\r', &buf[from..]) {
                Some(i) => {
                    let at = from + i;
                    if buf[at] == b'\n' {
                        return (at, at + 1, true);
                    }
                    match buf.get(at + 1) {
                        Some(&b'\n') => return (at, at + 2, true),
                        Some(_) if self.opts.lone_cr_terminates => return (at, at + 1, true),
                        Some(_) => from = at + 1,
                        // CR at the buffered edge: CRLF undecidable.
                        None if self.opts.lone_cr_terminates => {
                            return (at, at + 1, self.eof);
                        }
                        None => return (buf.len(), buf.len(), self.eof),
                    }
                }
                None => return (buf.len(), buf.len(), self.eof),
            }
        }
    }

    /// Append more source bytes, compacting consumed ones first.
    fn refill(&mut self) -> Result<()> {
        if self.start > 0 && self.start >= self.pending.len() / 2 {
            self.pending.drain(..self.start);
            self.start = 0;
        }
        let mut chunk = [0u8; 8 * 1024];
        let n = self.src.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.pending.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }
}

/// Next newline-delimited record: `(content, consumed)` with the
/// terminator (LF, CRLF, or lone CR when enabled) consumed.
fn next_line(buf: &[u8], lone_cr: bool) -> (&[u8], usize) {
    let mut from = 0;
    loop {
        match memchr2(b'\n', b'\r', &buf[from..]) {
            Some(i) => {
                let at = from + i;
                if buf[at] == b'\n' {
                    return (&buf[..at], at + 1);
                }
                if buf.get(at + 1) == Some(&b'\n') {
                    return (&buf[..at], at + 2);
                }
                if lone_cr {
                    return (&buf[..at], at + 1);
                }
                from = at + 1;
            }
            None => return (buf, buf.len()),
        }
    }
}

/// Typed record iterator over fixed-width input.
pub struct FixedRecordReader<'a, T: Bindable> {
    reader: FixedReader<'a>,
    binder: Option<Binder<T>>,
    skipped: u64,
    done: bool,
}

impl<'a, T: Bindable> FixedRecordReader<'a, T> {
    pub fn new(input: &'a [u8], layout: FixedLayout, opts: Options) -> Result<Self> {
        Ok(FixedRecordReader {
            reader: FixedReader::new(input, layout, opts)?,
            binder: None,
            skipped: 0,
            done: false,
        })
    }

    /// Records discarded under `ErrorPolicy::SkipRow`.
    #[inline]
    pub fn skipped_rows(&self) -> u64 {
        self.skipped
    }

    fn ensure_binder(&mut self) -> Result<()> {
        if self.binder.is_none() {
            // Name targets resolve against the layout's column names.
            let names = self.reader.layout.names();
            self.binder = Some(Binder::resolve(Some(&names), &self.reader.opts)?);
        }
        Ok(())
    }
}

impl<T: Bindable> Iterator for FixedRecordReader<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.ensure_binder() {
            self.done = true;
            return Some(Err(e));
        }
        loop {
            let record = match self.reader.next_record()? {
                Ok(record) => record,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let Some(binder) = self.binder.as_mut() else {
                return None;
            };
            match binder.bind(&record) {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => {
                    self.skipped += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
