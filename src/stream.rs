// Streaming buffer and streaming reader.
//
// `StreamBuffer` maintains a contiguous window over a `Read` source:
// `unconsumed = buf[read_pos..write_pos]`, with `read_pos` resting on
// the start of the next unparsed row between pulls. Refills compact
// first and grow by doubling after that, capped by `max_row_size` (or
// the absolute ceiling when unset).
//
// The reader suspends only inside `fill()`; a row larger than the
// window leaves the parser logically mid-row, holding no references
// across the suspension (the row is rescanned from its start after the
// refill).

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::field::trim_slice;
use crate::core::kernel::{ByteClasses, Kernel};
use crate::core::machine::{classes_for, parse_row, RowStep};
use crate::error::{Error, ErrorKind, Result};
use crate::options::{Options, Trim};
use crate::pool::PooledBuf;
use crate::reader::strip_utf8_bom;
use crate::row::RowView;

/// Initial window size for streaming buffers (64 KiB, clamped to the
/// configured ceiling).
const INITIAL_WINDOW: usize = 64 * 1024;

/// Cooperative cancellation signal, checked at every `fill()` boundary
/// and before each emitted row.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Signal cancellation; the reader turns terminal at its next
    /// check.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Growable contiguous byte window over a streaming source.
struct StreamBuffer {
    buf: PooledBuf,
    read_pos: usize,
    write_pos: usize,
    ceiling: usize,
    eof: bool,
}

impl StreamBuffer {
    fn new(ceiling: usize) -> Self {
        let initial = INITIAL_WINDOW.min(ceiling.max(64));
        let mut buf = PooledBuf::acquire(initial);
        buf.as_mut_vec().resize(initial, 0);
        StreamBuffer {
            buf,
            read_pos: 0,
            write_pos: 0,
            ceiling,
            eof: false,
        }
    }

    #[inline]
    fn unconsumed(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    #[inline]
    fn at_eof(&self) -> bool {
        self.eof && self.read_pos >= self.write_pos
    }

    /// Append bytes from `src`. Compacts, then grows (doubling, capped
    /// by the ceiling). Returns the byte count read; zero flips EOF.
    fn fill(&mut self, src: &mut dyn Read) -> Result<usize> {
        if self.write_pos == self.buf.len() {
            if self.read_pos > 0 {
                let len = self.write_pos - self.read_pos;
                self.buf.as_mut_vec().copy_within(self.read_pos..self.write_pos, 0);
                self.read_pos = 0;
                self.write_pos = len;
                trace!(len, "compacted stream buffer");
            } else {
                let old = self.buf.len();
                if old >= self.ceiling {
                    return Err(Error::new(ErrorKind::RowTooLarge {
                        size: old,
                        limit: self.ceiling,
                    }));
                }
                let new = (old * 2).min(self.ceiling);
                self.buf.as_mut_vec().resize(new, 0);
                debug!(from = old, to = new, "grew stream buffer");
            }
        }
        let n = src.read(&mut self.buf[self.write_pos..])?;
        if n == 0 {
            self.eof = true;
        } else {
            self.write_pos += n;
        }
        Ok(n)
    }

    /// Advance past an emitted row.
    #[inline]
    fn advance(&mut self, n: usize) {
        debug_assert!(self.read_pos + n <= self.write_pos);
        self.read_pos += n;
    }

    /// Slice into the current window, relative to `read_pos`.
    #[inline]
    fn window(&self, start: usize, len: usize) -> &[u8] {
        &self.buf[self.read_pos + start..self.read_pos + start + len]
    }

    /// Slice by absolute buffer position. Valid until the next `fill`
    /// (which may compact); used for the just-emitted row whose
    /// `read_pos` has already moved past it.
    #[inline]
    fn at_abs(&self, start: usize, len: usize) -> &[u8] {
        &self.buf[start..start + len]
    }
}

/// Pull-based row reader over a byte stream.
///
/// Same shape as the in-memory [`Reader`](crate::Reader); `next_row`
/// may block inside `fill()` while the source reads.
pub struct StreamReader<R: Read> {
    src: R,
    window: StreamBuffer,
    opts: Options,
    classes: ByteClasses,
    kernel: Kernel,
    cancel: Option<CancelToken>,
    row_index: u64,
    source_line: u64,
    base_offset: u64,
    column_ends: Vec<u32>,
    headers: Option<Vec<String>>,
    header_pending: bool,
    bom_checked: bool,
    done: bool,
    emitted_abs: usize,
    emitted_len: usize,
    emitted_line: u64,
}

impl<R: Read> StreamReader<R> {
    pub fn new(src: R, opts: Options) -> Result<Self> {
        Self::with_cancel_opt(src, opts, None)
    }

    /// Reader with a cancellation token.
    pub fn with_cancel(src: R, opts: Options, cancel: CancelToken) -> Result<Self> {
        Self::with_cancel_opt(src, opts, Some(cancel))
    }

    fn with_cancel_opt(src: R, opts: Options, cancel: Option<CancelToken>) -> Result<Self> {
        opts.validate()?;
        let kernel = Kernel::detect();
        debug!(kernel = ?kernel.width(), "selected scan kernel");
        let classes = classes_for(&opts);
        let window = StreamBuffer::new(opts.limits.buffer_ceiling());
        let source_line = if opts.track_source_lines { 1 } else { 0 };
        let header_pending = opts.has_headers;
        Ok(StreamReader {
            src,
            window,
            opts,
            classes,
            kernel,
            cancel,
            row_index: 0,
            source_line,
            base_offset: 0,
            column_ends: Vec::new(),
            headers: None,
            header_pending,
            bom_checked: false,
            done: false,
            emitted_abs: 0,
            emitted_len: 0,
            emitted_line: 0,
        })
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Rows emitted so far.
    #[inline]
    pub fn rows_emitted(&self) -> u64 {
        self.row_index
    }

    /// Total bytes consumed from the source (BOM included).
    #[inline]
    pub fn bytes_consumed(&self) -> u64 {
        self.base_offset
    }

    /// Header names, once captured.
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// Force header capture without emitting a data row.
    pub fn read_headers(&mut self) -> Result<Option<&[String]>> {
        if self.header_pending && !self.done {
            self.next_row_inner(true)?;
        }
        Ok(self.headers.as_deref())
    }

    /// Pull the next row. `None` means end of input; cancellation
    /// surfaces once as `Canceled` and then turns the reader terminal.
    #[allow(clippy::should_implement_trait)]
    pub fn next_row(&mut self) -> Option<Result<RowView<'_>>> {
        match self.next_row_inner(false) {
            Ok(true) => {
                let content = self.window.at_abs(self.emitted_abs, self.emitted_len);
                Some(Ok(RowView::new(
                    content,
                    &self.column_ends,
                    self.row_index,
                    self.emitted_line,
                    &self.opts,
                )))
            }
            Ok(false) => None,
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

    /// Row loop. `Ok(true)` leaves the emitted row addressable in the
    /// window (`at_abs(emitted_abs, emitted_len)`, ends in
    /// `column_ends`). With `header_only`, stops without consuming the
    /// first data row.
    fn next_row_inner(&mut self, header_only: bool) -> Result<bool> {
        if self.done {
            return Ok(false);
        }
        loop {
            if let Some(token) = &self.cancel {
                if token.is_canceled() {
                    self.done = true;
                    debug!("streaming reader canceled");
                    return Err(Error::new(ErrorKind::Canceled).with_row(self.row_index + 1));
                }
            }

            if !self.bom_checked {
                if self.window.unconsumed().len() >= 3 || self.window.eof {
                    let before = self.window.unconsumed().len();
                    let after = strip_utf8_bom(self.window.unconsumed()).len();
                    let bom = before - after;
                    self.window.advance(bom);
                    self.base_offset += bom as u64;
                    self.bom_checked = true;
                } else {
                    self.window.fill(&mut self.src)?;
                    continue;
                }
            }

            if self.window.at_eof() {
                self.done = true;
                return Ok(false);
            }

            let at_eof = self.window.eof;
            let step = parse_row(
                self.window.unconsumed(),
                0,
                &self.opts,
                &self.classes,
                self.kernel,
                at_eof,
                &mut self.column_ends,
            )
            .map_err(|e| {
                e.rebase_offset(self.base_offset)
                    .with_row(self.row_index + 1)
            })?;

            match step {
                RowStep::NeedMore => {
                    // Refill; avoid a read when a terminator is already
                    // buffered but the row is quoted across it.
                    self.window.fill(&mut self.src)?;
                }
                RowStep::Comment { consumed, newlines } => {
                    self.window.advance(consumed);
                    self.base_offset += consumed as u64;
                    self.bump_lines(newlines);
                }
                RowStep::Row(out) => {
                    let blank = self.is_blank_row(out.content_len);
                    if self.opts.ignore_empty_lines && blank {
                        self.window.advance(out.consumed);
                        self.base_offset += out.consumed as u64;
                        self.bump_lines(out.newlines);
                        continue;
                    }

                    if self.header_pending {
                        let content = self.window.window(0, out.content_len);
                        self.headers = Some(crate::bind::header_names_from(
                            content,
                            &self.column_ends,
                            &self.opts,
                        ));
                        self.header_pending = false;
                        debug!(columns = self.column_ends.len(), "captured header row");
                        self.window.advance(out.consumed);
                        self.base_offset += out.consumed as u64;
                        self.bump_lines(out.newlines);
                        if header_only {
                            return Ok(false);
                        }
                        continue;
                    }
                    if header_only {
                        return Ok(false);
                    }

                    if let Some(max) = self.opts.limits.max_rows {
                        if self.row_index >= max {
                            self.done = true;
                            return Err(Error::new(ErrorKind::TooManyRows { limit: max })
                                .with_row(self.row_index + 1)
                                .with_offset(self.base_offset));
                        }
                    }

                    self.row_index += 1;
                    self.emitted_abs = self.window.read_pos;
                    self.emitted_len = out.content_len;
                    self.emitted_line = self.source_line;
                    self.bump_lines(out.newlines);
                    self.base_offset += out.consumed as u64;
                    // The content stays addressable at its absolute
                    // position until the next fill() compacts.
                    self.window.advance(out.consumed);
                    return Ok(true);
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

    fn is_blank_row(&self, content_len: usize) -> bool {
        if self.column_ends.len() != 1 {
            return false;
        }
        if content_len == 0 {
            return true;
        }
        self.opts.trim != Trim::None
            && trim_slice(self.window.window(0, content_len), Trim::Both).is_empty()
    }
}

impl<R: Read> Drop for StreamReader<R> {
    fn drop(&mut self) {
        // The pooled window returns to the pool via PooledBuf::drop.
        trace!(rows = self.row_index, "streaming reader closed");
    }
}
