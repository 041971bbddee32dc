#![feature(portable_simd)]
// rustytab - SIMD-accelerated reading of delimiter-separated and
// fixed-width tabular text.
//
// Library safety: no unwrap/expect in production code. Fallible paths
// return Result and propagate with `?`.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//
// Layout:
// - core/: block kernel (prefix-XOR quote masking), row machine, field
//   shape helpers
// - reader/stream: pull-based row iteration over slices and streams
// - row/convert: lazy column views and typed conversion
// - bind: descriptor-driven record binding with a process-wide registry
// - fixed: fixed-width records sharing the views and the binder
// - split: quote-aware splitter + rayon parallel parsing
// - encoding: UTF-16 transcode entry path
//
// The hot path allocates nothing for typical inputs: rows are offset
// views into the caller's (or the stream window's) bytes, and
// unescaping borrows caller scratch.

pub mod bind;
pub mod convert;
pub mod core;
mod encoding;
mod error;
mod options;
mod pool;
mod reader;
mod row;
pub mod split;
mod stream;

pub mod fixed;

pub use encoding::{transcode_utf16, transcode_utf16_bytes, Utf16Input};
pub use error::{Error, ErrorKind, Result};
pub use options::{ErrorPolicy, Limits, Options, QuoteMode, Trim};
pub use pool::PooledBuf;
pub use reader::Reader;
pub use row::{ColumnView, Columns, RowView};
pub use stream::{CancelToken, StreamReader};

pub use bind::{
    Bindable, Binder, Binding, BindingDescriptor, ColumnAccess, ColumnTarget, Progress,
    RecordReader, StreamRecordReader,
};
pub use convert::{ConvertCtx, FromColumn};
pub use fixed::{
    Alignment, FixedColumn, FixedLayout, FixedReader, FixedRecord, FixedRecordReader,
    FixedStreamReader,
};
