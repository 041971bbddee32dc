// Descriptor-driven row binding.
//
// A `BindingDescriptor` is built once per record type (the `Bindable`
// impl is the interface generated factories target), registered in a
// process-wide insert-or-get registry, and shared by reference across
// threads. Column resolution happens once against the header row; row
// binding then walks the entries in declaration order through typed
// setters, so no per-value boxing happens on the hot path.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::convert::FromColumn;
use crate::error::{Error, ErrorKind, Result};
use crate::options::{ErrorPolicy, Options};
use crate::reader::Reader;
use crate::row::{ColumnView, RowView};
use crate::stream::StreamReader;

/// How a binding entry selects its column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnTarget {
    /// Explicit 0-based column index; bypasses header resolution.
    Index(usize),
    /// Header name.
    Name(String),
    /// Header name, falling back to the index when headers are absent
    /// or the name is missing and missing columns are tolerated.
    NameOrIndex(String, usize),
}

type ApplyFn<T> = Box<dyn Fn(&mut T, &ColumnView<'_>, Option<&str>) -> Result<()> + Send + Sync>;
type NullFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// One member binding of a record descriptor.
pub struct Binding<T> {
    member: &'static str,
    target: ColumnTarget,
    format: Option<String>,
    required: bool,
    nullable: bool,
    apply: ApplyFn<T>,
    apply_null: NullFn<T>,
}

impl<T: 'static> Binding<T> {
    /// Required, non-nullable member parsed as `V` and stored through
    /// `set`.
    pub fn field<V: FromColumn + 'static>(
        member: &'static str,
        target: ColumnTarget,
        set: fn(&mut T, V),
    ) -> Binding<T> {
        Binding {
            member,
            target,
            format: None,
            required: true,
            nullable: false,
            apply: Box::new(move |rec, col, format| {
                let v: V = col.parse_format(format)?;
                set(rec, v);
                Ok(())
            }),
            apply_null: Box::new(|_| {}),
        }
    }

    /// Nullable member: a raw slice matching a configured null token
    /// (or a missing tolerated column) stores `None`.
    pub fn nullable_field<V: FromColumn + 'static>(
        member: &'static str,
        target: ColumnTarget,
        set: fn(&mut T, Option<V>),
    ) -> Binding<T> {
        Binding {
            member,
            target,
            format: None,
            required: true,
            nullable: true,
            apply: Box::new(move |rec, col, format| {
                let v: V = col.parse_format(format)?;
                set(rec, Some(v));
                Ok(())
            }),
            apply_null: Box::new(move |rec| set(rec, None)),
        }
    }

    /// Member with a caller-supplied conversion: enum maps, validated
    /// values, anything the closed converter set does not cover. The
    /// closure returns `ErrorKind::Parse` or `ErrorKind::Validation`
    /// failures to stay routable through the error policy.
    pub fn custom(
        member: &'static str,
        target: ColumnTarget,
        apply: impl Fn(&mut T, &ColumnView<'_>, Option<&str>) -> Result<()> + Send + Sync + 'static,
    ) -> Binding<T> {
        Binding {
            member,
            target,
            format: None,
            required: true,
            nullable: false,
            apply: Box::new(apply),
            apply_null: Box::new(|_| {}),
        }
    }

    /// Per-member format hint; overrides the reader-level format.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Tolerate an absent column for this member even when
    /// `allow_missing_columns` is off.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[inline]
    pub fn member(&self) -> &'static str {
        self.member
    }

    #[inline]
    pub fn target(&self) -> &ColumnTarget {
        &self.target
    }
}

impl<T> std::fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("member", &self.member)
            .field("target", &self.target)
            .field("required", &self.required)
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// Immutable binding metadata for one record type.
pub struct BindingDescriptor<T> {
    new_record: fn() -> T,
    entries: Vec<Binding<T>>,
}

impl<T> BindingDescriptor<T> {
    pub fn new(new_record: fn() -> T, entries: Vec<Binding<T>>) -> Self {
        BindingDescriptor {
            new_record,
            entries,
        }
    }

    #[inline]
    pub fn entries(&self) -> &[Binding<T>] {
        &self.entries
    }
}

/// The interface binder factories implement (by hand here; generated
/// elsewhere). Descriptors are built once and cached process-wide.
pub trait Bindable: Sized + Send + Sync + 'static {
    fn descriptor() -> BindingDescriptor<Self>;
}

// ---------------------------------------------------------------------------
// Descriptor registry
// ---------------------------------------------------------------------------
//
// Insert-or-get keyed by TypeId. Descriptors are leaked to 'static on
// first registration and never torn down; reads share an RwLock guard
// and never block each other.

static REGISTRY: Lazy<RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Fetch (building and registering on first use) the descriptor for
/// `T`.
pub fn descriptor_of<T: Bindable>() -> &'static BindingDescriptor<T> {
    let id = TypeId::of::<T>();
    {
        let map = match REGISTRY.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(found) = map.get(&id).copied().and_then(|d| d.downcast_ref()) {
            return found;
        }
    }

    // Build outside the lock; a racing insert wins and ours leaks,
    // which is the insert-or-get contract.
    let built: &'static BindingDescriptor<T> = Box::leak(Box::new(T::descriptor()));
    let mut map = match REGISTRY.write() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    let stored: &'static (dyn Any + Send + Sync) = *map.entry(id).or_insert(built);
    drop(map);
    stored.downcast_ref().unwrap_or(built)
}

// ---------------------------------------------------------------------------
// Header resolution + row binding
// ---------------------------------------------------------------------------

/// Owned, unescaped header names from a header row's raw parts. Used
/// by both readers when capturing the header.
pub(crate) fn header_names_from(content: &[u8], ends: &[u32], opts: &Options) -> Vec<String> {
    let row = RowView::new(content, ends, 0, 0, opts);
    let mut scratch = Vec::new();
    row.columns()
        .map(|c| String::from_utf8_lossy(c.unescaped(&mut scratch)).into_owned())
        .collect()
}

/// Column access for binding: implemented by DSV row views and
/// fixed-width records, so one binder serves both formats.
pub trait ColumnAccess {
    fn get_column(&self, idx: usize) -> Option<ColumnView<'_>>;
    fn bound_row_index(&self) -> u64;
}

impl ColumnAccess for RowView<'_> {
    #[inline]
    fn get_column(&self, idx: usize) -> Option<ColumnView<'_>> {
        self.column(idx)
    }

    #[inline]
    fn bound_row_index(&self) -> u64 {
        self.row_index()
    }
}

/// Progress report handed to a configured reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub rows_processed: u64,
    pub bytes_processed: u64,
    /// Total input size, or -1 when unknown (streaming sources).
    pub total_bytes: i64,
}

type ProgressFn = Box<dyn FnMut(Progress)>;

/// A resolved binder for one record type: descriptor plus per-entry
/// column indices (`None` = tolerated missing column).
pub struct Binder<T: Bindable> {
    descriptor: &'static BindingDescriptor<T>,
    resolved: Vec<Option<usize>>,
    policy: ErrorPolicy,
    allow_missing: bool,
    flagged: u64,
}

impl<T: Bindable> Binder<T> {
    /// Resolve descriptor entries against the (optional) header row.
    pub fn resolve(headers: Option<&[String]>, opts: &Options) -> Result<Binder<T>> {
        let descriptor = descriptor_of::<T>();

        if let (Some(names), true) = (headers, opts.detect_duplicate_headers) {
            if let Some(dup) = find_duplicate(names, opts.case_sensitive_headers) {
                return Err(Error::new(ErrorKind::DuplicateHeader { name: dup.into() }));
            }
        }

        let mut resolved = Vec::with_capacity(descriptor.entries.len());
        for entry in &descriptor.entries {
            let index = match &entry.target {
                ColumnTarget::Index(i) => Some(*i),
                ColumnTarget::Name(name) => {
                    match lookup(headers, name, opts.case_sensitive_headers) {
                        Some(i) => Some(i),
                        None if opts.allow_missing_columns || !entry.required => None,
                        None => {
                            return Err(Error::new(ErrorKind::MissingColumn {
                                name: name.clone(),
                            })
                            .with_field(entry.member));
                        }
                    }
                }
                ColumnTarget::NameOrIndex(name, fallback) => {
                    match lookup(headers, name, opts.case_sensitive_headers) {
                        Some(i) => Some(i),
                        None => Some(*fallback),
                    }
                }
            };
            resolved.push(index);
        }
        debug!(
            entries = descriptor.entries.len(),
            "resolved binding descriptor"
        );

        Ok(Binder {
            descriptor,
            resolved,
            policy: opts.error_policy,
            allow_missing: opts.allow_missing_columns,
            flagged: 0,
        })
    }

    /// Rows that continued with defaults under
    /// `ErrorPolicy::UseDefault`.
    #[inline]
    pub fn flagged_rows(&self) -> u64 {
        self.flagged
    }

    /// Bind one row. `Ok(None)` means the row was discarded by
    /// `ErrorPolicy::SkipRow`.
    pub fn bind<S: ColumnAccess>(&mut self, row: &S) -> Result<Option<T>> {
        let mut record = (self.descriptor.new_record)();
        let mut flagged = false;

        for (entry, slot) in self.descriptor.entries.iter().zip(&self.resolved) {
            let Some(index) = slot else {
                (entry.apply_null)(&mut record);
                continue;
            };

            let Some(col) = row.get_column(*index) else {
                // Row shorter than the resolved index.
                if entry.required && !self.allow_missing {
                    return Err(Error::new(ErrorKind::MissingColumn {
                        name: entry.member.into(),
                    })
                    .with_row(row.bound_row_index())
                    .with_column(*index)
                    .with_field(entry.member));
                }
                (entry.apply_null)(&mut record);
                continue;
            };

            if entry.nullable && col.is_null() {
                (entry.apply_null)(&mut record);
                continue;
            }

            // Reader-level format/culture fallbacks resolve inside the
            // column's parse path.
            match (entry.apply)(&mut record, &col, entry.format.as_deref()) {
                Ok(()) => {}
                Err(e) => {
                    let convertible = matches!(
                        e.kind(),
                        ErrorKind::Parse { .. } | ErrorKind::Validation(_)
                    );
                    if !convertible {
                        return Err(e.with_field(entry.member));
                    }
                    match self.policy {
                        ErrorPolicy::Throw => {
                            return Err(e.with_field(entry.member));
                        }
                        ErrorPolicy::SkipRow => return Ok(None),
                        ErrorPolicy::UseDefault => {
                            (entry.apply_null)(&mut record);
                            flagged = true;
                        }
                    }
                }
            }
        }

        if flagged {
            self.flagged += 1;
        }
        Ok(Some(record))
    }
}

fn names_equal(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

fn lookup(headers: Option<&[String]>, name: &str, case_sensitive: bool) -> Option<usize> {
    headers?
        .iter()
        .position(|h| names_equal(h, name, case_sensitive))
}

fn find_duplicate(headers: &[String], case_sensitive: bool) -> Option<&str> {
    for (i, name) in headers.iter().enumerate() {
        if headers[..i]
            .iter()
            .any(|prev| names_equal(prev, name, case_sensitive))
        {
            return Some(name);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Record iterators
// ---------------------------------------------------------------------------

/// Typed record iterator over an in-memory byte slice.
pub struct RecordReader<'a, T: Bindable> {
    reader: Reader<'a>,
    binder: Option<Binder<T>>,
    skipped: u64,
    progress: Option<(u64, ProgressFn)>,
    total_bytes: i64,
    done: bool,
}

impl<'a, T: Bindable> RecordReader<'a, T> {
    pub fn new(input: &'a [u8], opts: Options) -> Result<Self> {
        let total_bytes = input.len() as i64;
        Ok(RecordReader {
            reader: Reader::new(input, opts)?,
            binder: None,
            skipped: 0,
            progress: None,
            total_bytes,
            done: false,
        })
    }

    /// Report progress every `every` bound rows.
    pub fn with_progress(mut self, every: u64, report: impl FnMut(Progress) + 'static) -> Self {
        self.progress = Some((every.max(1), Box::new(report)));
        self
    }

    /// Rows discarded under `ErrorPolicy::SkipRow`.
    #[inline]
    pub fn skipped_rows(&self) -> u64 {
        self.skipped
    }

    /// Rows continued with defaults under `ErrorPolicy::UseDefault`.
    pub fn flagged_rows(&self) -> u64 {
        self.binder.as_ref().map_or(0, Binder::flagged_rows)
    }

    fn ensure_binder(&mut self) -> Result<()> {
        if self.binder.is_none() {
            let headers = self.reader.read_headers()?.map(<[String]>::to_vec);
            self.binder = Some(Binder::resolve(headers.as_deref(), self.reader.options())?);
        }
        Ok(())
    }
}

impl<T: Bindable> Iterator for RecordReader<'_, T> {
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
            let row = match self.reader.next_row()? {
                Ok(row) => row,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let Some(binder) = self.binder.as_mut() else {
                return None;
            };
            match binder.bind(&row) {
                Ok(Some(record)) => {
                    let rows = self.reader.rows_emitted();
                    let bytes = self.reader.position() as u64;
                    if let Some((every, report)) = self.progress.as_mut() {
                        if rows % *every == 0 {
                            report(Progress {
                                rows_processed: rows,
                                bytes_processed: bytes,
                                total_bytes: self.total_bytes,
                            });
                        }
                    }
                    return Some(Ok(record));
                }
                Ok(None) => {
                    self.skipped += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Typed record iterator over a byte stream; progress `total_bytes` is
/// -1 (unknown).
pub struct StreamRecordReader<R: Read, T: Bindable> {
    reader: StreamReader<R>,
    binder: Option<Binder<T>>,
    skipped: u64,
    progress: Option<(u64, ProgressFn)>,
    done: bool,
}

impl<R: Read, T: Bindable> StreamRecordReader<R, T> {
    pub fn new(src: R, opts: Options) -> Result<Self> {
        Ok(StreamRecordReader {
            reader: StreamReader::new(src, opts)?,
            binder: None,
            skipped: 0,
            progress: None,
            done: false,
        })
    }

    /// Reader with a cancellation token.
    pub fn with_cancel(src: R, opts: Options, cancel: crate::stream::CancelToken) -> Result<Self> {
        Ok(StreamRecordReader {
            reader: StreamReader::with_cancel(src, opts, cancel)?,
            binder: None,
            skipped: 0,
            progress: None,
            done: false,
        })
    }

    /// Report progress every `every` bound rows.
    pub fn with_progress(mut self, every: u64, report: impl FnMut(Progress) + 'static) -> Self {
        self.progress = Some((every.max(1), Box::new(report)));
        self
    }

    #[inline]
    pub fn skipped_rows(&self) -> u64 {
        self.skipped
    }

    pub fn flagged_rows(&self) -> u64 {
        self.binder.as_ref().map_or(0, Binder::flagged_rows)
    }

    fn ensure_binder(&mut self) -> Result<()> {
        if self.binder.is_none() {
            let headers = self.reader.read_headers()?.map(<[String]>::to_vec);
            self.binder = Some(Binder::resolve(headers.as_deref(), self.reader.options())?);
        }
        Ok(())
    }
}

impl<R: Read, T: Bindable> Iterator for StreamRecordReader<R, T> {
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
            let row = match self.reader.next_row()? {
                Ok(row) => row,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let Some(binder) = self.binder.as_mut() else {
                return None;
            };
            match binder.bind(&row) {
                Ok(Some(record)) => {
                    let rows = self.reader.rows_emitted();
                    let bytes = self.reader.bytes_consumed();
                    if let Some((every, report)) = self.progress.as_mut() {
                        if rows % *every == 0 {
                            report(Progress {
                                rows_processed: rows,
                                bytes_processed: bytes,
                                total_bytes: -1,
                            });
                        }
                    }
                    return Some(Ok(record));
                }
                Ok(None) => {
                    self.skipped += 1;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
