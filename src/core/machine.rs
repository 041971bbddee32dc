// Row state machine over kernel masks.
//
// Drives the block kernel across one row and emits the row length plus
// per-column end offsets. Branchless inside the block; the per-bit
// handlers below are the only branches and they are small and
// predictable.
//
// The machine is re-entrant per row: streaming callers that get
// `NeedMore` refill their buffer and call again with the same row
// start. Positions are u32 relative to the row start (the buffer
// ceiling keeps rows far below 4 GB).

use memchr::memchr2;

use crate::core::field::validate_quote_shape;
use crate::core::kernel::{ByteClasses, Carry, Kernel};
use crate::error::{Error, ErrorKind, Result};
use crate::options::{Options, QuoteMode};

/// One parsed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutput {
    /// Row content length in bytes, terminator excluded.
    pub content_len: usize,
    /// Bytes consumed from the row start, terminator included.
    pub consumed: usize,
    /// Line breaks consumed, quoted newlines included.
    pub newlines: u32,
    /// Whether any quote byte was seen in the row.
    pub saw_quote: bool,
}

/// Outcome of a `parse_row` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStep {
    /// A complete row; column ends are in the caller's buffer.
    Row(RowOutput),
    /// A comment line was skipped.
    Comment { consumed: usize, newlines: u32 },
    /// The buffer ended mid-row and the source has more bytes.
    NeedMore,
}

/// Build the kernel byte classes for a validated option set. Quote 0
/// is the kernel's "no quote handling" sentinel.
pub fn classes_for(opts: &Options) -> ByteClasses {
    if opts.quoting {
        ByteClasses::new(opts.delimiter, opts.quote, opts.escape)
    } else {
        ByteClasses::new(opts.delimiter, 0, None)
    }
}

/// Parse one row starting at `buf[start..]`.
///
/// `ends` receives the exclusive end offset of every column, relative
/// to the row start; it is cleared first and always holds at least one
/// entry when `RowStep::Row` is returned. `at_eof` tells the machine
/// whether a missing terminator means "emit the final row" or
/// "ask for more input".
pub fn parse_row(
    buf: &[u8],
    start: usize,
    opts: &Options,
    classes: &ByteClasses,
    kernel: Kernel,
    at_eof: bool,
    ends: &mut Vec<u32>,
) -> Result<RowStep> {
    let row = &buf[start..];
    ends.clear();
    if row.is_empty() {
        return Ok(RowStep::NeedMore);
    }

    // Comment lines are recognized on the first byte only, before any
    // byte of the row is consumed.
    if let Some(c) = opts.comment {
        if row[0] == c {
            return skip_comment_line(row, opts, at_eof);
        }
    }

    let block_len = kernel.block_len();
    let mut carry = Carry::default();
    let mut pos = 0usize;
    let mut prev_boundary = 0usize;
    let mut newlines = 0u32;
    let mut saw_quote = false;

    loop {
        if pos >= row.len() {
            // Buffer exhausted without a terminator.
            if carry.in_quote {
                if !at_eof {
                    return Ok(RowStep::NeedMore);
                }
                if opts.quote_mode == QuoteMode::Strict {
                    return Err(Error::new(ErrorKind::UnterminatedQuote)
                        .with_offset((start + row.len()) as u64));
                }
                // Lax: the tail is the final row, open quote and all.
            }
            if !at_eof {
                return Ok(RowStep::NeedMore);
            }
            return finalize(
                row, start, opts, ends, prev_boundary, row.len(), row.len(), newlines, saw_quote,
            );
        }

        let block_end = (pos + block_len).min(row.len());
        let masks = kernel.scan(&row[pos..block_end], classes, carry);
        saw_quote |= masks.quotes != 0;

        // All delimiter and newline bytes, quoted newlines included, in
        // ascending order. Quoted bits past a terminator belong to the
        // next row and are never reached: the terminator returns first.
        let mut events = masks.delims | masks.newlines;
        while events != 0 {
            let bit_idx = events.trailing_zeros() as usize;
            let bit = 1u64 << bit_idx;
            events &= events - 1;
            let rel = pos + bit_idx;
            let byte = row[rel];

            if masks.quoted & bit != 0 {
                // A newline inside a quoted field (quoted delimiters
                // are already absent from `masks.delims`).
                let is_break = byte == b'\n' || opts.lone_cr_terminates;
                if !opts.newlines_in_quotes && is_break {
                    return Err(Error::new(ErrorKind::UnterminatedQuote)
                        .with_offset((start + rel) as u64));
                }
                if opts.track_source_lines && byte == b'\n' {
                    newlines += 1;
                }
                continue;
            }

            if byte == opts.delimiter {
                push_column_end(opts, ends, start, prev_boundary, rel)?;
                prev_boundary = rel + 1;
            } else if byte == b'\n' {
                // An unquoted CR before this LF would have terminated
                // the row at the CR already, so no CR trim is needed.
                return finalize(
                    row,
                    start,
                    opts,
                    ends,
                    prev_boundary,
                    rel,
                    rel + 1,
                    newlines + 1,
                    saw_quote,
                );
            } else {
                // CR. CRLF always terminates; a bare CR terminates only
                // in the default profile, otherwise it is data.
                if rel + 1 < row.len() {
                    if row[rel + 1] == b'\n' {
                        return finalize(
                            row,
                            start,
                            opts,
                            ends,
                            prev_boundary,
                            rel,
                            rel + 2,
                            newlines + 1,
                            saw_quote,
                        );
                    }
                    if opts.lone_cr_terminates {
                        return finalize(
                            row,
                            start,
                            opts,
                            ends,
                            prev_boundary,
                            rel,
                            rel + 1,
                            newlines + 1,
                            saw_quote,
                        );
                    }
                } else {
                    // CR at the buffer edge: the next byte decides CRLF
                    // vs lone CR.
                    if !at_eof {
                        return Ok(RowStep::NeedMore);
                    }
                    if opts.lone_cr_terminates {
                        return finalize(
                            row,
                            start,
                            opts,
                            ends,
                            prev_boundary,
                            rel,
                            rel + 1,
                            newlines + 1,
                            saw_quote,
                        );
                    }
                    // Data; the exhaustion path above emits the row.
                }
            }
        }

        if let Some(max) = opts.limits.max_row_size {
            if block_end > max {
                return Err(Error::new(ErrorKind::RowTooLarge {
                    size: block_end,
                    limit: max,
                })
                .with_offset((start + max) as u64));
            }
        }

        carry = masks.carry_out;
        pos = block_end;
    }
}

/// Record a completed column end, enforcing column and field limits.
#[inline]
fn push_column_end(
    opts: &Options,
    ends: &mut Vec<u32>,
    row_start: usize,
    field_start: usize,
    field_end: usize,
) -> Result<()> {
    if let Some(max) = opts.limits.max_columns {
        if ends.len() >= max {
            return Err(Error::new(ErrorKind::TooManyColumns { limit: max })
                .with_offset((row_start + field_end) as u64)
                .with_column(ends.len()));
        }
    }
    let field_len = field_end - field_start;
    if let Some(max) = opts.limits.max_field_size {
        if field_len > max {
            return Err(Error::new(ErrorKind::FieldTooLarge {
                size: field_len,
                limit: max,
            })
            .with_offset((row_start + field_end) as u64)
            .with_column(ends.len()));
        }
    }
    ends.push(field_end as u32);
    Ok(())
}

/// Close the row: record the final column, run strict-mode quote
/// validation, and assemble the output.
#[allow(clippy::too_many_arguments)]
fn finalize(
    row: &[u8],
    start: usize,
    opts: &Options,
    ends: &mut Vec<u32>,
    prev_boundary: usize,
    content_end: usize,
    consumed: usize,
    newlines: u32,
    saw_quote: bool,
) -> Result<RowStep> {
    push_column_end(opts, ends, start, prev_boundary, content_end)?;

    if let Some(max) = opts.limits.max_row_size {
        if content_end > max {
            return Err(Error::new(ErrorKind::RowTooLarge {
                size: content_end,
                limit: max,
            })
            .with_offset((start + max) as u64));
        }
    }

    if saw_quote && opts.quoting && opts.quote_mode == QuoteMode::Strict {
        let escape = opts.effective_escape();
        let mut field_start = 0usize;
        for (idx, &end) in ends.iter().enumerate() {
            let field = &row[field_start..end as usize];
            if let Err(rel) = validate_quote_shape(field, opts.quote, escape, opts.trim) {
                return Err(Error::new(ErrorKind::MalformedQuote)
                    .with_offset((start + field_start + rel) as u64)
                    .with_column(idx));
            }
            field_start = end as usize + 1;
        }
    }

    Ok(RowStep::Row(RowOutput {
        content_len: content_end,
        consumed,
        newlines,
        saw_quote,
    }))
}

/// Skip a comment line: everything up to and including the next row
/// terminator.
fn skip_comment_line(row: &[u8], opts: &Options, at_eof: bool) -> Result<RowStep> {
    let mut from = 0usize;
    loop {
        match memchr2(b'\n', b'\r', &row[from..]) {
            Some(i) => {
                let rel = from + i;
                if row[rel] == b'\n' {
                    return Ok(RowStep::Comment {
                        consumed: rel + 1,
                        newlines: 1,
                    });
                }
                // CR
                if rel + 1 < row.len() {
                    if row[rel + 1] == b'\n' {
                        return Ok(RowStep::Comment {
                            consumed: rel + 2,
                            newlines: 1,
                        });
                    }
                    if opts.lone_cr_terminates {
                        return Ok(RowStep::Comment {
                            consumed: rel + 1,
                            newlines: 1,
                        });
                    }
                    from = rel + 1;
                } else {
                    if !at_eof {
                        return Ok(RowStep::NeedMore);
                    }
                    if opts.lone_cr_terminates {
                        return Ok(RowStep::Comment {
                            consumed: rel + 1,
                            newlines: 1,
                        });
                    }
                    return Ok(RowStep::Comment {
                        consumed: row.len(),
                        newlines: 0,
                    });
                }
            }
            None => {
                if !at_eof {
                    return Ok(RowStep::NeedMore);
                }
                return Ok(RowStep::Comment {
                    consumed: row.len(),
                    newlines: 0,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Limits, Trim};

    fn parse(input: &[u8], start: usize, opts: &Options, at_eof: bool) -> Result<(RowStep, Vec<u32>)> {
        let classes = classes_for(opts);
        let kernel = Kernel::detect();
        let mut ends = Vec::new();
        let step = parse_row(input, start, opts, &classes, kernel, at_eof, &mut ends)?;
        Ok((step, ends))
    }

    fn row_of(input: &[u8], opts: &Options) -> (RowOutput, Vec<u32>) {
        match parse(input, 0, opts, true) {
            Ok((RowStep::Row(out), ends)) => (out, ends),
            other => panic!("expected a row, got {other:?}"),
        }
    }

    fn err_of(input: &[u8], opts: &Options) -> Error {
        match parse(input, 0, opts, true) {
            Err(e) => e,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_row() {
        let opts = Options::default();
        let (out, ends) = row_of(b"a,b,c\n1,2,3\n", &opts);
        assert_eq!(out.content_len, 5);
        assert_eq!(out.consumed, 6);
        assert_eq!(out.newlines, 1);
        assert_eq!(ends, vec![1, 3, 5]);
    }

    #[test]
    fn test_row_at_offset() {
        let opts = Options::default();
        let input = b"a,b,c\n1,22,333\n";
        let (step, ends) = parse(input, 6, &opts, true).unwrap();
        let RowStep::Row(out) = step else {
            panic!("expected row");
        };
        assert_eq!(out.content_len, 8);
        assert_eq!(out.consumed, 9);
        assert_eq!(ends, vec![1, 4, 8]);
    }

    #[test]
    fn test_final_row_without_terminator() {
        let opts = Options::default();
        let (out, ends) = row_of(b"x,y", &opts);
        assert_eq!(out.content_len, 3);
        assert_eq!(out.consumed, 3);
        assert_eq!(out.newlines, 0);
        assert_eq!(ends, vec![1, 3]);
    }

    #[test]
    fn test_empty_fields() {
        let opts = Options::default();
        let (out, ends) = row_of(b",,\n", &opts);
        assert_eq!(out.content_len, 2);
        assert_eq!(ends, vec![0, 1, 2], "three empty columns");

        let (out, ends) = row_of(b"a,,b,\n", &opts);
        assert_eq!(out.content_len, 5);
        assert_eq!(ends, vec![1, 2, 4, 5], "trailing delimiter yields an empty column");
        assert!(ends.windows(2).all(|w| w[0] < w[1]), "strictly increasing");
    }

    #[test]
    fn test_crlf_and_lone_cr() {
        let opts = Options::default();
        // CRLF
        let (out, ends) = row_of(b"a,b\r\nc,d\n", &opts);
        assert_eq!(out.content_len, 3);
        assert_eq!(out.consumed, 5);
        assert_eq!(ends, vec![1, 3]);

        // Lone CR terminates in the default profile.
        let (out, _) = row_of(b"c,d\re,f\n", &opts);
        assert_eq!(out.content_len, 3);
        assert_eq!(out.consumed, 4);
    }

    #[test]
    fn test_bare_cr_as_data_when_disabled() {
        let opts = Options {
            lone_cr_terminates: false,
            ..Options::default()
        };
        let (out, ends) = row_of(b"a\rb\n", &opts);
        assert_eq!(out.content_len, 3, "bare CR stays in the field");
        assert_eq!(ends, vec![3]);

        // CRLF still terminates at the CR.
        let (out, ends) = row_of(b"a,b\r\nc\n", &opts);
        assert_eq!(out.content_len, 3);
        assert_eq!(out.consumed, 5);
        assert_eq!(ends, vec![1, 3]);
    }

    #[test]
    fn test_quoted_delimiter_and_newline() {
        let opts = Options::default();
        let (out, ends) = row_of(b"a,\"b,c\",d\n", &opts);
        assert_eq!(ends, vec![1, 7, 9]);
        assert!(out.saw_quote);

        let (out, ends) = row_of(b"a,\"line1\nline2\",b\nx,y,z\n", &opts);
        assert_eq!(out.content_len, 17);
        assert_eq!(out.consumed, 18);
        assert_eq!(out.newlines, 2, "quoted LF plus terminator");
        assert_eq!(ends, vec![1, 15, 17]);
    }

    #[test]
    fn test_quoted_newline_rejected_when_disabled() {
        let opts = Options {
            newlines_in_quotes: false,
            ..Options::default()
        };
        let err = err_of(b"a,\"line1\nline2\",b\n", &opts);
        assert!(matches!(err.kind(), ErrorKind::UnterminatedQuote));
        assert_eq!(err.byte_offset(), Some(8), "offset of the quoted newline");
    }

    #[test]
    fn test_quoted_newline_after_terminator_is_next_rows_business() {
        // Both rows fit in one kernel block; the quoted newline in row
        // 2 must not leak into row 1's scan.
        let opts = Options {
            newlines_in_quotes: false,
            ..Options::default()
        };
        let input = b"a,b\n\"x\ny\",z\n";
        let (step, ends) = parse(input, 0, &opts, true).unwrap();
        let RowStep::Row(out) = step else {
            panic!("expected row");
        };
        assert_eq!(out.content_len, 3);
        assert_eq!(out.newlines, 1);
        assert_eq!(ends, vec![1, 3]);
    }

    #[test]
    fn test_unterminated_quote_at_eof() {
        let opts = Options::default();
        let err = err_of(b"a,\"open", &opts);
        assert!(matches!(err.kind(), ErrorKind::UnterminatedQuote));

        // Lax mode keeps the tail as the final row.
        let lax = Options {
            quote_mode: QuoteMode::Lax,
            ..Options::default()
        };
        let (out, ends) = row_of(b"a,\"open", &lax);
        assert_eq!(out.content_len, 7);
        assert_eq!(ends, vec![1, 7]);
    }

    #[test]
    fn test_need_more_mid_quote() {
        let opts = Options::default();
        let (step, _) = parse(b"a,\"open", 0, &opts, false).unwrap();
        assert_eq!(step, RowStep::NeedMore);
    }

    #[test]
    fn test_need_more_on_cr_at_edge() {
        let opts = Options::default();
        let (step, _) = parse(b"a,b\r", 0, &opts, false).unwrap();
        assert_eq!(step, RowStep::NeedMore, "CRLF vs lone CR is undecidable");

        let (step, ends) = parse(b"a,b\r", 0, &opts, true).unwrap();
        let RowStep::Row(out) = step else {
            panic!("expected row");
        };
        assert_eq!(out.content_len, 3);
        assert_eq!(out.consumed, 4);
        assert_eq!(ends, vec![1, 3]);
    }

    #[test]
    fn test_comment_line() {
        let opts = Options {
            comment: Some(b'#'),
            ..Options::default()
        };
        let (step, _) = parse(b"# header comment\na,b\n", 0, &opts, true).unwrap();
        assert_eq!(
            step,
            RowStep::Comment {
                consumed: 17,
                newlines: 1
            }
        );

        // Comment char mid-row is data.
        let (out, ends) = row_of(b"a,#b\n", &opts);
        assert_eq!(out.content_len, 4);
        assert_eq!(ends, vec![1, 4]);
    }

    #[test]
    fn test_comment_at_eof_without_newline() {
        let opts = Options {
            comment: Some(b'#'),
            ..Options::default()
        };
        let (step, _) = parse(b"# trailing", 0, &opts, true).unwrap();
        assert_eq!(
            step,
            RowStep::Comment {
                consumed: 10,
                newlines: 0
            }
        );

        let (step, _) = parse(b"# trailing", 0, &opts, false).unwrap();
        assert_eq!(step, RowStep::NeedMore);
    }

    #[test]
    fn test_too_many_columns() {
        let opts = Options {
            limits: Limits {
                max_columns: Some(3),
                ..Limits::default()
            },
            ..Options::default()
        };
        let err = err_of(b"a,b,c,d,e\n", &opts);
        assert!(matches!(err.kind(), ErrorKind::TooManyColumns { limit: 3 }));
        // Detected at the delimiter that would complete column 4.
        assert_eq!(err.byte_offset(), Some(7));
        assert_eq!(err.column(), Some(3));

        // Exactly at the limit is fine.
        let (_, ends) = row_of(b"a,b,c\n", &opts);
        assert_eq!(ends.len(), 3);
    }

    #[test]
    fn test_field_too_large() {
        let opts = Options {
            limits: Limits {
                max_field_size: Some(4),
                ..Limits::default()
            },
            ..Options::default()
        };
        let err = err_of(b"abcdef,x\n", &opts);
        assert!(matches!(
            err.kind(),
            ErrorKind::FieldTooLarge { size: 6, limit: 4 }
        ));
        assert_eq!(err.column(), Some(0));

        let (_, ends) = row_of(b"abcd,x\n", &opts);
        assert_eq!(ends, vec![4, 6]);
    }

    #[test]
    fn test_row_too_large() {
        let opts = Options {
            limits: Limits {
                max_row_size: Some(8),
                max_field_size: Some(8),
                ..Limits::default()
            },
            ..Options::default()
        };
        let err = err_of(b"aaaa,bbbb,cccc,dddd\n", &opts);
        assert!(matches!(err.kind(), ErrorKind::RowTooLarge { .. }));

        let (out, _) = row_of(b"aaa,bbb\nrest\n", &opts);
        assert_eq!(out.content_len, 7);
    }

    #[test]
    fn test_strict_quote_shape() {
        let opts = Options::default();
        // Quote opening mid-field.
        let err = err_of(b"ab\"cd\",x\n", &opts);
        assert!(matches!(err.kind(), ErrorKind::MalformedQuote));
        assert_eq!(err.column(), Some(0));

        // Lax mode accepts it as literal bytes.
        let lax = Options {
            quote_mode: QuoteMode::Lax,
            ..Options::default()
        };
        let (out, ends) = row_of(b"ab\"cd\",x\n", &lax);
        assert_eq!(out.content_len, 8);
        assert_eq!(ends, vec![6, 8]);
    }

    #[test]
    fn test_strict_quote_with_trim_allows_padding() {
        let opts = Options {
            trim: Trim::Both,
            ..Options::default()
        };
        let (out, ends) = row_of(b"  \"a\"  ,b\n", &opts);
        assert_eq!(out.content_len, 9);
        assert_eq!(ends, vec![7, 9]);
    }

    #[test]
    fn test_quoting_disabled() {
        let opts = Options {
            quoting: false,
            ..Options::default()
        };
        let (out, ends) = row_of(b"a,\"b,c\",d\n", &opts);
        assert!(!out.saw_quote);
        assert_eq!(ends, vec![1, 4, 7, 9], "quotes are plain data");
    }

    #[test]
    fn test_distinct_escape_byte() {
        let opts = Options {
            escape: Some(b'\\'),
            ..Options::default()
        };
        // \" inside the quoted field is a literal quote, not a close.
        let (out, ends) = row_of(b"a,\"b\\\",c\",d\n", &opts);
        assert!(out.saw_quote);
        assert_eq!(ends, vec![1, 9, 11]);
    }

    #[test]
    fn test_delimiter_variants() {
        for delim in [b';', b'\t', b'|'] {
            let opts = Options::with_delimiter(delim);
            let mut input = Vec::new();
            input.extend_from_slice(b"a");
            input.push(delim);
            input.extend_from_slice(b"b");
            input.push(delim);
            input.extend_from_slice(b"c\n");
            let (out, ends) = row_of(&input, &opts);
            assert_eq!(out.content_len, 5);
            assert_eq!(ends, vec![1, 3, 5]);
        }
    }

    #[test]
    fn test_structural_bytes_at_block_boundaries() {
        // Place quotes, delimiters, and both terminator shapes at every
        // block-edge offset of every kernel width; all widths must
        // agree with the scalar reference.
        use crate::core::kernel::BlockWidth;
        let widths = [
            BlockWidth::Wide64,
            BlockWidth::Wide32,
            BlockWidth::Base16,
            BlockWidth::Scalar,
        ];
        // Lax mode so mid-field quote placements are data, not errors;
        // mask agreement is what is under test here.
        let opts = Options {
            quote_mode: QuoteMode::Lax,
            ..Options::default()
        };
        let classes = classes_for(&opts);

        for edge in [15usize, 16, 31, 32, 63, 64] {
            for pattern in [",x", "\r\nx", "\nx", "\"q\"x"] {
                let mut input = vec![b'a'; edge];
                input.extend_from_slice(pattern.as_bytes());
                input.extend_from_slice(b",tail\n");

                let mut reference = None;
                for width in widths {
                    let mut ends = Vec::new();
                    let step = parse_row(
                        &input,
                        0,
                        &opts,
                        &classes,
                        Kernel::fixed(width),
                        true,
                        &mut ends,
                    )
                    .unwrap();
                    let got = (step, ends);
                    match &reference {
                        None => reference = Some(got),
                        Some(want) => assert_eq!(
                            &got, want,
                            "width {width:?} diverges at edge {edge} pattern {pattern:?}"
                        ),
                    }
                }
            }
        }
    }

    #[test]
    fn test_quote_spanning_whole_blocks() {
        // A quoted field longer than any block width keeps its carry
        // across every boundary.
        let opts = Options::default();
        let mut input = b"head,\"".to_vec();
        input.extend(std::iter::repeat(b'q').take(200));
        input.extend_from_slice(b"\",tail\n");
        let (out, ends) = row_of(&input, &opts);
        assert_eq!(ends.len(), 3);
        assert_eq!(out.content_len, input.len() - 1);
        assert!(out.saw_quote);
    }

    #[test]
    fn test_long_row_spanning_many_blocks() {
        let opts = Options::default();
        let mut input = Vec::new();
        let mut expected_ends = Vec::new();
        for i in 0..100 {
            if i > 0 {
                input.push(b',');
            }
            input.extend_from_slice(b"val");
            expected_ends.push(input.len() as u32);
        }
        input.push(b'\n');
        let (out, ends) = row_of(&input, &opts);
        assert_eq!(out.content_len, input.len() - 1);
        assert_eq!(ends, expected_ends);
    }
}
