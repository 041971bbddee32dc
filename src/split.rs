// Quote-aware row splitting and parallel parsing.
//
// Consumers that want parallelism run readers over disjoint regions;
// the splitter locates row boundaries while honoring quoting, then the
// rows are parsed independently on the rayon pool. Phase 1 is
// single-threaded (quote state is sequential by nature), phase 2 is
// embarrassingly parallel.

use rayon::prelude::*;

use crate::core::kernel::{Carry, Kernel};
use crate::core::machine::{classes_for, parse_row, RowStep};
use crate::error::{Error, ErrorKind, Result};
use crate::options::Options;
use crate::reader::strip_utf8_bom;
use crate::row::RowView;

/// Byte offsets where rows start, honoring quoted newlines. Offset 0
/// is always present for non-empty input; a trailing terminator does
/// not produce a phantom start at `input.len()`.
pub fn find_row_starts(input: &[u8], opts: &Options) -> Result<Vec<usize>> {
    opts.validate()?;
    Ok(row_starts_validated(strip_utf8_bom(input), opts))
}

fn row_starts_validated(input: &[u8], opts: &Options) -> Vec<usize> {
    let mut starts = Vec::with_capacity(input.len() / 32 + 1);
    if input.is_empty() {
        return starts;
    }
    starts.push(0);

    let classes = classes_for(opts);
    let kernel = Kernel::detect();
    let block_len = kernel.block_len();
    let mut carry = Carry::default();
    let mut pos = 0usize;

    while pos < input.len() {
        let end = (pos + block_len).min(input.len());
        let masks = kernel.scan(&input[pos..end], &classes, carry);

        let mut bits = masks.newlines & !masks.quoted;
        while bits != 0 {
            let at = pos + bits.trailing_zeros() as usize;
            bits &= bits - 1;
            match input[at] {
                b'\n' => starts.push(at + 1),
                _ => {
                    // CR: CRLF is pushed at the LF; a lone CR is its
                    // own terminator in the default profile.
                    if input.get(at + 1) != Some(&b'\n') && opts.lone_cr_terminates {
                        starts.push(at + 1);
                    }
                }
            }
        }

        carry = masks.carry_out;
        pos = end;
    }

    // A terminator on the last byte opens no new row.
    while matches!(starts.last(), Some(&s) if s >= input.len()) {
        starts.pop();
    }
    starts
}

/// Split the input into at most `parts` disjoint regions, each
/// starting and ending on a row boundary (quoting respected). Feed
/// each region to its own reader for consumer-side parallelism; region
/// concatenation reproduces the input.
pub fn split_regions<'a>(input: &'a [u8], opts: &Options, parts: usize) -> Result<Vec<&'a [u8]>> {
    opts.validate()?;
    let input = strip_utf8_bom(input);
    if input.is_empty() || parts <= 1 {
        return Ok(if input.is_empty() {
            Vec::new()
        } else {
            vec![input]
        });
    }

    let starts = row_starts_validated(input, opts);
    let rows_per_part = starts.len().div_ceil(parts);
    let mut regions = Vec::with_capacity(parts);
    let mut begin = 0usize;
    for chunk in starts.chunks(rows_per_part).skip(1) {
        regions.push(&input[begin..chunk[0]]);
        begin = chunk[0];
    }
    regions.push(&input[begin..]);
    Ok(regions)
}

/// Parse all rows in parallel, returning owned, unescaped fields per
/// row. Comment lines and empty rows are dropped (matching the
/// region-per-worker model, which has no global row numbering to
/// preserve).
pub fn parse_rows_parallel(input: &[u8], opts: &Options) -> Result<Vec<Vec<Vec<u8>>>> {
    opts.validate()?;
    let input = strip_utf8_bom(input);
    let starts = row_starts_validated(input, opts);
    if starts.is_empty() {
        return Ok(Vec::new());
    }

    let classes = classes_for(opts);
    let kernel = Kernel::detect();

    let ranges: Vec<(usize, usize)> = starts
        .windows(2)
        .map(|w| (w[0], w[1]))
        .chain(std::iter::once((starts[starts.len() - 1], input.len())))
        .collect();

    let rows: Vec<Option<Vec<Vec<u8>>>> = ranges
        .into_par_iter()
        .map(|(start, end)| {
            parse_region(input, start, end, opts, kernel).map_err(|e| e.rebase_offset(start as u64))
        })
        .collect::<Result<_>>()?;

    let rows: Vec<Vec<Vec<u8>>> = rows.into_iter().flatten().collect();

    if let Some(max) = opts.limits.max_rows {
        if rows.len() as u64 > max {
            return Err(Error::new(ErrorKind::TooManyRows { limit: max }));
        }
    }
    Ok(rows)
}

/// Parse one pre-split region into its row's fields. `None` for
/// comment lines and empty rows.
fn parse_region(
    input: &[u8],
    start: usize,
    end: usize,
    opts: &Options,
    kernel: Kernel,
) -> Result<Option<Vec<Vec<u8>>>> {
    let region = &input[start..end];
    if region.is_empty() {
        return Ok(None);
    }

    let classes = classes_for(opts);
    let mut ends = Vec::new();
    match parse_row(region, 0, opts, &classes, kernel, true, &mut ends)? {
        RowStep::Row(out) => {
            if out.content_len == 0 && ends.len() == 1 {
                return Ok(None);
            }
            let row = RowView::new(&region[..out.content_len], &ends, 0, 0, opts);
            let mut scratch = Vec::new();
            let fields = row
                .columns()
                .map(|c| c.unescaped(&mut scratch).to_vec())
                .collect();
            Ok(Some(fields))
        }
        RowStep::Comment { .. } => Ok(None),
        // Unreachable with at_eof, but harmless to treat as empty.
        RowStep::NeedMore => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    #[test]
    fn test_row_starts_simple() {
        let opts = Options::default();
        assert_eq!(
            find_row_starts(b"a,b\nc,d\ne,f", &opts).unwrap(),
            vec![0, 4, 8]
        );
        // Trailing newline opens no phantom row.
        assert_eq!(find_row_starts(b"a\nb\n", &opts).unwrap(), vec![0, 2]);
        assert_eq!(find_row_starts(b"", &opts).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_row_starts_respect_quotes() {
        let opts = Options::default();
        let input = b"a,\"x\ny\"\nb\n";
        assert_eq!(
            find_row_starts(input, &opts).unwrap(),
            vec![0, 8],
            "quoted newline must not split"
        );
    }

    #[test]
    fn test_row_starts_crlf_and_lone_cr() {
        let opts = Options::default();
        assert_eq!(
            find_row_starts(b"a\r\nb\rc\n", &opts).unwrap(),
            vec![0, 3, 5]
        );

        let no_cr = Options {
            lone_cr_terminates: false,
            ..Options::default()
        };
        assert_eq!(
            find_row_starts(b"a\r\nb\rc\n", &no_cr).unwrap(),
            vec![0, 3],
            "bare CR is data when disabled"
        );
    }

    #[test]
    fn test_split_regions_cover_input_on_row_boundaries() {
        let opts = Options::default();
        let input = b"a,\"multi\nline\",x\nb,2,y\nc,3,z\nd,4,w\n";
        let regions = split_regions(input, &opts, 3).unwrap();
        assert!(regions.len() <= 3 && !regions.is_empty());

        // Concatenation reproduces the input.
        let joined: Vec<u8> = regions.iter().flat_map(|r| r.iter().copied()).collect();
        assert_eq!(joined, input.to_vec());

        // Each region parses independently and the union matches a
        // single serial pass.
        let mut combined = Vec::new();
        for region in &regions {
            let mut r = Reader::new(region, opts.clone()).unwrap();
            combined.extend(r.read_all_rows().unwrap());
        }
        let serial = {
            let mut r = Reader::new(input, opts.clone()).unwrap();
            r.read_all_rows().unwrap()
        };
        assert_eq!(combined, serial);
    }

    #[test]
    fn test_split_regions_degenerate() {
        let opts = Options::default();
        assert!(split_regions(b"", &opts, 4).unwrap().is_empty());
        assert_eq!(split_regions(b"a,b\n", &opts, 1).unwrap(), vec![&b"a,b\n"[..]]);
        // More parts than rows collapses gracefully.
        let regions = split_regions(b"a\nb\n", &opts, 10).unwrap();
        let joined: Vec<u8> = regions.iter().flat_map(|r| r.iter().copied()).collect();
        assert_eq!(joined, b"a\nb\n".to_vec());
    }

    #[test]
    fn test_parallel_matches_serial() {
        let mut input = Vec::new();
        for i in 0..500 {
            if i % 7 == 0 {
                input.extend_from_slice(format!("{i},\"quoted, {i}\"\n").as_bytes());
            } else {
                input.extend_from_slice(format!("{i},plain{i},x\n").as_bytes());
            }
        }
        let opts = Options::default();
        let parallel = parse_rows_parallel(&input, &opts).unwrap();
        let serial = {
            let mut r = Reader::new(&input, opts.clone()).unwrap();
            r.read_all_rows().unwrap()
        };
        assert_eq!(parallel, serial);
    }

    #[test]
    fn test_parallel_skips_comments_and_empties() {
        let opts = Options {
            comment: Some(b'#'),
            ..Options::default()
        };
        let rows = parse_rows_parallel(b"# note\na,b\n\nc,d\n", &opts).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![b"a".to_vec(), b"b".to_vec()],
                vec![b"c".to_vec(), b"d".to_vec()],
            ]
        );
    }

    #[test]
    fn test_parallel_propagates_errors() {
        let opts = Options {
            newlines_in_quotes: false,
            ..Options::default()
        };
        // The quoted newline splits nothing, but the row containing it
        // must fail.
        let err = parse_rows_parallel(b"ok,row\nbad,\"x\ny\"\n", &opts).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnterminatedQuote));
    }

    #[test]
    fn test_parallel_delimiter_variants() {
        for delim in [b';', b'\t', b'|'] {
            let opts = Options::with_delimiter(delim);
            let input = [
                b"a".to_vec(),
                vec![delim],
                b"b\nc".to_vec(),
                vec![delim],
                b"d\n".to_vec(),
            ]
            .concat();
            let rows = parse_rows_parallel(&input, &opts).unwrap();
            assert_eq!(
                rows,
                vec![
                    vec![b"a".to_vec(), b"b".to_vec()],
                    vec![b"c".to_vec(), b"d".to_vec()],
                ]
            );
        }
    }
}
