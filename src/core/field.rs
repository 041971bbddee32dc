// Field shape helpers: trimming, quote stripping, unescaping.
//
// Pure functions over raw field slices. The parser never materializes
// unescaped text; consumers call into these lazily through the column
// views, supplying their own scratch buffer.

use memchr::memchr;

use crate::options::Trim;

/// Count of leading ASCII space/tab bytes.
#[inline]
pub fn leading_ws(s: &[u8]) -> usize {
    s.iter().take_while(|&&b| b == b' ' || b == b'\t').count()
}

/// Count of trailing ASCII space/tab bytes.
#[inline]
pub fn trailing_ws(s: &[u8]) -> usize {
    s.iter()
        .rev()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count()
}

/// Trim per policy. Whitespace set is ASCII space and tab.
#[inline]
pub fn trim_slice(s: &[u8], trim: Trim) -> &[u8] {
    let start = if trim.leading() { leading_ws(s) } else { 0 };
    let rest = &s[start..];
    let end = if trim.trailing() {
        rest.len() - trailing_ws(rest)
    } else {
        rest.len()
    };
    &rest[..end]
}

/// True when the field is wrapped in quotes (first and last byte).
#[inline]
pub fn is_quoted(field: &[u8], quote: u8) -> bool {
    field.len() >= 2 && field[0] == quote && field[field.len() - 1] == quote
}

/// Strip surrounding quotes when present; otherwise return as-is.
#[inline]
pub fn strip_quotes(field: &[u8], quote: u8) -> &[u8] {
    if is_quoted(field, quote) {
        &field[1..field.len() - 1]
    } else {
        field
    }
}

/// Whether the (already quote-stripped) content still contains escape
/// work: doubled quotes, or escape bytes in distinct-escape mode.
#[inline]
pub fn needs_unescape(inner: &[u8], quote: u8, escape: u8) -> bool {
    if escape == quote {
        memchr(quote, inner).is_some()
    } else {
        memchr(escape, inner).is_some()
    }
}

/// Resolve escapes in quoted-field content into `scratch`, or return
/// the input untouched when there is nothing to resolve. No allocation
/// happens on the untouched path.
pub fn unescape_into<'a>(
    inner: &'a [u8],
    quote: u8,
    escape: u8,
    scratch: &'a mut Vec<u8>,
) -> &'a [u8] {
    if !needs_unescape(inner, quote, escape) {
        return inner;
    }

    scratch.clear();
    scratch.reserve(inner.len());
    let mut i = 0;
    if escape == quote {
        // RFC 4180: "" collapses to ".
        while i < inner.len() {
            if inner[i] == quote && i + 1 < inner.len() && inner[i + 1] == quote {
                scratch.push(quote);
                i += 2;
            } else {
                scratch.push(inner[i]);
                i += 1;
            }
        }
    } else {
        // Distinct escape byte: the escape drops, the next byte is
        // literal. A trailing escape with nothing to protect drops too.
        while i < inner.len() {
            if inner[i] == escape && i + 1 < inner.len() {
                scratch.push(inner[i + 1]);
                i += 2;
            } else if inner[i] == escape {
                i += 1;
            } else {
                scratch.push(inner[i]);
                i += 1;
            }
        }
    }
    scratch.as_slice()
}

/// Strict-mode quote placement check for one completed field.
///
/// Returns `Err(offset)` (relative to the field start) at the first
/// byte violating RFC 4180 placement: a quote inside an unquoted
/// field, a lone quote mid-way through a quoted field, or a quoted
/// field without its closing quote.
pub fn validate_quote_shape(field: &[u8], quote: u8, escape: u8, trim: Trim) -> Result<(), usize> {
    let lead = if trim.leading() { leading_ws(field) } else { 0 };
    let trail = if trim.trailing() {
        trailing_ws(&field[lead..])
    } else {
        0
    };
    let body = &field[lead..field.len() - trail];

    if body.is_empty() {
        return Ok(());
    }
    if body[0] != quote {
        // Unquoted fields must not contain the quote byte at all.
        return match memchr(quote, body) {
            Some(i) => Err(lead + i),
            None => Ok(()),
        };
    }
    if body.len() == 1 {
        return Err(lead);
    }

    let doubled = escape == quote;
    let last = body.len() - 1;
    let mut i = 1;
    while i < last {
        let b = body[i];
        if !doubled && b == escape {
            i += 2;
            continue;
        }
        if b == quote {
            if doubled && body[i + 1] == quote {
                i += 2;
                continue;
            }
            // Close quote followed by trailing bytes.
            return Err(lead + i);
        }
        i += 1;
    }
    if i == last && body[last] == quote {
        Ok(())
    } else {
        // Closing quote missing (or consumed by a trailing escape).
        Err(lead)
    }
}
