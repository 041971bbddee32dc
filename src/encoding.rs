// UTF-16 → UTF-8 transcode entry path.
//
// The canonical parser operates on UTF-8 bytes; UTF-16 input is
// transcoded once at the boundary into a pooled buffer and every
// subsequent operation (configured delimiter included) runs on the
// byte parser. Pure std, no codec crate.

use crate::error::{Error, ErrorKind, Result};
use crate::options::Options;
use crate::pool::PooledBuf;
use crate::reader::Reader;

const BOM: u16 = 0xFEFF;

/// Transcode UTF-16 code units (BOM consumed) into UTF-8 bytes.
///
/// Fast path: a run of ASCII units copies byte-per-unit without going
/// through `char` decoding.
pub fn transcode_utf16(units: &[u16]) -> Result<PooledBuf> {
    let units = if units.first() == Some(&BOM) {
        &units[1..]
    } else {
        units
    };

    let mut out = PooledBuf::acquire(units.len() + units.len() / 2);
    let vec = out.as_mut_vec();
    let mut i = 0;
    let mut utf8 = [0u8; 4];

    while i < units.len() {
        // ASCII run
        let run_start = i;
        while i < units.len() && units[i] < 0x80 {
            i += 1;
        }
        if i > run_start {
            vec.extend(units[run_start..i].iter().map(|&u| u as u8));
            continue;
        }

        // Non-ASCII: decode one scalar (possibly a surrogate pair).
        let rest = &units[i..];
        let mut decoder = char::decode_utf16(rest.iter().copied());
        match decoder.next() {
            Some(Ok(c)) => {
                vec.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                i += c.len_utf16();
            }
            Some(Err(e)) => {
                return Err(Error::new(ErrorKind::InvalidEncoding(format!(
                    "unpaired surrogate 0x{:04X}",
                    e.unpaired_surrogate()
                )))
                .with_offset((i * 2) as u64));
            }
            None => break,
        }
    }

    Ok(out)
}

/// Transcode raw UTF-16 bytes, detecting endianness from the BOM
/// (little-endian assumed when absent).
pub fn transcode_utf16_bytes(bytes: &[u8]) -> Result<PooledBuf> {
    if bytes.len() % 2 != 0 {
        return Err(Error::new(ErrorKind::InvalidEncoding(
            "UTF-16 input has odd byte length".into(),
        )));
    }

    let big_endian = bytes.starts_with(&[0xFE, 0xFF]);
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    transcode_utf16(&units)
}

/// A transcoded UTF-16 input, ready to hand out byte readers.
///
/// The backing buffer is pooled; it returns to the pool when the input
/// is dropped (after every reader borrowed from it).
pub struct Utf16Input {
    bytes: PooledBuf,
}

impl Utf16Input {
    pub fn from_units(units: &[u16]) -> Result<Self> {
        Ok(Utf16Input {
            bytes: transcode_utf16(units)?,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Utf16Input {
            bytes: transcode_utf16_bytes(bytes)?,
        })
    }

    /// The transcoded UTF-8 bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A reader over the transcoded bytes. The configured delimiter
    /// applies here exactly as on the direct byte path.
    pub fn reader(&self, opts: Options) -> Result<Reader<'_>> {
        Reader::new(&self.bytes, opts)
    }
}
