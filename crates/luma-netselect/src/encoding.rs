//! Varint and length-prefixed byte string primitives shared by the
//! data block and value-with-hits wire formats.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unexpected end of input while reading {what}: need {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: u64,
        have: usize,
    },
    #[error("varint for {what} overflows 64 bits")]
    VarintOverflow { what: &'static str },
    #[error("{what} is not valid UTF-8")]
    InvalidUtf8 { what: &'static str },
}

pub type DecodeResult<T> = std::result::Result<T, EncodingError>;

/// Appends `v` as an unsigned LEB128 varint.
pub fn put_varint(dst: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        dst.push((v as u8) | 0x80);
        v >>= 7;
    }
    dst.push(v as u8);
}

pub fn read_varint<'a>(src: &'a [u8], what: &'static str) -> DecodeResult<(u64, &'a [u8])> {
    let mut v = 0u64;
    let mut shift = 0u32;
    for (i, &b) in src.iter().enumerate() {
        if shift == 63 && b > 1 {
            return Err(EncodingError::VarintOverflow { what });
        }
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok((v, &src[i + 1..]));
        }
        shift += 7;
        if shift > 63 {
            return Err(EncodingError::VarintOverflow { what });
        }
    }
    Err(EncodingError::Truncated {
        what,
        need: src.len() as u64 + 1,
        have: src.len(),
    })
}

pub fn put_bytes(dst: &mut Vec<u8>, b: &[u8]) {
    put_varint(dst, b.len() as u64);
    dst.extend_from_slice(b);
}

pub fn read_bytes<'a>(src: &'a [u8], what: &'static str) -> DecodeResult<(&'a [u8], &'a [u8])> {
    let (len, tail) = read_varint(src, what)?;
    match usize::try_from(len) {
        Ok(n) if n <= tail.len() => Ok(tail.split_at(n)),
        _ => Err(EncodingError::Truncated {
            what,
            need: len,
            have: tail.len(),
        }),
    }
}

pub fn read_str<'a>(src: &'a [u8], what: &'static str) -> DecodeResult<(&'a str, &'a [u8])> {
    let (b, tail) = read_bytes(src, what)?;
    let s = std::str::from_utf8(b).map_err(|_| EncodingError::InvalidUtf8 { what })?;
    Ok((s, tail))
}

pub fn put_u64_be(dst: &mut Vec<u8>, v: u64) {
    dst.extend_from_slice(&v.to_be_bytes());
}

pub fn read_u64_be<'a>(src: &'a [u8], what: &'static str) -> DecodeResult<(u64, &'a [u8])> {
    if src.len() < 8 {
        return Err(EncodingError::Truncated {
            what,
            need: 8,
            have: src.len(),
        });
    }
    let (head, tail) = src.split_at(8);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(head);
    Ok((u64::from_be_bytes(buf), tail))
}
