use crate::encoding::{put_bytes, put_u64_be, read_str, read_u64_be, DecodeResult};
use crate::error::{Result, SelectError};
use serde::{Deserialize, Serialize};

/// A value together with the number of times it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueWithHits {
    pub value: String,
    pub hits: u64,
}

impl ValueWithHits {
    pub fn new(value: impl Into<String>, hits: u64) -> Self {
        Self {
            value: value.into(),
            hits,
        }
    }

    pub fn marshal(&self, dst: &mut Vec<u8>) {
        put_bytes(dst, self.value.as_bytes());
        put_u64_be(dst, self.hits);
    }

    /// Decodes one record from the head of `src`. The value is copied out, so
    /// the result does not borrow from `src`.
    pub fn unmarshal(src: &[u8]) -> DecodeResult<(Self, &[u8])> {
        let (value, tail) = read_str(src, "value")?;
        let (hits, tail) = read_u64_be(tail, "hits")?;
        Ok((Self::new(value, hits), tail))
    }
}

pub fn marshal_values_with_hits(values: &[ValueWithHits]) -> Vec<u8> {
    let mut dst = Vec::new();
    for v in values {
        v.marshal(&mut dst);
    }
    dst
}

pub fn unmarshal_values_with_hits(mut src: &[u8]) -> Result<Vec<ValueWithHits>> {
    let mut values = Vec::new();
    while !src.is_empty() {
        let (v, tail) = ValueWithHits::unmarshal(src).map_err(|source| SelectError::Decode {
            what: "value with hits",
            index: values.len(),
            source,
        })?;
        values.push(v);
        src = tail;
    }
    Ok(values)
}
