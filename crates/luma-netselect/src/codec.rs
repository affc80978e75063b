//! Wire framing shared by both response shapes.
//!
//! A frame is an 8-byte big-endian length followed by the payload. When
//! compression is on, the payload is the zstd encoding of the whole raw
//! buffer, compressed in one shot. Streaming responses are a plain sequence
//! of frames terminated by end of stream; value-list responses are a single
//! payload with no length prefix, framed by the HTTP body itself.

use crate::error::{Result, SelectError};
use bytes::{Buf, Bytes, BytesMut};
use std::borrow::Cow;
use tokio_util::codec::Decoder;

pub const FRAME_HEADER_LEN: usize = 8;

const COMPRESSION_LEVEL: i32 = 1;

// Upper bound on how much buffer space is reserved ahead of a frame body;
// larger frames grow the buffer as bytes actually arrive.
const MAX_RESERVE: usize = 1 << 20;

pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::encode_all(raw, COMPRESSION_LEVEL).map_err(|source| SelectError::Compress {
        len: raw.len(),
        source,
    })
}

/// Decompresses `src` into `dst`, replacing its previous contents.
pub fn decompress_into(src: &[u8], dst: &mut Vec<u8>) -> Result<()> {
    dst.clear();
    zstd::stream::copy_decode(src, &mut *dst).map_err(|source| SelectError::Decompress {
        len: src.len(),
        source,
    })
}

pub fn encode_payload(raw: &[u8], compressed: bool) -> Result<Cow<'_, [u8]>> {
    if compressed {
        compress(raw).map(Cow::Owned)
    } else {
        Ok(Cow::Borrowed(raw))
    }
}

/// Returns the raw bytes of `payload`, decompressing into `scratch` when needed.
pub fn decode_payload<'a>(
    payload: &'a [u8],
    compressed: bool,
    scratch: &'a mut Vec<u8>,
) -> Result<&'a [u8]> {
    if compressed {
        decompress_into(payload, scratch)?;
        Ok(scratch.as_slice())
    } else {
        Ok(payload)
    }
}

pub fn frame_header(payload_len: usize) -> [u8; FRAME_HEADER_LEN] {
    (payload_len as u64).to_be_bytes()
}

/// Appends one complete frame carrying `raw` to `dst`.
pub fn encode_frame(dst: &mut Vec<u8>, raw: &[u8], compressed: bool) -> Result<()> {
    let payload = encode_payload(raw, compressed)?;
    dst.extend_from_slice(&frame_header(payload.len()));
    dst.extend_from_slice(&payload);
    Ok(())
}

/// Validates a length prefix read off the wire.
pub fn frame_len(raw: u64) -> Result<usize> {
    if raw > isize::MAX as u64 {
        return Err(SelectError::MalformedFrame(format!(
            "frame length {} exceeds the maximum supported length {}",
            raw,
            isize::MAX
        )));
    }
    Ok(raw as usize)
}

/// Splits a byte stream into frame payloads.
///
/// Input may arrive split at arbitrary points; a stream that ends inside a
/// frame is an error.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameDecoder {
    type Item = Bytes;
    type Error = SelectError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let len = match self.pending {
            Some(len) => len,
            None => {
                if src.len() < FRAME_HEADER_LEN {
                    return Ok(None);
                }
                let len = frame_len(src.get_u64())?;
                self.pending = Some(len);
                len
            }
        };
        if src.len() < len {
            src.reserve((len - src.len()).min(MAX_RESERVE));
            return Ok(None);
        }
        self.pending = None;
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.pending {
            None if src.is_empty() => Ok(None),
            None => Err(SelectError::MalformedFrame(format!(
                "stream ended after {} of {} length prefix bytes",
                src.len(),
                FRAME_HEADER_LEN
            ))),
            Some(len) => Err(SelectError::MalformedFrame(format!(
                "stream ended after {} of {} frame bytes",
                src.len(),
                len
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockReader, DataBlock};

    fn sample_block(tag: &str, rows: usize) -> DataBlock {
        let mut block = DataBlock::new();
        block
            .add_column("_msg", (0..rows).map(|i| format!("{tag}-{i}")).collect())
            .unwrap();
        block
            .add_column("tag", (0..rows).map(|_| tag.to_string()).collect())
            .unwrap();
        block
    }

    /// Encodes `frames` (each a list of blocks) into one byte stream.
    fn encode_stream(frames: &[Vec<DataBlock>], compressed: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for blocks in frames {
            let mut raw = Vec::new();
            for b in blocks {
                b.marshal(&mut raw);
            }
            encode_frame(&mut out, &raw, compressed).unwrap();
        }
        out
    }

    /// Feeds `stream` to the decoder `chunk` bytes at a time.
    fn decode_stream(stream: &[u8], chunk: usize, compressed: bool) -> Result<Vec<DataBlock>> {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        let mut payloads = Vec::new();
        for piece in stream.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(frame) = decoder.decode(&mut buf)? {
                payloads.push(frame);
            }
        }
        while let Some(frame) = decoder.decode_eof(&mut buf)? {
            payloads.push(frame);
        }

        let mut blocks = Vec::new();
        let mut scratch = Vec::new();
        let mut block = DataBlock::new();
        for payload in payloads {
            let raw = decode_payload(&payload, compressed, &mut scratch)?;
            let mut reader = BlockReader::new(raw);
            while reader.read_next(&mut block)? {
                blocks.push(block.clone());
            }
        }
        Ok(blocks)
    }

    #[test]
    fn test_frames_round_trip_with_and_without_compression() {
        let frames = vec![
            vec![],
            vec![sample_block("single", 3)],
            vec![
                sample_block("a", 1),
                sample_block("b", 10),
                DataBlock::new(),
                sample_block("c", 100),
            ],
        ];
        let expected: Vec<DataBlock> = frames.iter().flatten().cloned().collect();

        for compressed in [false, true] {
            let stream = encode_stream(&frames, compressed);
            for chunk in [1, 3, 7, 64, stream.len()] {
                let got = decode_stream(&stream, chunk, compressed).unwrap();
                assert_eq!(got, expected, "compressed={compressed} chunk={chunk}");
            }
        }
    }

    #[test]
    fn test_decoding_twice_is_identical() {
        let stream = encode_stream(&[vec![sample_block("x", 5), sample_block("y", 2)]], true);
        let first = decode_stream(&stream, 5, true).unwrap();
        let second = decode_stream(&stream, 5, true).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_stream_has_no_frames() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        assert!(decoder.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&u64::MAX.to_be_bytes()[..]);
        let capacity_before = buf.capacity();
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(SelectError::MalformedFrame(_))
        ));
        assert!(buf.capacity() <= capacity_before.max(FRAME_HEADER_LEN));
    }

    #[test]
    fn test_truncated_frame_is_an_error() {
        let stream = encode_stream(&[vec![sample_block("t", 4)]], false);

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&stream[..stream.len() - 1]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(matches!(
            decoder.decode_eof(&mut buf),
            Err(SelectError::MalformedFrame(_))
        ));

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::from(&stream[..3]);
        assert!(matches!(
            decoder.decode_eof(&mut buf),
            Err(SelectError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_corrupt_compressed_payload() {
        let mut scratch = Vec::new();
        assert!(matches!(
            decode_payload(b"definitely not zstd", true, &mut scratch),
            Err(SelectError::Decompress { .. })
        ));
    }
}
