//! Call frame encodings used when callback addressing crosses a process boundary.
//!
//! Two forms are supported:
//!
//! - text: every frame is written as `correlationId,callbackUri,`; an empty correlation segment
//!   stands for a stateless frame.
//! - binary: a big-endian `u32` frame count, then per frame a `u32` length-prefixed UTF-8
//!   correlation id (length 0 for stateless frames) followed by a `u32` length-prefixed callback
//!   URI.
//!
//! Subjects and headers are never encoded.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::CallFrame;

const DELIMITER: char = ',';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameCodecError {
    #[error("frame field contains the delimiter: {0}")]
    Delimiter(String),
    #[error("encoded frames do not end with a delimiter")]
    MissingTerminator,
    #[error("encoded frames contain an unpaired segment")]
    Unpaired,
    #[error("encoded frames are truncated")]
    Truncated,
    #[error("frame field is not valid utf-8")]
    InvalidUtf8,
    #[error("frame field exceeds u32 length")]
    TooLong,
}

pub fn serialize_to_string(frames: &[CallFrame]) -> Result<String, FrameCodecError> {
    let mut out = String::new();
    for frame in frames {
        let correlation = frame.correlation_id().unwrap_or_default();
        for field in [correlation, frame.callback_uri()] {
            if field.contains(DELIMITER) {
                return Err(FrameCodecError::Delimiter(field.to_string()));
            }
            out.push_str(field);
            out.push(DELIMITER);
        }
    }
    Ok(out)
}

pub fn deserialize_string(encoded: &str) -> Result<Vec<CallFrame>, FrameCodecError> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    let body = encoded
        .strip_suffix(DELIMITER)
        .ok_or(FrameCodecError::MissingTerminator)?;
    let segments: Vec<&str> = body.split(DELIMITER).collect();
    if segments.len() % 2 != 0 {
        return Err(FrameCodecError::Unpaired);
    }
    Ok(segments
        .chunks_exact(2)
        .map(|pair| CallFrame::new(pair[1], Some(pair[0].to_string())))
        .collect())
}

pub fn serialize_to_bytes(frames: &[CallFrame]) -> Result<Bytes, FrameCodecError> {
    let mut buf = BytesMut::with_capacity(4 + frames.len() * 32);
    buf.put_u32(len_u32(frames.len())?);
    for frame in frames {
        let correlation = frame.correlation_id().unwrap_or_default();
        buf.put_u32(len_u32(correlation.len())?);
        buf.put_slice(correlation.as_bytes());
        buf.put_u32(len_u32(frame.callback_uri().len())?);
        buf.put_slice(frame.callback_uri().as_bytes());
    }
    Ok(buf.freeze())
}

pub fn deserialize_bytes(mut buf: impl Buf) -> Result<Vec<CallFrame>, FrameCodecError> {
    let count = read_u32(&mut buf)? as usize;
    // each frame takes at least two length prefixes
    let mut frames = Vec::with_capacity(count.min(buf.remaining() / 8));
    for _ in 0..count {
        let correlation = read_field(&mut buf)?;
        let callback_uri = read_field(&mut buf)?;
        frames.push(CallFrame::new(callback_uri, Some(correlation)));
    }
    Ok(frames)
}

fn len_u32(len: usize) -> Result<u32, FrameCodecError> {
    u32::try_from(len).map_err(|_| FrameCodecError::TooLong)
}

fn read_u32(buf: &mut impl Buf) -> Result<u32, FrameCodecError> {
    if buf.remaining() < 4 {
        return Err(FrameCodecError::Truncated);
    }
    Ok(buf.get_u32())
}

fn read_field(buf: &mut impl Buf) -> Result<String, FrameCodecError> {
    let len = read_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(FrameCodecError::Truncated);
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameCodecError::InvalidUtf8)
}
