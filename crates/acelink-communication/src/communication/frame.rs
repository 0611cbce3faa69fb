//! Wire frame codec
//!
//! Frame layout:
//!
//! ```text
//! 0xFF 0xAA | len: u16 LE | payload (len bytes) | crc: u16 LE | 0xFE
//! ```
//!
//! The payload is a UTF-8 JSON document. The checksum covers the payload
//! only.

use super::message::{Request, Response};
use acelink_core::{FrameError, RequestError};

/// Frame start marker
pub const FRAME_HEADER: [u8; 2] = [0xFF, 0xAA];

/// Frame end marker
pub const FRAME_TERMINATOR: u8 = 0xFE;

/// Header, length, checksum and terminator bytes around the payload
pub const FRAME_OVERHEAD: usize = 7;

/// Smallest candidate worth decoding
pub const MIN_FRAME_LEN: usize = FRAME_OVERHEAD;

/// 16-bit checksum over the payload bytes
pub fn checksum(payload: &[u8]) -> u16 {
    let mut crc: u32 = 0xFFFF;
    for &byte in payload {
        let mut data = u32::from(byte) ^ (crc & 0xFF);
        data ^= (data & 0x0F) << 4;
        crc = (((data << 8) | (crc >> 8)) ^ (data >> 4) ^ (data << 3)) & 0xFFFF;
    }
    crc as u16
}

/// Wrap a payload in a frame
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(payload.len())
        .map_err(|_| FrameError::PayloadTooLarge { len: payload.len() })?;

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&FRAME_HEADER);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum(payload).to_le_bytes());
    frame.push(FRAME_TERMINATOR);
    Ok(frame)
}

/// Validate a candidate frame and borrow its payload
///
/// `candidate` runs from the first byte after the previous terminator up to
/// and including the next terminator. Bytes past the declared payload and
/// checksum are ignored.
pub fn decode_frame(candidate: &[u8]) -> Result<&[u8], FrameError> {
    if candidate.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort {
            len: candidate.len(),
        });
    }
    if candidate[..2] != FRAME_HEADER {
        return Err(FrameError::MalformedHeader {
            found: [candidate[0], candidate[1]],
        });
    }

    let len = usize::from(u16::from_le_bytes([candidate[2], candidate[3]]));
    let expected = len + FRAME_OVERHEAD;
    if candidate.len() < expected {
        return Err(FrameError::Incomplete {
            expected,
            actual: candidate.len(),
        });
    }

    let payload = &candidate[4..4 + len];
    let received = u16::from_le_bytes([candidate[4 + len], candidate[5 + len]]);
    let computed = checksum(payload);
    if received != computed {
        return Err(FrameError::ChecksumMismatch { received, computed });
    }

    Ok(payload)
}

/// Serialize and frame a request
pub fn encode_request(request: &Request) -> Result<Vec<u8>, RequestError> {
    let payload = serde_json::to_vec(request).map_err(|e| RequestError::Encode {
        reason: e.to_string(),
    })?;
    encode_frame(&payload).map_err(|e| RequestError::Encode {
        reason: e.to_string(),
    })
}

/// Parse a frame payload as a response
pub fn decode_response(payload: &[u8]) -> Result<Response, FrameError> {
    serde_json::from_slice(payload).map_err(|e| FrameError::PayloadDecode {
        reason: e.to_string(),
    })
}
