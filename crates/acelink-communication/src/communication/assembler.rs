//! Byte-stream assembler
//!
//! Accumulates raw serial bytes and splits them into frames at each
//! terminator byte. Candidates that fail validation are dropped without
//! resynchronizing on the header; the stream simply continues after the
//! terminator.

use super::frame::{self, FRAME_TERMINATOR};
use super::message::Response;
use acelink_core::FrameError;

/// Consecutive incomplete frames tolerated before a reset is requested
pub const MAX_INCOMPLETE_MESSAGES: u32 = 10;

/// Result of feeding bytes into the assembler
#[derive(Debug, Default)]
pub struct AssemblerOutput {
    /// Responses decoded from valid frames, in arrival order
    pub responses: Vec<Response>,
    /// Framing has degraded and the link should be reset
    pub reset_requested: bool,
}

/// Counters for dropped candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Valid frames
    pub frames: u64,
    /// Candidates too short or without a header
    pub malformed: u64,
    /// Candidates shorter than their declared length
    pub incomplete: u64,
    /// Candidates with a bad checksum
    pub checksum_errors: u64,
    /// Valid frames whose payload was not a response
    pub decode_errors: u64,
}

/// Frame assembler for the receive path
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    incomplete_count: u32,
    stats: AssemblerStats,
}

impl FrameAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and extract every complete frame
    pub fn push(&mut self, data: &[u8]) -> AssemblerOutput {
        self.buffer.extend_from_slice(data);
        let mut output = AssemblerOutput::default();

        while let Some(end) = self.buffer.iter().position(|&b| b == FRAME_TERMINATOR) {
            let candidate: Vec<u8> = self.buffer.drain(..=end).collect();

            match frame::decode_frame(&candidate) {
                Ok(payload) => {
                    self.incomplete_count = 0;
                    self.stats.frames += 1;
                    match frame::decode_response(payload) {
                        Ok(response) => output.responses.push(response),
                        Err(e) => {
                            self.stats.decode_errors += 1;
                            tracing::warn!("Dropping frame: {}", e);
                        }
                    }
                }
                Err(FrameError::Incomplete { expected, actual }) => {
                    self.stats.incomplete += 1;
                    self.incomplete_count += 1;
                    tracing::info!(
                        "Incomplete message ({} of {} bytes), {} in a row",
                        actual,
                        expected,
                        self.incomplete_count
                    );
                    if self.incomplete_count > MAX_INCOMPLETE_MESSAGES {
                        tracing::warn!(
                            "Too many incomplete messages ({}), requesting reset",
                            self.incomplete_count
                        );
                        self.incomplete_count = 0;
                        output.reset_requested = true;
                    }
                }
                Err(e @ FrameError::ChecksumMismatch { .. }) => {
                    self.stats.checksum_errors += 1;
                    tracing::warn!("Dropping frame: {}", e);
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::debug!("Dropping candidate: {}", e);
                }
            }
        }

        output
    }

    /// Discard buffered bytes and reset the incomplete counter
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.incomplete_count = 0;
    }

    /// Bytes waiting for a terminator
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Consecutive incomplete frames seen since the last valid one
    pub fn incomplete_count(&self) -> u32 {
        self.incomplete_count
    }

    /// Drop counters
    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::frame::encode_frame;

    fn response_frame(id: u32) -> Vec<u8> {
        let payload = format!(r#"{{"id":{},"code":0,"result":{{}}}}"#, id);
        encode_frame(payload.as_bytes()).unwrap()
    }

    fn incomplete_candidate() -> Vec<u8> {
        vec![0xFF, 0xAA, 0x20, 0x00, b'{', b'}', FRAME_TERMINATOR]
    }

    #[test]
    fn test_frame_split_across_pushes() {
        let frame = response_frame(3);
        let mut assembler = FrameAssembler::new();

        let (head, tail) = frame.split_at(5);
        assert!(assembler.push(head).responses.is_empty());
        assert_eq!(assembler.buffered_len(), 5);

        let output = assembler.push(tail);
        assert_eq!(output.responses.len(), 1);
        assert_eq!(output.responses[0].id, Some(3));
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_two_frames_in_one_push() {
        let mut bytes = response_frame(1);
        bytes.extend(response_frame(2));

        let mut assembler = FrameAssembler::new();
        let output = assembler.push(&bytes);
        let ids: Vec<_> = output.responses.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_garbage_before_frame_is_dropped() {
        let mut bytes = vec![0x01, 0x02, FRAME_TERMINATOR];
        bytes.extend(response_frame(9));

        let mut assembler = FrameAssembler::new();
        let output = assembler.push(&bytes);
        assert_eq!(output.responses.len(), 1);
        assert_eq!(assembler.stats().malformed, 1);
    }

    fn corrupted_frame(id: u32) -> Vec<u8> {
        let mut frame = response_frame(id);
        let crc_pos = frame.len() - 3;
        frame[crc_pos] ^= 0x01;
        if frame[crc_pos] == FRAME_TERMINATOR {
            frame[crc_pos] ^= 0x03;
        }
        frame
    }

    #[test]
    fn test_checksum_failure_drops_frame() {
        let mut assembler = FrameAssembler::new();
        let output = assembler.push(&corrupted_frame(4));
        assert!(output.responses.is_empty());
        assert_eq!(assembler.stats().checksum_errors, 1);
    }

    #[test]
    fn test_checksum_failure_does_not_count_as_incomplete() {
        let mut assembler = FrameAssembler::new();
        for _ in 0..3 {
            assembler.push(&incomplete_candidate());
        }

        let output = assembler.push(&corrupted_frame(4));
        assert!(!output.reset_requested);
        assert_eq!(assembler.stats().checksum_errors, 1);
        assert_eq!(assembler.incomplete_count(), 3);
    }

    #[test]
    fn test_reset_after_eleven_incomplete() {
        let mut assembler = FrameAssembler::new();
        for _ in 0..MAX_INCOMPLETE_MESSAGES {
            assert!(!assembler.push(&incomplete_candidate()).reset_requested);
        }
        assert_eq!(assembler.incomplete_count(), MAX_INCOMPLETE_MESSAGES);

        let output = assembler.push(&incomplete_candidate());
        assert!(output.reset_requested);
        assert_eq!(assembler.incomplete_count(), 0);
    }

    #[test]
    fn test_valid_frame_resets_incomplete_counter() {
        let mut assembler = FrameAssembler::new();
        for _ in 0..5 {
            assembler.push(&incomplete_candidate());
        }
        assembler.push(&response_frame(1));
        assert_eq!(assembler.incomplete_count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0xFF, 0xAA, 0x10]);
        assembler.push(&incomplete_candidate());
        assembler.clear();
        assert_eq!(assembler.buffered_len(), 0);
        assert_eq!(assembler.incomplete_count(), 0);
    }
}
