// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 scservo contributors

//! SCServo frame encoding and receive-side scanning.
//!
//! # Wire Format
//!
//! ```text
//! +------+------+------+--------+-------------+-----------+----------+
//! | 0xFF | 0xFF |  id  | length | instr/error | param ... | checksum |
//! +------+------+------+--------+-------------+-----------+----------+
//! ```
//!
//! - `length` counts every byte after itself, checksum included
//!   (`params + 2`).
//! - The fifth byte is the instruction code on requests and the servo error
//!   bitfield on responses.
//! - `checksum` is the bitwise complement of the 8-bit wrapping sum over
//!   `id ..= last param`. The two header bytes and the checksum itself are
//!   outside the sum.
//! - A frame never exceeds 250 bytes in either direction.
//!
//! # Resynchronisation
//!
//! The bus is half duplex and shared; stale or garbled bytes ahead of a
//! response are normal. [`scan`] is an incremental parser over a growing
//! receive buffer: it asks for more bytes, tells the caller how many leading
//! junk bytes to discard, or yields a checksum-verified frame. A plausible
//! header whose id, length, or error byte is impossible is treated as noise
//! that happened to contain `0xFF 0xFF`, and the search resumes one byte
//! later.

/// Frame header marker bytes.
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Maximum total frame length, both directions.
pub const MAX_FRAME_LEN: usize = 250;

/// Minimum total frame length (header + id + length + error + checksum).
pub const MIN_FRAME_LEN: usize = 6;

/// Offset of the servo id.
pub const POS_ID: usize = 2;
/// Offset of the length field.
pub const POS_LENGTH: usize = 3;
/// Offset of the instruction (request) / error (response) byte.
pub const POS_INSTRUCTION: usize = 4;
/// First parameter offset.
pub const POS_PARAM: usize = 5;

/// Highest unicast servo id.
pub const MAX_ID: u8 = 0xFC;
/// Broadcast id; addresses every servo on the bus.
pub const BROADCAST_ID: u8 = 0xFE;

/// Instruction codes (request fifth byte).
pub mod instruction {
    /// Presence check; empty response.
    pub const PING: u8 = 1;
    /// Read `length` bytes from `start-address`.
    pub const READ: u8 = 2;
    /// Write bytes at `start-address`.
    pub const WRITE: u8 = 3;
    /// Write bytes at `start-address`, deferred until ACTION.
    pub const REG_WRITE: u8 = 4;
    /// Commit pending REG_WRITE data.
    pub const ACTION: u8 = 5;
    /// Broadcast read of the same window from several ids.
    pub const SYNC_READ: u8 = 0x82;
    /// Broadcast write of per-id payloads at one address.
    pub const SYNC_WRITE: u8 = 0x83;
}

/// Error raised while building a request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The request would exceed [`MAX_FRAME_LEN`] bytes on the wire.
    TooLong(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLong(len) => write!(f, "frame of {} bytes exceeds {}", len, MAX_FRAME_LEN),
        }
    }
}

impl std::error::Error for FrameError {}

/// Complement-of-sum checksum over `id ..= last param`.
#[inline]
#[must_use]
pub fn checksum(body: &[u8]) -> u8 {
    !body.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Build a request frame.
///
/// `params` is the raw parameter block (addresses and data already in wire
/// order). Returns the complete frame including header and checksum.
pub fn build(id: u8, instr: u8, params: &[u8]) -> Result<Vec<u8>, FrameError> {
    let total = params.len() + MIN_FRAME_LEN;
    if total > MAX_FRAME_LEN {
        return Err(FrameError::TooLong(total));
    }

    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&HEADER);
    frame.push(id);
    frame.push((params.len() + 2) as u8);
    frame.push(instr);
    frame.extend_from_slice(params);
    frame.push(checksum(&frame[POS_ID..]));
    Ok(frame)
}

/// Verdict of one [`scan`] pass over the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Not enough bytes yet; the buffer must grow to this total length.
    NeedMore(usize),
    /// Discard this many leading bytes and scan again.
    Skip(usize),
    /// The first `len` buffered bytes are a checksum-valid frame.
    Frame(usize),
    /// A complete frame of `len` bytes is present but its checksum fails.
    BadChecksum(usize),
}

/// Scan the receive buffer for the next frame.
///
/// Stateless; the caller owns the buffer and applies `Skip` by draining the
/// front. Header-slot sanity: `id <= 0xFD`, `length <= 250`, error byte
/// `<= 0x7F`. Anything else means the `0xFF 0xFF` pair was noise.
#[must_use]
pub fn scan(buf: &[u8]) -> Scan {
    if buf.len() < MIN_FRAME_LEN {
        return Scan::NeedMore(MIN_FRAME_LEN);
    }

    let Some(start) = find_header(buf) else {
        // No marker. A trailing 0xFF may be the first half of one.
        return if buf[buf.len() - 1] == 0xFF {
            Scan::Skip(buf.len() - 1)
        } else {
            Scan::Skip(buf.len())
        };
    };
    if start != 0 {
        return Scan::Skip(start);
    }

    let id = buf[POS_ID];
    let length = usize::from(buf[POS_LENGTH]);
    let error = buf[POS_INSTRUCTION];
    if id > 0xFD || length > MAX_FRAME_LEN || error > 0x7F {
        // Spurious 0xFF 0xFF inside noise; resume the search one byte in.
        return Scan::Skip(1);
    }

    let total = length + 4;
    if buf.len() < total {
        return Scan::NeedMore(total);
    }

    if buf[total - 1] == checksum(&buf[POS_ID..total - 1]) {
        Scan::Frame(total)
    } else {
        Scan::BadChecksum(total)
    }
}

/// Locate the first `0xFF 0xFF` pair.
#[must_use]
fn find_header(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ping() {
        // checksum = ~(0x01 + 0x02 + 0x01) = 0xFB
        let frame = build(1, instruction::PING, &[]).expect("build");
        assert_eq!(frame, [0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn test_build_write_goal_position() {
        // Write 0x03E8 (LE) at address 42 to id 1:
        // checksum = ~(0x01 + 0x05 + 0x03 + 0x2A + 0xE8 + 0x03) = 0xE1
        let frame = build(1, instruction::WRITE, &[0x2A, 0xE8, 0x03]).expect("build");
        assert_eq!(frame, [0xFF, 0xFF, 0x01, 0x05, 0x03, 0x2A, 0xE8, 0x03, 0xE1]);
    }

    #[test]
    fn test_build_rejects_oversize() {
        let params = vec![0u8; MAX_FRAME_LEN - MIN_FRAME_LEN + 1];
        assert_eq!(
            build(1, instruction::WRITE, &params),
            Err(FrameError::TooLong(MAX_FRAME_LEN + 1))
        );
    }

    #[test]
    fn test_build_largest_frame() {
        let params = vec![0u8; MAX_FRAME_LEN - MIN_FRAME_LEN];
        let frame = build(1, instruction::WRITE, &params).expect("build");
        assert_eq!(frame.len(), MAX_FRAME_LEN);
        assert_eq!(frame[POS_LENGTH], (MAX_FRAME_LEN - 4) as u8);
    }

    #[test]
    fn test_checksum_domain() {
        // Covers id through last param; headers and checksum byte excluded.
        let frame = build(1, instruction::READ, &[0x38, 0x02]).expect("build");
        let body = &frame[POS_ID..frame.len() - 1];
        assert_eq!(*frame.last().expect("checksum"), checksum(body));
        // Wrapping: sums above 255 must not panic.
        assert_eq!(checksum(&[0xFF, 0xFF, 0xFF]), !0xFDu8);
    }

    #[test]
    fn test_scan_roundtrip() {
        for (id, instr, params) in [
            (0u8, instruction::PING, vec![]),
            (1, instruction::READ, vec![0x38, 0x02]),
            (0xFC, instruction::WRITE, vec![0x2A, 0xE8, 0x03]),
        ] {
            let frame = build(id, instr, &params).expect("build");
            assert_eq!(scan(&frame), Scan::Frame(frame.len()));
        }
    }

    #[test]
    fn test_scan_needs_minimum() {
        assert_eq!(scan(&[]), Scan::NeedMore(MIN_FRAME_LEN));
        assert_eq!(scan(&[0xFF, 0xFF, 0x01]), Scan::NeedMore(MIN_FRAME_LEN));
    }

    #[test]
    fn test_scan_grows_wait_to_frame_length() {
        let frame = build(1, instruction::READ, &[0x38, 0x02]).expect("build");
        // First six bytes present: scan must ask for the full frame.
        assert_eq!(scan(&frame[..MIN_FRAME_LEN]), Scan::NeedMore(frame.len()));
    }

    #[test]
    fn test_scan_skips_leading_noise() {
        // 00 FF 00 ahead of a valid ping frame.
        let mut stream = vec![0x00, 0xFF, 0x00];
        stream.extend_from_slice(&[0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
        assert_eq!(scan(&stream), Scan::Skip(3));
        assert_eq!(scan(&stream[3..]), Scan::Frame(6));
    }

    #[test]
    fn test_scan_no_header_drops_buffer() {
        assert_eq!(scan(&[1, 2, 3, 4, 5, 6]), Scan::Skip(6));
        // A trailing 0xFF could be half a header; keep it.
        assert_eq!(scan(&[1, 2, 3, 4, 5, 0xFF]), Scan::Skip(5));
    }

    #[test]
    fn test_scan_rejects_impossible_header_fields() {
        // id 0xFE can never send a response.
        assert_eq!(scan(&[0xFF, 0xFF, 0xFE, 0x02, 0x00, 0xFF]), Scan::Skip(1));
        // error byte above 0x7F.
        assert_eq!(scan(&[0xFF, 0xFF, 0x01, 0x02, 0x80, 0x7C]), Scan::Skip(1));
        // length field above the frame cap.
        assert_eq!(scan(&[0xFF, 0xFF, 0x01, 0xFB, 0x00, 0x03]), Scan::Skip(1));
    }

    #[test]
    fn test_scan_bad_checksum() {
        // Model-number read response with its last byte flipped.
        let stream = [0xFF, 0xFF, 0x01, 0x04, 0x00, 0x00, 0x09, 0xF0];
        assert_eq!(scan(&stream), Scan::BadChecksum(8));
    }

    #[test]
    fn test_scan_single_bit_flip_in_payload() {
        let mut frame = build(1, instruction::WRITE, &[0x2A, 0xE8, 0x03]).expect("build");
        frame[POS_PARAM + 1] ^= 0x10;
        assert_eq!(scan(&frame), Scan::BadChecksum(frame.len()));
    }
}
