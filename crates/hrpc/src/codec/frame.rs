// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed 16-byte frame header for the standard wire protocol.
//!
//! Every wire message starts with this header (big-endian):
//!
//! ```text
//! +--------+--------+--------+--------+----------------+
//! | magic  | type   | state  | total packet size       |
//! | (2B)   | (1B)   | (1B)   | (4B)                    |
//! +--------+--------+--------+--------+----------------+
//! | header size     | stream id                        |
//! | (2B)            | (4B)                             |
//! +-----------------+----------------+-----------------+
//! | reserved (2B)   |
//! +-----------------+
//! ```
//!
//! Invariant: `total size == 16 + header size + body size + attachment
//! size`. The magic constant must match or decoding fails; a buffer shorter
//! than the declared total yields [`DecodeOutcome::NeedMore`], never an
//! error, so a streaming transport can wait for more bytes.

use crate::error::{ErrorCode, RpcError, RpcResult};

use super::cursor::{Cursor, Writer};

/// Protocol magic constant.
pub const FRAME_MAGIC: u16 = 0x0930;

/// Fixed frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Unary request/response frame.
    Unary = 0,
    /// Streaming sub-protocol frame (INIT/DATA/FEEDBACK/CLOSE).
    Stream = 1,
}

impl FrameType {
    fn from_u8(v: u8) -> RpcResult<Self> {
        match v {
            0 => Ok(FrameType::Unary),
            1 => Ok(FrameType::Stream),
            other => Err(RpcError::new(
                ErrorCode::FrameDecode,
                format!("unknown frame type {}", other),
            )),
        }
    }
}

/// Outcome of a decode attempt against a possibly partial buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome<T> {
    /// A complete value was decoded.
    Complete(T),
    /// More bytes are required; nothing was consumed.
    NeedMore,
}

/// Decoded 16-byte standard frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardFrame {
    /// Unary or stream.
    pub frame_type: FrameType,
    /// End-state byte. Unary frames leave it 0; stream frames carry the
    /// stream frame type tag here.
    pub state: u8,
    /// Total packet size including this header.
    pub size: u32,
    /// Header-segment size following this header.
    pub header_size: u16,
    /// Stream id (0 for unary frames).
    pub stream_id: u32,
}

impl StandardFrame {
    /// Build a unary frame header.
    pub fn unary(size: u32, header_size: u16) -> Self {
        Self {
            frame_type: FrameType::Unary,
            state: 0,
            size,
            header_size,
            stream_id: 0,
        }
    }

    /// Build a stream frame header; `state` carries the stream frame tag.
    pub fn stream(state: u8, size: u32, header_size: u16, stream_id: u32) -> Self {
        Self {
            frame_type: FrameType::Stream,
            state,
            size,
            header_size,
            stream_id,
        }
    }

    /// Append the 16 header bytes to `w`.
    pub fn encode_into(&self, w: &mut Writer) {
        w.write_u16(FRAME_MAGIC);
        w.write_u8(self.frame_type as u8);
        w.write_u8(self.state);
        w.write_u32(self.size);
        w.write_u16(self.header_size);
        w.write_u32(self.stream_id);
        w.write_u16(0); // reserved
    }

    /// Decode a frame header from the start of `buf`.
    ///
    /// Returns `NeedMore` when fewer than 16 bytes are available. A wrong
    /// magic constant is a frame decode error.
    pub fn decode(buf: &[u8]) -> RpcResult<DecodeOutcome<StandardFrame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(DecodeOutcome::NeedMore);
        }
        let mut c = Cursor::new(&buf[..FRAME_HEADER_SIZE]);
        let magic = c.read_u16()?;
        if magic != FRAME_MAGIC {
            return Err(RpcError::new(
                ErrorCode::FrameDecode,
                format!("bad magic 0x{:04x}, expected 0x{:04x}", magic, FRAME_MAGIC),
            ));
        }
        let frame_type = FrameType::from_u8(c.read_u8()?)?;
        let state = c.read_u8()?;
        let size = c.read_u32()?;
        let header_size = c.read_u16()?;
        let stream_id = c.read_u32()?;
        let _reserved = c.read_u16()?;

        if (size as usize) < FRAME_HEADER_SIZE + header_size as usize {
            return Err(RpcError::new(
                ErrorCode::FrameDecode,
                format!(
                    "declared size {} smaller than frame + header segment {}",
                    size,
                    FRAME_HEADER_SIZE + header_size as usize
                ),
            ));
        }
        Ok(DecodeOutcome::Complete(StandardFrame {
            frame_type,
            state,
            size,
            header_size,
            stream_id,
        }))
    }

    /// Payload size following the header segment (body + attachment).
    pub fn payload_size(&self) -> usize {
        self.size as usize - FRAME_HEADER_SIZE - self.header_size as usize
    }
}

/// Incremental packet extractor with decode statistics.
///
/// Wraps [`StandardFrame::decode`] with whole-packet completeness checks so
/// a transport can feed it partial reads and only hand complete packets
/// downstream.
#[derive(Debug, Default)]
pub struct FrameCodec {
    frames_decoded: u64,
    bytes_decoded: u64,
    frames_rejected: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to extract one complete packet from the front of `buf`.
    ///
    /// Returns the decoded frame header and the number of bytes the packet
    /// occupies, or `NeedMore` when the buffer is shorter than the declared
    /// total at any truncation point.
    pub fn extract(&mut self, buf: &[u8]) -> RpcResult<DecodeOutcome<(StandardFrame, usize)>> {
        let frame = match StandardFrame::decode(buf) {
            Ok(DecodeOutcome::Complete(f)) => f,
            Ok(DecodeOutcome::NeedMore) => return Ok(DecodeOutcome::NeedMore),
            Err(e) => {
                self.frames_rejected += 1;
                return Err(e);
            }
        };
        if buf.len() < frame.size as usize {
            return Ok(DecodeOutcome::NeedMore);
        }
        self.frames_decoded += 1;
        self.bytes_decoded += u64::from(frame.size);
        Ok(DecodeOutcome::Complete((frame, frame.size as usize)))
    }

    /// Count a rejection detected outside `extract` (e.g. an oversized
    /// declared size noticed on the header peek).
    pub fn note_rejected(&mut self) {
        self.frames_rejected += 1;
    }

    /// Number of complete frames decoded.
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Total bytes of complete frames decoded.
    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Number of frames rejected as malformed.
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }
}
