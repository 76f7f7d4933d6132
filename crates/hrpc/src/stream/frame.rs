// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streaming sub-protocol frames.
//!
//! INIT/DATA/FEEDBACK/CLOSE frames ride the standard 16-byte frame with
//! `FrameType::Stream`; the frame's state byte carries the stream frame
//! tag and the stream id lives in the frame header. Control payloads
//! (INIT/FEEDBACK/CLOSE) travel in the header segment; DATA payloads are
//! the body segment so the flow-control window accounts for exactly the
//! data bytes, header excluded.

use crate::codec::cursor::{Cursor, Writer};
use crate::codec::frame::{DecodeOutcome, FrameType, StandardFrame, FRAME_HEADER_SIZE};
use crate::error::{ErrorCode, RpcError, RpcResult};

/// Stream frame tags carried in the frame state byte.
pub const STREAM_FRAME_INIT: u8 = 1;
pub const STREAM_FRAME_DATA: u8 = 2;
pub const STREAM_FRAME_FEEDBACK: u8 = 3;
pub const STREAM_FRAME_CLOSE: u8 = 4;

/// CLOSE sub-type: orderly one-way close.
pub const CLOSE_TYPE_NORMAL: u8 = 0;
/// CLOSE sub-type: reset, full two-sided teardown.
pub const CLOSE_TYPE_RESET: u8 = 1;

/// Stream INIT payload: route + negotiated codec + initial window.
///
/// The opening side fills `func`/`caller`/`callee`; the answering side
/// echoes the negotiated fields and reports acceptance through `ret`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitFrame {
    pub func: String,
    pub caller: String,
    pub callee: String,
    pub content_type: u8,
    pub content_encoding: u8,
    /// Initial flow-control window; 0 disables flow control.
    pub window: u32,
    /// Non-zero when the peer refused the stream.
    pub ret: i32,
    pub error_msg: String,
}

impl InitFrame {
    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(48);
        w.write_string(&self.func);
        w.write_string(&self.caller);
        w.write_string(&self.callee);
        w.write_u8(self.content_type);
        w.write_u8(self.content_encoding);
        w.write_u32(self.window);
        w.write_i32(self.ret);
        w.write_string(&self.error_msg);
        w.into_vec()
    }

    fn decode(buf: &[u8]) -> RpcResult<Self> {
        let mut c = Cursor::new(buf);
        Ok(Self {
            func: c.read_string()?,
            caller: c.read_string()?,
            callee: c.read_string()?,
            content_type: c.read_u8()?,
            content_encoding: c.read_u8()?,
            window: c.read_u32()?,
            ret: c.read_i32()?,
            error_msg: c.read_string()?,
        })
    }
}

/// FEEDBACK payload: a window-increment integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackFrame {
    pub increment: u32,
}

/// CLOSE payload: return codes plus the normal/reset sub-type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseFrame {
    pub close_type: u8,
    pub ret: i32,
    pub func_ret: i32,
    pub message: String,
}

impl CloseFrame {
    pub fn normal_ok() -> Self {
        Self::default()
    }

    pub fn normal_error(ret: i32, message: impl Into<String>) -> Self {
        Self {
            close_type: CLOSE_TYPE_NORMAL,
            ret,
            func_ret: 0,
            message: message.into(),
        }
    }

    pub fn reset(ret: i32, message: impl Into<String>) -> Self {
        Self {
            close_type: CLOSE_TYPE_RESET,
            ret,
            func_ret: 0,
            message: message.into(),
        }
    }

    pub fn is_reset(&self) -> bool {
        self.close_type == CLOSE_TYPE_RESET
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(16);
        w.write_u8(self.close_type);
        w.write_i32(self.ret);
        w.write_i32(self.func_ret);
        w.write_string(&self.message);
        w.into_vec()
    }

    fn decode(buf: &[u8]) -> RpcResult<Self> {
        let mut c = Cursor::new(buf);
        Ok(Self {
            close_type: c.read_u8()?,
            ret: c.read_i32()?,
            func_ret: c.read_i32()?,
            message: c.read_string()?,
        })
    }
}

/// One decoded streaming frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Init(InitFrame),
    Data(Vec<u8>),
    Feedback(FeedbackFrame),
    Close(CloseFrame),
}

impl StreamFrame {
    fn tag(&self) -> u8 {
        match self {
            StreamFrame::Init(_) => STREAM_FRAME_INIT,
            StreamFrame::Data(_) => STREAM_FRAME_DATA,
            StreamFrame::Feedback(_) => STREAM_FRAME_FEEDBACK,
            StreamFrame::Close(_) => STREAM_FRAME_CLOSE,
        }
    }
}

/// Encode one streaming frame into a complete wire packet.
pub fn encode_stream_frame(stream_id: u32, frame: &StreamFrame) -> Vec<u8> {
    let (head, body): (Vec<u8>, &[u8]) = match frame {
        StreamFrame::Init(init) => (init.encode(), &[]),
        StreamFrame::Data(data) => (Vec::new(), data),
        StreamFrame::Feedback(feedback) => {
            let mut w = Writer::with_capacity(4);
            w.write_u32(feedback.increment);
            (w.into_vec(), &[])
        }
        StreamFrame::Close(close) => (close.encode(), &[]),
    };
    let total = FRAME_HEADER_SIZE + head.len() + body.len();
    let standard = StandardFrame::stream(frame.tag(), total as u32, head.len() as u16, stream_id);
    let mut w = Writer::with_capacity(total);
    standard.encode_into(&mut w);
    w.write_bytes(&head);
    w.write_bytes(body);
    w.into_vec()
}

/// Decode one streaming frame from a complete wire packet.
pub fn decode_stream_frame(buf: &[u8]) -> RpcResult<DecodeOutcome<(u32, StreamFrame)>> {
    let frame = match StandardFrame::decode(buf)? {
        DecodeOutcome::Complete(frame) => frame,
        DecodeOutcome::NeedMore => return Ok(DecodeOutcome::NeedMore),
    };
    if frame.frame_type != FrameType::Stream {
        return Err(RpcError::new(
            ErrorCode::FrameDecode,
            "not a stream frame",
        ));
    }
    if buf.len() < frame.size as usize {
        return Ok(DecodeOutcome::NeedMore);
    }
    let head_end = FRAME_HEADER_SIZE + frame.header_size as usize;
    let head = &buf[FRAME_HEADER_SIZE..head_end];
    let body = &buf[head_end..frame.size as usize];

    let decoded = match frame.state {
        STREAM_FRAME_INIT => StreamFrame::Init(InitFrame::decode(head)?),
        STREAM_FRAME_DATA => StreamFrame::Data(body.to_vec()),
        STREAM_FRAME_FEEDBACK => {
            let mut c = Cursor::new(head);
            StreamFrame::Feedback(FeedbackFrame {
                increment: c.read_u32()?,
            })
        }
        STREAM_FRAME_CLOSE => StreamFrame::Close(CloseFrame::decode(head)?),
        other => {
            return Err(RpcError::new(
                ErrorCode::FrameDecode,
                format!("unknown stream frame tag {}", other),
            ))
        }
    };
    Ok(DecodeOutcome::Complete((frame.stream_id, decoded)))
}
