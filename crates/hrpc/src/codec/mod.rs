// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol codecs.
//!
//! Layering, bottom up:
//!
//! - [`cursor`] — bounds-checked big-endian read cursor and append writer
//! - [`frame`] — the fixed 16-byte frame header every message starts with
//! - [`headers`] — structured request/response header messages
//! - [`compress`] / [`sign`] — body compression and signature pipeline
//! - [`standard`] — full unary request/response message codec
//!
//! The streaming sub-protocol frames live in [`crate::stream`]; they ride
//! the same 16-byte frame with `FrameType::Stream`.

pub mod compress;
pub mod cursor;
pub mod frame;
pub mod headers;
pub mod sign;
pub mod standard;

pub use compress::{compress, decompress, CompressType};
pub use cursor::{Cursor, Writer};
pub use frame::{
    DecodeOutcome, FrameCodec, FrameType, StandardFrame, FRAME_HEADER_SIZE, FRAME_MAGIC,
};
pub use headers::{Attachments, RequestHead, ResponseHead};
pub use sign::{BodySigner, Md5Signer};
pub use standard::{Decoded, DecodeSide, StandardCodec};
