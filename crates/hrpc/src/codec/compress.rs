// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Body compression pipeline.
//!
//! Compression is negotiated per message via the header's content-encoding
//! byte and applied only when the serialized body exceeds the configured
//! minimum size: small payloads cost more to deflate than they save.
//! Gzip is always available; LZ4 requires the `lz4` feature.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::error::{ErrorCode, RpcError, RpcResult};

/// Wire ids for body compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressType {
    #[default]
    None = 0,
    Gzip = 1,
    Lz4 = 2,
}

impl CompressType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> RpcResult<Self> {
        match v {
            0 => Ok(CompressType::None),
            1 => Ok(CompressType::Gzip),
            2 => Ok(CompressType::Lz4),
            other => Err(RpcError::new(
                ErrorCode::FrameDecode,
                format!("unknown content-encoding {}", other),
            )),
        }
    }
}

/// Compress `body` with `requested` when it is at least `min_bytes` long.
///
/// Returns the encoding actually applied and the resulting bytes; bodies
/// under the threshold pass through unchanged as `CompressType::None`.
pub fn compress(
    requested: CompressType,
    body: Vec<u8>,
    min_bytes: usize,
) -> RpcResult<(CompressType, Vec<u8>)> {
    if requested == CompressType::None || body.len() < min_bytes {
        return Ok((CompressType::None, body));
    }
    match requested {
        CompressType::None => unreachable!("handled above"),
        CompressType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), GzLevel::default());
            encoder.write_all(&body)?;
            Ok((CompressType::Gzip, encoder.finish()?))
        }
        CompressType::Lz4 => lz4_compress(&body).map(|out| (CompressType::Lz4, out)),
    }
}

/// Decompress `body` according to its declared encoding.
pub fn decompress(encoding: CompressType, body: &[u8]) -> RpcResult<Vec<u8>> {
    match encoding {
        CompressType::None => Ok(body.to_vec()),
        CompressType::Gzip => {
            let mut decoder = GzDecoder::new(body);
            let mut out = Vec::with_capacity(body.len() * 2);
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        CompressType::Lz4 => lz4_decompress(body),
    }
}

#[cfg(feature = "lz4")]
fn lz4_compress(body: &[u8]) -> RpcResult<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(body))
}

#[cfg(feature = "lz4")]
fn lz4_decompress(body: &[u8]) -> RpcResult<Vec<u8>> {
    lz4_flex::decompress_size_prepended(body)
        .map_err(|e| RpcError::new(ErrorCode::FrameDecode, format!("lz4 decompress: {}", e)))
}

#[cfg(not(feature = "lz4"))]
fn lz4_compress(_body: &[u8]) -> RpcResult<Vec<u8>> {
    Err(RpcError::new(
        ErrorCode::Unknown,
        "lz4 compression requires the `lz4` feature",
    ))
}

#[cfg(not(feature = "lz4"))]
fn lz4_decompress(_body: &[u8]) -> RpcResult<Vec<u8>> {
    Err(RpcError::new(
        ErrorCode::Unknown,
        "lz4 compression requires the `lz4` feature",
    ))
}
