// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structured request/response header messages.
//!
//! The header segment following the 16-byte frame is a field-ordered binary
//! message built with the wire cursor: fixed scalars first, then
//! length-prefixed strings, the signature blob, and finally the transparent
//! attachment map. Both sides must agree on field order; unknown trailing
//! bytes are ignored for forward compatibility.

use std::collections::HashMap;

use crate::error::RpcResult;

use super::cursor::{Cursor, Writer};

/// Header protocol version.
pub const HEADER_VERSION: u8 = 1;

/// Call type: request expects a paired response.
pub const CALL_TYPE_UNARY: u8 = 0;
/// Call type: fire-and-forget, no response observed by the caller.
pub const CALL_TYPE_ONEWAY: u8 = 1;

/// Transparent string→bytes attachment map.
pub type Attachments = HashMap<String, Vec<u8>>;

fn encode_attachments(w: &mut Writer, attachments: &Attachments) {
    w.write_u16(attachments.len() as u16);
    for (key, value) in attachments {
        w.write_string(key);
        w.write_blob(value);
    }
}

fn decode_attachments(c: &mut Cursor<'_>) -> RpcResult<Attachments> {
    let count = c.read_u16()? as usize;
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = c.read_string()?;
        let value = c.read_blob()?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Request header message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestHead {
    pub version: u8,
    /// `CALL_TYPE_UNARY` or `CALL_TYPE_ONEWAY`.
    pub call_type: u8,
    pub request_id: u64,
    /// Per-call timeout in milliseconds, 0 when unset.
    pub timeout_ms: u32,
    /// Composite caller identity `hrpc.<app>.<server>.<service>`.
    pub caller: String,
    /// Composite callee identity `hrpc.<app>.<server>.<service>.<method>`.
    pub callee: String,
    /// Routing key `/service/method`.
    pub func: String,
    /// Negotiated body serialization id.
    pub content_type: u8,
    /// Negotiated body compression id.
    pub content_encoding: u8,
    /// Dyeing/trace key; empty when the request is not dyed.
    pub dyeing_key: String,
    /// Size of the opaque attachment segment following the body.
    pub attachment_size: u32,
    /// Body signature; empty when signing is not configured.
    pub signature: Vec<u8>,
    /// Transparent key-value attachments.
    pub attachments: Attachments,
}

impl RequestHead {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64);
        w.write_u8(self.version);
        w.write_u8(self.call_type);
        w.write_u64(self.request_id);
        w.write_u32(self.timeout_ms);
        w.write_string(&self.caller);
        w.write_string(&self.callee);
        w.write_string(&self.func);
        w.write_u8(self.content_type);
        w.write_u8(self.content_encoding);
        w.write_string(&self.dyeing_key);
        w.write_u32(self.attachment_size);
        w.write_blob(&self.signature);
        encode_attachments(&mut w, &self.attachments);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> RpcResult<Self> {
        let mut c = Cursor::new(buf);
        Ok(Self {
            version: c.read_u8()?,
            call_type: c.read_u8()?,
            request_id: c.read_u64()?,
            timeout_ms: c.read_u32()?,
            caller: c.read_string()?,
            callee: c.read_string()?,
            func: c.read_string()?,
            content_type: c.read_u8()?,
            content_encoding: c.read_u8()?,
            dyeing_key: c.read_string()?,
            attachment_size: c.read_u32()?,
            signature: c.read_blob()?,
            attachments: decode_attachments(&mut c)?,
        })
    }
}

/// Response header message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseHead {
    pub version: u8,
    pub call_type: u8,
    pub request_id: u64,
    /// Framework return code, 0 on success.
    pub ret: i32,
    /// Business function return code, 0 on success.
    pub func_ret: i32,
    /// Error message accompanying a non-zero `ret`/`func_ret`.
    pub error_msg: String,
    pub content_type: u8,
    pub content_encoding: u8,
    pub attachment_size: u32,
    pub signature: Vec<u8>,
    pub attachments: Attachments,
}

impl ResponseHead {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(48);
        w.write_u8(self.version);
        w.write_u8(self.call_type);
        w.write_u64(self.request_id);
        w.write_i32(self.ret);
        w.write_i32(self.func_ret);
        w.write_string(&self.error_msg);
        w.write_u8(self.content_type);
        w.write_u8(self.content_encoding);
        w.write_u32(self.attachment_size);
        w.write_blob(&self.signature);
        encode_attachments(&mut w, &self.attachments);
        w.into_vec()
    }

    pub fn decode(buf: &[u8]) -> RpcResult<Self> {
        let mut c = Cursor::new(buf);
        Ok(Self {
            version: c.read_u8()?,
            call_type: c.read_u8()?,
            request_id: c.read_u64()?,
            ret: c.read_i32()?,
            func_ret: c.read_i32()?,
            error_msg: c.read_string()?,
            content_type: c.read_u8()?,
            content_encoding: c.read_u8()?,
            attachment_size: c.read_u32()?,
            signature: c.read_blob()?,
            attachments: decode_attachments(&mut c)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_head_roundtrip() {
        let mut attachments = Attachments::new();
        attachments.insert("trace-id".to_string(), b"abc123".to_vec());
        let head = RequestHead {
            version: HEADER_VERSION,
            call_type: CALL_TYPE_UNARY,
            request_id: 9_000_000_001,
            timeout_ms: 2000,
            caller: "hrpc.app.server.client".to_string(),
            callee: "hrpc.app.server.greeter.sayHello".to_string(),
            func: "/greeter/sayHello".to_string(),
            content_type: 0,
            content_encoding: 1,
            dyeing_key: "canary".to_string(),
            attachment_size: 12,
            signature: vec![0xAA; 16],
            attachments,
        };
        let decoded = RequestHead::decode(&head.encode()).unwrap();
        assert_eq!(decoded, head);
    }

    #[test]
    fn test_response_head_roundtrip() {
        let head = ResponseHead {
            version: HEADER_VERSION,
            call_type: CALL_TYPE_UNARY,
            request_id: 7,
            ret: 0,
            func_ret: 1004,
            error_msg: "insufficient balance".to_string(),
            content_type: 0,
            content_encoding: 0,
            attachment_size: 0,
            signature: Vec::new(),
            attachments: Attachments::new(),
        };
        let decoded = ResponseHead::decode(&head.encode()).unwrap();
        assert_eq!(decoded, head);
    }

    #[test]
    fn test_truncated_head_fails() {
        let head = RequestHead {
            func: "/greeter/sayHello".to_string(),
            ..Default::default()
        };
        let buf = head.encode();
        assert!(RequestHead::decode(&buf[..buf.len() - 3]).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let head = ResponseHead::default();
        let mut buf = head.encode();
        buf.extend_from_slice(&[0xEE, 0xEE]);
        assert_eq!(ResponseHead::decode(&buf).unwrap(), head);
    }
}
