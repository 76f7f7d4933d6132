// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Standard protocol codec: full request/response wire messages.
//!
//! Symmetric `encode`/`decode` over the 16-byte frame: the header segment
//! is a structured message ([`RequestHead`]/[`ResponseHead`]), the body is
//! the serialized (and possibly compressed, possibly signed) payload, and
//! the trailing attachment segment is opaque pass-through data.
//!
//! The server's hot decode path avoids re-splitting routing strings on
//! every message with two bounded LRU caches: one memoizing the
//! `/service/method` split, one memoizing caller/callee identity metadata.
//! Cache keys derive from the wire strings themselves, so growth is
//! bounded by the number of distinct caller/service/method combinations
//! observed, not by request volume.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::cluster::{Identity, Invocation, InvokeMode, LazyBody, MethodInfo, Request, Response};
use crate::config::ProtocolConfig;
use crate::error::{ErrorCode, RpcError, RpcResult};

use super::compress::{compress, decompress, CompressType};
use super::cursor::Writer;
use super::frame::{DecodeOutcome, FrameCodec, FrameType, StandardFrame, FRAME_HEADER_SIZE};
use super::headers::{RequestHead, ResponseHead, CALL_TYPE_ONEWAY, CALL_TYPE_UNARY, HEADER_VERSION};
use super::sign::BodySigner;

/// Bounded capacity of the route and callee lookup caches.
const LOOKUP_CACHE_CAPACITY: usize = 1024;

/// Which end of the connection is decoding.
///
/// The inbound size limit is enforced for server decoding only; client
/// decoding trusts its own configured servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeSide {
    Client,
    Server,
}

/// A fully decoded inbound wire message.
#[derive(Debug)]
pub enum Decoded {
    Request(Request),
    Response(Response),
}

/// Caller/callee metadata derived from the wire strings, memoized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalleeMeta {
    pub caller: Identity,
    pub callee: Identity,
}

fn parse_identity(composite: &str, method: &str) -> Identity {
    // "hrpc.<app>.<server>.<service>" with an optional trailing method.
    let mut parts = composite.splitn(5, '.');
    let _prefix = parts.next();
    let app = parts.next().unwrap_or("").to_string();
    let server = parts.next().unwrap_or("").to_string();
    let service = parts.next().unwrap_or("").to_string();
    let embedded_method = parts.next().unwrap_or("").to_string();
    Identity {
        app,
        server,
        service,
        method: if embedded_method.is_empty() {
            method.to_string()
        } else {
            embedded_method
        },
    }
}

/// Standard protocol codec bound to one protocol configuration.
pub struct StandardCodec {
    protocol: ProtocolConfig,
    signer: Option<Arc<dyn BodySigner>>,
    frame_codec: Mutex<FrameCodec>,
    route_cache: RwLock<LruCache<String, (String, String)>>,
    callee_cache: RwLock<LruCache<(String, String), Arc<CalleeMeta>>>,
}

impl StandardCodec {
    pub fn new(protocol: ProtocolConfig, signer: Option<Arc<dyn BodySigner>>) -> Self {
        #[allow(clippy::expect_used)] // capacity is a non-zero constant
        let capacity = NonZeroUsize::new(LOOKUP_CACHE_CAPACITY).expect("capacity > 0");
        Self {
            protocol,
            signer,
            frame_codec: Mutex::new(FrameCodec::new()),
            route_cache: RwLock::new(LruCache::new(capacity)),
            callee_cache: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Split a routing key `/service/method`, served from the bounded
    /// cache when the same key was seen before.
    pub fn split_route(&self, func: &str) -> RpcResult<(String, String)> {
        if let Some(hit) = self.route_cache.write().get(func) {
            return Ok(hit.clone());
        }
        let trimmed = func.strip_prefix('/').ok_or_else(|| {
            RpcError::new(
                ErrorCode::ServerDecode,
                format!("routing key '{}' missing leading slash", func),
            )
        })?;
        let (service, method) = trimmed.split_once('/').ok_or_else(|| {
            RpcError::new(
                ErrorCode::ServerDecode,
                format!("routing key '{}' is not /service/method", func),
            )
        })?;
        if service.is_empty() || method.is_empty() {
            return Err(RpcError::new(
                ErrorCode::ServerDecode,
                format!("routing key '{}' has a blank segment", func),
            ));
        }
        let split = (service.to_string(), method.to_string());
        self.route_cache
            .write()
            .put(func.to_string(), split.clone());
        Ok(split)
    }

    /// Derive caller/callee identities from the composite wire strings,
    /// memoized by (caller, callee) — the method rides in the callee
    /// composite.
    fn callee_meta(&self, caller: &str, callee: &str, method: &str) -> Arc<CalleeMeta> {
        let key = (caller.to_string(), callee.to_string());
        if let Some(hit) = self.callee_cache.write().get(&key) {
            return Arc::clone(hit);
        }
        let meta = Arc::new(CalleeMeta {
            caller: parse_identity(caller, ""),
            callee: parse_identity(callee, method),
        });
        self.callee_cache.write().put(key, Arc::clone(&meta));
        meta
    }

    fn maybe_sign(&self, body: &[u8]) -> Vec<u8> {
        match &self.signer {
            Some(signer) => signer.sign(body),
            None => Vec::new(),
        }
    }

    fn verify_signature(&self, body: &[u8], signature: &[u8]) -> RpcResult<()> {
        if let Some(signer) = &self.signer {
            if !signer.verify(body, signature) {
                return Err(RpcError::new(
                    ErrorCode::SignatureVerify,
                    "body signature mismatch",
                ));
            }
        }
        Ok(())
    }

    fn assemble(frame: StandardFrame, head: &[u8], body: &[u8], attachment: &[u8]) -> Vec<u8> {
        let mut w = Writer::with_capacity(frame.size as usize);
        frame.encode_into(&mut w);
        w.write_bytes(head);
        w.write_bytes(body);
        w.write_bytes(attachment);
        w.into_vec()
    }

    /// Encode a request into one contiguous wire buffer.
    ///
    /// Records the final packet length back onto `request.meta`.
    pub fn encode_request(&self, request: &mut Request) -> RpcResult<Vec<u8>> {
        let (content_encoding, body) = compress(
            self.protocol.compression,
            request.invocation().body().to_vec(),
            self.protocol.compress_min_bytes,
        )?;
        let signature = self.maybe_sign(&body);

        let head = RequestHead {
            version: HEADER_VERSION,
            call_type: if request.meta.one_way {
                CALL_TYPE_ONEWAY
            } else {
                CALL_TYPE_UNARY
            },
            request_id: request.id(),
            timeout_ms: request.meta.timeout.remaining_ms().max(0) as u32,
            caller: request.meta.caller.composite(),
            callee: request.meta.callee.composite(),
            func: request.invocation().func().to_string(),
            content_type: self.protocol.serialization.as_u8(),
            content_encoding: content_encoding.as_u8(),
            dyeing_key: request.meta.dyeing_key.clone().unwrap_or_default(),
            attachment_size: request.attachment.len() as u32,
            signature,
            attachments: request.attachments.clone(),
        };
        let head_bytes = head.encode();

        let total = FRAME_HEADER_SIZE + head_bytes.len() + body.len() + request.attachment.len();
        let frame = StandardFrame::unary(total as u32, head_bytes.len() as u16);
        request.meta.message_size = total as u32;
        Ok(Self::assemble(frame, &head_bytes, &body, &request.attachment))
    }

    /// Encode a response into one contiguous wire buffer.
    pub fn encode_response(&self, response: &Response) -> RpcResult<Vec<u8>> {
        let raw = match response.value() {
            Some(body) => body.raw.clone(),
            None => Vec::new(),
        };
        let (content_encoding, body) =
            compress(self.protocol.compression, raw, self.protocol.compress_min_bytes)?;
        let signature = self.maybe_sign(&body);

        let (ret, func_ret, error_msg) = match response.error() {
            Some(err) if err.code() == ErrorCode::Business => {
                (0, err.func_ret().unwrap_or(0), err.message().to_string())
            }
            Some(err) => (err.code().as_i32(), 0, err.message().to_string()),
            None => (0, 0, String::new()),
        };

        let head = ResponseHead {
            version: HEADER_VERSION,
            call_type: CALL_TYPE_UNARY,
            request_id: response.request_id(),
            ret,
            func_ret,
            error_msg,
            content_type: self.protocol.serialization.as_u8(),
            content_encoding: content_encoding.as_u8(),
            attachment_size: response.attachment.len() as u32,
            signature,
            attachments: response.attachments.clone(),
        };
        let head_bytes = head.encode();

        let total = FRAME_HEADER_SIZE + head_bytes.len() + body.len() + response.attachment.len();
        let frame = StandardFrame::unary(total as u32, head_bytes.len() as u16);
        Ok(Self::assemble(frame, &head_bytes, &body, &response.attachment))
    }

    /// Decode one inbound wire message.
    ///
    /// Returns `NeedMore` when fewer bytes than the declared total are
    /// available. The side selects request (server) or response (client)
    /// header parsing and whether the inbound size limit applies.
    pub fn decode(&self, side: DecodeSide, buf: &[u8]) -> RpcResult<DecodeOutcome<Decoded>> {
        let frame = match StandardFrame::decode(buf) {
            Ok(DecodeOutcome::Complete(frame)) => frame,
            Ok(DecodeOutcome::NeedMore) => return Ok(DecodeOutcome::NeedMore),
            Err(e) => {
                self.frame_codec.lock().note_rejected();
                return Err(e);
            }
        };
        if frame.frame_type != FrameType::Unary {
            return Err(RpcError::new(
                ErrorCode::FrameDecode,
                "stream frame on the unary decode path",
            ));
        }
        if side == DecodeSide::Server && frame.size as usize > self.protocol.max_inbound_bytes {
            self.frame_codec.lock().note_rejected();
            return Err(RpcError::new(
                ErrorCode::ServerDecode,
                format!(
                    "inbound packet {} exceeds limit {}",
                    frame.size, self.protocol.max_inbound_bytes
                ),
            ));
        }
        let (frame, consumed) = match self.frame_codec.lock().extract(buf)? {
            DecodeOutcome::Complete(v) => v,
            DecodeOutcome::NeedMore => return Ok(DecodeOutcome::NeedMore),
        };
        debug_assert_eq!(frame.size as usize, consumed);

        let head_start = FRAME_HEADER_SIZE;
        let head_end = head_start + frame.header_size as usize;
        let head_bytes = &buf[head_start..head_end];
        let payload = &buf[head_end..consumed];

        match side {
            DecodeSide::Server => self.decode_request(&frame, head_bytes, payload),
            DecodeSide::Client => self.decode_response(&frame, head_bytes, payload),
        }
    }

    fn split_payload<'a>(
        payload: &'a [u8],
        attachment_size: u32,
        side_code: ErrorCode,
    ) -> RpcResult<(&'a [u8], &'a [u8])> {
        let attachment_size = attachment_size as usize;
        if attachment_size > payload.len() {
            return Err(RpcError::new(
                side_code,
                format!(
                    "declared attachment size {} exceeds payload {}",
                    attachment_size,
                    payload.len()
                ),
            ));
        }
        // body size = total - frame - header - attachment, by subtraction.
        Ok(payload.split_at(payload.len() - attachment_size))
    }

    fn decode_request(
        &self,
        frame: &StandardFrame,
        head_bytes: &[u8],
        payload: &[u8],
    ) -> RpcResult<DecodeOutcome<Decoded>> {
        let head = RequestHead::decode(head_bytes)
            .map_err(|e| RpcError::new(ErrorCode::ServerDecode, e.message().to_string()))?;
        let (body, attachment) =
            Self::split_payload(payload, head.attachment_size, ErrorCode::ServerDecode)?;
        self.verify_signature(body, &head.signature)?;

        let (service, method) = self.split_route(&head.func)?;
        let meta = self.callee_meta(&head.caller, &head.callee, &method);
        let encoding = CompressType::from_u8(head.content_encoding)?;
        let body = decompress(encoding, body)?;

        let mode = if head.call_type == CALL_TYPE_ONEWAY {
            InvokeMode::OneWay
        } else {
            InvokeMode::Sync
        };
        let invocation = Invocation::new(service, method, mode, body, MethodInfo::default());
        let mut request = Request::new(head.request_id, invocation);
        request.meta.one_way = head.call_type == CALL_TYPE_ONEWAY;
        request.meta.caller = meta.caller.clone();
        request.meta.callee = meta.callee.clone();
        request.meta.dyeing_key = if head.dyeing_key.is_empty() {
            None
        } else {
            Some(head.dyeing_key.clone())
        };
        request.meta.message_size = frame.size;
        request.attachments = head.attachments;
        request.attachment = attachment.to_vec();
        Ok(DecodeOutcome::Complete(Decoded::Request(request)))
    }

    fn decode_response(
        &self,
        _frame: &StandardFrame,
        head_bytes: &[u8],
        payload: &[u8],
    ) -> RpcResult<DecodeOutcome<Decoded>> {
        let head = ResponseHead::decode(head_bytes)
            .map_err(|e| RpcError::new(ErrorCode::ClientDecode, e.message().to_string()))?;
        let (body, attachment) =
            Self::split_payload(payload, head.attachment_size, ErrorCode::ClientDecode)?;
        self.verify_signature(body, &head.signature)?;

        let mut response = if head.ret != 0 {
            Response::err(
                head.request_id,
                RpcError::new(ErrorCode::from_i32(head.ret), head.error_msg.clone()),
            )
        } else if head.func_ret != 0 {
            Response::err(
                head.request_id,
                RpcError::business(head.func_ret, head.error_msg.clone()),
            )
        } else {
            // Body stays raw: decoding is deferred until the declared
            // return type is known.
            Response::ok(
                head.request_id,
                LazyBody {
                    content_type: head.content_type,
                    content_encoding: CompressType::from_u8(head.content_encoding)?,
                    raw: body.to_vec(),
                },
            )
        };
        response.attachments = head.attachments;
        response.attachment = attachment.to_vec();
        Ok(DecodeOutcome::Complete(Decoded::Response(response)))
    }

    /// Frames decoded so far (complete packets).
    pub fn frames_decoded(&self) -> u64 {
        self.frame_codec.lock().frames_decoded()
    }

    /// Frames rejected as malformed or oversized.
    pub fn frames_rejected(&self) -> u64 {
        self.frame_codec.lock().frames_rejected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sign::Md5Signer;
    use crate::cluster::timeout::LeftTimeout;

    fn codec(protocol: ProtocolConfig) -> StandardCodec {
        StandardCodec::new(protocol, None)
    }

    fn sample_request(body: Vec<u8>) -> Request {
        let invocation = Invocation::new(
            "greeter",
            "sayHello",
            InvokeMode::Sync,
            body,
            MethodInfo::default(),
        );
        let mut request = Request::new(42, invocation);
        request.meta.timeout = LeftTimeout::new(2000, 2000);
        request.meta.caller = Identity {
            app: "mall".into(),
            server: "front".into(),
            service: "client".into(),
            method: String::new(),
        };
        request.meta.callee = Identity {
            app: "mall".into(),
            server: "pay".into(),
            service: "greeter".into(),
            method: "sayHello".into(),
        };
        request.attachment = b"opaque-blob".to_vec();
        request
            .attachments
            .insert("trace-id".into(), b"t-1".to_vec());
        request
    }

    #[test]
    fn test_request_roundtrip() {
        let codec = codec(ProtocolConfig::default());
        let mut request = sample_request(b"hello-body".to_vec());
        let wire = codec.encode_request(&mut request).unwrap();
        assert_eq!(request.meta.message_size as usize, wire.len());

        match codec.decode(DecodeSide::Server, &wire).unwrap() {
            DecodeOutcome::Complete(Decoded::Request(decoded)) => {
                assert_eq!(decoded.id(), 42);
                assert_eq!(decoded.invocation().func(), "/greeter/sayHello");
                assert_eq!(decoded.invocation().body(), b"hello-body");
                assert_eq!(decoded.attachment, b"opaque-blob");
                assert_eq!(decoded.attachments.get("trace-id").unwrap(), b"t-1");
                assert_eq!(decoded.meta.callee.method, "sayHello");
                assert_eq!(decoded.meta.caller.app, "mall");
                assert!(!decoded.meta.one_way);
            }
            other => panic!("unexpected decode outcome: {:?}", other),
        }
    }

    #[test]
    fn test_response_roundtrip_lazy_body() {
        let codec = codec(ProtocolConfig::default());
        let body = LazyBody {
            content_type: 0,
            content_encoding: CompressType::None,
            raw: b"result-bytes".to_vec(),
        };
        let mut response = Response::ok(42, body);
        response.attachment = b"resp-opaque".to_vec();
        let wire = codec.encode_response(&response).unwrap();

        match codec.decode(DecodeSide::Client, &wire).unwrap() {
            DecodeOutcome::Complete(Decoded::Response(decoded)) => {
                assert_eq!(decoded.request_id(), 42);
                let lazy = decoded.value().unwrap();
                assert_eq!(lazy.decode().unwrap(), b"result-bytes");
                assert_eq!(decoded.attachment, b"resp-opaque");
            }
            other => panic!("unexpected decode outcome: {:?}", other),
        }
    }

    #[test]
    fn test_business_error_rides_func_ret() {
        let codec = codec(ProtocolConfig::default());
        let response = Response::err(7, RpcError::business(1004, "insufficient balance"));
        let wire = codec.encode_response(&response).unwrap();
        match codec.decode(DecodeSide::Client, &wire).unwrap() {
            DecodeOutcome::Complete(Decoded::Response(decoded)) => {
                let err = decoded.error().unwrap();
                assert_eq!(err.code(), ErrorCode::Business);
                assert_eq!(err.func_ret(), Some(1004));
            }
            other => panic!("unexpected decode outcome: {:?}", other),
        }
    }

    #[test]
    fn test_compression_applied_above_threshold() {
        let protocol = ProtocolConfig {
            compression: CompressType::Gzip,
            compress_min_bytes: 64,
            ..ProtocolConfig::default()
        };
        let codec = codec(protocol);
        let mut request = sample_request(vec![b'z'; 8192]);
        let wire = codec.encode_request(&mut request).unwrap();
        assert!(wire.len() < 8192);
        match codec.decode(DecodeSide::Server, &wire).unwrap() {
            DecodeOutcome::Complete(Decoded::Request(decoded)) => {
                assert_eq!(decoded.invocation().body(), &vec![b'z'; 8192][..]);
            }
            other => panic!("unexpected decode outcome: {:?}", other),
        }
    }

    #[test]
    fn test_signature_verified_and_mismatch_terminal() {
        let signer: Arc<dyn BodySigner> = Arc::new(Md5Signer);
        let codec = StandardCodec::new(ProtocolConfig::default(), Some(Arc::clone(&signer)));
        let mut request = sample_request(b"signed-body".to_vec());
        let mut wire = codec.encode_request(&mut request).unwrap();
        assert!(matches!(
            codec.decode(DecodeSide::Server, &wire).unwrap(),
            DecodeOutcome::Complete(Decoded::Request(_))
        ));

        // Corrupt one body byte: the signature no longer verifies.
        let len = wire.len();
        wire[len - 12] ^= 0xFF;
        let err = codec.decode(DecodeSide::Server, &wire).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SignatureVerify);
    }

    #[test]
    fn test_size_limit_server_only() {
        let protocol = ProtocolConfig {
            max_inbound_bytes: 64,
            ..ProtocolConfig::default()
        };
        let codec = codec(protocol);
        let mut request = sample_request(vec![b'q'; 256]);
        let wire = codec.encode_request(&mut request).unwrap();

        let err = codec.decode(DecodeSide::Server, &wire).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ServerDecode);

        // The client path does not enforce the limit: it parses the frame
        // and fails (if at all) only on header semantics.
        assert!(codec.decode(DecodeSide::Client, &wire).is_ok());
    }

    #[test]
    fn test_partial_input_needs_more() {
        let codec = codec(ProtocolConfig::default());
        let mut request = sample_request(b"partial".to_vec());
        let wire = codec.encode_request(&mut request).unwrap();
        for cut in [0, 1, 15, 16, wire.len() / 2, wire.len() - 1] {
            match codec.decode(DecodeSide::Server, &wire[..cut]).unwrap() {
                DecodeOutcome::NeedMore => {}
                DecodeOutcome::Complete(_) => panic!("truncated at {} decoded", cut),
            }
        }
    }

    #[test]
    fn test_route_cache_serves_repeats() {
        let codec = codec(ProtocolConfig::default());
        let first = codec.split_route("/greeter/sayHello").unwrap();
        let second = codec.split_route("/greeter/sayHello").unwrap();
        assert_eq!(first, second);
        assert!(codec.split_route("no-slash").is_err());
        assert!(codec.split_route("/only-service").is_err());
        assert!(codec.split_route("//method").is_err());
    }
}
