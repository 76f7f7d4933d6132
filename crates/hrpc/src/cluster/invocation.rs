// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Invocation, request and response data carriers.
//!
//! An [`Invocation`] describes one logical call and is immutable after the
//! handler builds it. The [`Request`] wrapping it carries mutable routing
//! metadata that codecs and invokers fill in on the way down, and is paired
//! with exactly one [`Response`] unless the call is one-way.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::codec::{decompress, CompressType};
use crate::error::{RpcError, RpcResult};

use super::timeout::LeftTimeout;

/// How the caller wants the result delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeMode {
    /// Block the calling thread up to the remaining timeout.
    Sync,
    /// Return a completion handle immediately.
    Async,
    /// Fire and forget; send errors are logged, never surfaced.
    OneWay,
    /// Caller streams requests, callee replies once.
    ClientStream,
    /// Caller sends once, callee streams responses.
    ServerStream,
    /// Both sides stream.
    DuplexStream,
}

impl InvokeMode {
    /// Whether this mode goes through the streaming state machine.
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            InvokeMode::ClientStream | InvokeMode::ServerStream | InvokeMode::DuplexStream
        )
    }
}

/// Static method metadata from the service dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    /// Declared parameter type name.
    pub param_type: &'static str,
    /// Declared return type name; lazy bodies decode against this.
    pub return_type: &'static str,
    /// Whether the method was declared generic (untyped payload).
    pub generic: bool,
}

impl Default for MethodInfo {
    fn default() -> Self {
        Self {
            param_type: "bytes",
            return_type: "bytes",
            generic: true,
        }
    }
}

/// Immutable-after-build descriptor of one logical call.
#[derive(Debug, Clone)]
pub struct Invocation {
    service: String,
    method: String,
    func: String,
    mode: InvokeMode,
    body: Vec<u8>,
    method_info: MethodInfo,
}

impl Invocation {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        mode: InvokeMode,
        body: Vec<u8>,
        method_info: MethodInfo,
    ) -> Self {
        let service = service.into();
        let method = method.into();
        let func = format!("/{}/{}", service, method);
        Self {
            service,
            method,
            func,
            mode,
            body,
            method_info,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Routing key of the form `/service/method`.
    pub fn func(&self) -> &str {
        &self.func
    }

    pub fn mode(&self) -> InvokeMode {
        self.mode
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn method_info(&self) -> &MethodInfo {
        &self.method_info
    }
}

/// One side of the caller/callee identity quadruple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub app: String,
    pub server: String,
    pub service: String,
    pub method: String,
}

impl Identity {
    /// Composite wire string `hrpc.<app>.<server>.<service>[.<method>]`.
    pub fn composite(&self) -> String {
        if self.method.is_empty() {
            format!("hrpc.{}.{}.{}", self.app, self.server, self.service)
        } else {
            format!(
                "hrpc.{}.{}.{}.{}",
                self.app, self.server, self.service, self.method
            )
        }
    }
}

/// Mutable request metadata filled in along the invocation pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// End-to-end timeout budget for this hop.
    pub timeout: LeftTimeout,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub caller: Identity,
    pub callee: Identity,
    pub one_way: bool,
    /// Dyeing/trace key propagated in the header.
    pub dyeing_key: Option<String>,
    /// Hash value for consistent routing, offered to the selector.
    pub hash_val: Option<String>,
    /// Callee container name, stamped from the resolved instance.
    pub container: Option<String>,
    /// Callee set name, stamped from the resolved instance.
    pub set_name: Option<String>,
    /// Final encoded packet length, recorded by the encoder.
    pub message_size: u32,
}

/// A dispatched request: id + invocation + metadata + attachments.
#[derive(Debug, Clone)]
pub struct Request {
    id: u64,
    invocation: Invocation,
    pub meta: RequestMeta,
    /// Transparent key-value attachments carried in the header.
    pub attachments: HashMap<String, Vec<u8>>,
    /// Opaque pass-through attachment segment following the body.
    pub attachment: Vec<u8>,
}

impl Request {
    pub fn new(id: u64, invocation: Invocation) -> Self {
        Self {
            id,
            invocation,
            meta: RequestMeta::default(),
            attachments: HashMap::new(),
            attachment: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }
}

/// A not-yet-decoded response body.
///
/// Carries the negotiated content type and encoding plus the raw bytes;
/// decoding is deferred until the caller's declared return type is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyBody {
    pub content_type: u8,
    pub content_encoding: CompressType,
    pub raw: Vec<u8>,
}

impl LazyBody {
    /// Decompress the raw bytes into the serialized body.
    pub fn decode(&self) -> RpcResult<Vec<u8>> {
        decompress(self.content_encoding, &self.raw)
    }
}

/// The decoded counterpart of a request.
#[derive(Debug, Clone, Default)]
pub struct Response {
    request_id: u64,
    value: Option<LazyBody>,
    error: Option<RpcError>,
    /// Transparent key-value attachments mirrored from the request.
    pub attachments: HashMap<String, Vec<u8>>,
    /// Opaque pass-through attachment segment following the body.
    pub attachment: Vec<u8>,
}

impl Response {
    pub fn ok(request_id: u64, value: LazyBody) -> Self {
        Self {
            request_id,
            value: Some(value),
            error: None,
            attachments: HashMap::new(),
            attachment: Vec::new(),
        }
    }

    pub fn err(request_id: u64, error: RpcError) -> Self {
        Self {
            request_id,
            value: None,
            error: Some(error),
            attachments: HashMap::new(),
            attachment: Vec::new(),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn value(&self) -> Option<&LazyBody> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// Convert into a result, surfacing the error slot.
    pub fn into_result(self) -> RpcResult<LazyBody> {
        match (self.value, self.error) {
            (_, Some(err)) => Err(err),
            (Some(value), None) => Ok(value),
            (None, None) => Ok(LazyBody {
                content_type: 0,
                content_encoding: CompressType::None,
                raw: Vec::new(),
            }),
        }
    }
}
