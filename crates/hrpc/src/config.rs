// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration objects for the client stack.
//!
//! These are plain structs handed to the framework fully built; loading
//! them from files or a config center is an external concern.

use std::time::Duration;

/// Serialization wire ids. The framework treats bodies as opaque bytes;
/// the id is negotiated so both peers decode with the same plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SerializationType {
    #[default]
    Protobuf = 0,
    Json = 1,
    Raw = 2,
}

impl SerializationType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Transport flavor, part of the endpoint cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportType {
    #[default]
    Tcp,
    Udp,
}

/// Wire protocol tunables.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Body serialization id advertised in the header.
    pub serialization: SerializationType,
    /// Compression requested for outbound bodies.
    pub compression: crate::codec::CompressType,
    /// Bodies below this size are never compressed.
    pub compress_min_bytes: usize,
    /// Maximum inbound packet size enforced on the server decode path.
    /// Client decoding does not enforce it.
    pub max_inbound_bytes: usize,
    /// Name of the registered body signer; `None` disables signing.
    pub signer: Option<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            serialization: SerializationType::default(),
            compression: crate::codec::CompressType::None,
            compress_min_bytes: 1024,
            max_inbound_bytes: 16 * 1024 * 1024,
            signer: None,
        }
    }
}

/// Per-backend (callee cluster) configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Logical naming id handed to the selector for instance resolution.
    pub naming_id: String,
    /// Selector plugin name.
    pub selector: String,
    /// Callee service name used when neither the context nor the
    /// descriptor supplies one.
    pub callee: String,
    /// Callee application name, first segment of the callee identity.
    pub callee_app: String,
    /// Callee server name, second segment of the callee identity.
    pub callee_server: String,
    /// Default per-call timeout when the caller specifies none.
    pub default_timeout_ms: u64,
    /// Whether this call participates in full-link timeout propagation.
    pub full_link_timeout: bool,
    /// Issue a backup request after this delay when a sync call has not
    /// completed; `None` disables backup requests.
    pub backup_request_ms: Option<u64>,
    /// Ordered interceptor plugin names, outermost first.
    pub interceptors: Vec<String>,
    /// Route calls to the named mock implementation instead of the network.
    pub mock: Option<String>,
    /// Evict cached endpoint invokers idle longer than this.
    pub invoker_idle_timeout: Duration,
    /// Idle sweep period for the endpoint invoker cache.
    pub invoker_sweep_interval: Duration,
    /// Protocol settings for connections to this backend.
    pub protocol: ProtocolConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            naming_id: String::new(),
            selector: "default".to_string(),
            callee: String::new(),
            callee_app: String::new(),
            callee_server: String::new(),
            default_timeout_ms: 1000,
            full_link_timeout: true,
            backup_request_ms: None,
            interceptors: Vec::new(),
            mock: None,
            invoker_idle_timeout: Duration::from_secs(180),
            invoker_sweep_interval: Duration::from_secs(30),
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Caller-side identity configuration.
#[derive(Debug, Clone, Default)]
pub struct ConsumerConfig {
    /// Application name, first segment of the caller identity.
    pub app: String,
    /// Server name, second segment of the caller identity.
    pub server: String,
    /// Caller service name, third segment of the caller identity.
    pub service: String,
    /// Initial flow-control window for streams opened by this consumer;
    /// 0 disables flow control.
    pub stream_window: u32,
}
