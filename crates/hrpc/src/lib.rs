// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HRPC - High-performance RPC framework core
//!
//! The client-side invocation pipeline, binary wire protocol codec, and
//! credit-flow-controlled streaming transport of an RPC framework.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Cluster Layer                                |
//! |   ClusterHandler -> ClusterInvoker -> Interceptor chain             |
//! +---------------------------------------------------------------------+
//! |                        Protocol Layer                               |
//! |   StandardCodec (16-byte frame, headers, compression, signature)    |
//! |   StreamDispatcher (INIT/DATA/FEEDBACK/CLOSE, window flow control)  |
//! +---------------------------------------------------------------------+
//! |                        Transport Seam                               |
//! |   Connection / Connector traits, ClientEndpoint demux               |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hrpc::cluster::{ClientContext, ClusterHandler, ClusterInvoker,
//!     InvokeMode, MethodDescriptor, ServiceDescriptor};
//! use hrpc::config::{BackendConfig, ConsumerConfig};
//! use hrpc::plugin::{ExtensionRegistry, ThreadPoolExecutor};
//! use hrpc::runtime::RpcRuntime;
//!
//! # fn connector() -> Arc<dyn hrpc::transport::Connector> { unimplemented!() }
//! let pool = ThreadPoolExecutor::new(4, 1024);
//! let runtime = RpcRuntime::new(pool);
//! let registry = Arc::new(ExtensionRegistry::new());
//! // registry.register_selector("default", ...);
//!
//! let backend = BackendConfig {
//!     naming_id: "hrpc.mall.pay.Greeter".to_string(),
//!     callee: "greeter".to_string(),
//!     ..BackendConfig::default()
//! };
//! let invoker = ClusterInvoker::new(
//!     backend.clone(),
//!     ConsumerConfig::default(),
//!     registry,
//!     Arc::clone(&runtime),
//!     connector(),
//! );
//! let descriptor = ServiceDescriptor::new("greeter")
//!     .with_method(MethodDescriptor::new("sayHello", InvokeMode::Sync));
//! let handler = ClusterHandler::new(
//!     descriptor,
//!     backend,
//!     ConsumerConfig::default(),
//!     invoker,
//!     runtime,
//! );
//! let response = handler.invoke_sync(
//!     ClientContext { timeout_ms: Some(2000), ..ClientContext::default() },
//!     "sayHello",
//!     b"hello".to_vec(),
//! );
//! ```
//!
//! ## Modules Overview
//!
//! - [`cluster`] - invocation handler, cluster invoker, interceptor chain
//! - [`codec`] - frame, header, compression and signature codecs
//! - [`stream`] - streaming state machine and window flow control
//! - [`transport`] - connection seam and the in-process loopback pair
//! - [`runtime`] - request ids, pending-call registry, worker pool handle
//! - [`plugin`] - selector, worker pool and extension registry seams
//! - [`config`] - backend/consumer/protocol configuration objects
//! - [`error`] - framework error codes

/// Client-side cluster invocation pipeline.
pub mod cluster;
/// Wire protocol codecs (frame, headers, compression, signature).
pub mod codec;
/// Configuration objects (backend, consumer, protocol).
pub mod config;
/// Error codes and the unified error type.
pub mod error;
/// External collaborator seams (selector, worker pool, registry).
pub mod plugin;
/// Explicitly constructed runtime context.
pub mod runtime;
/// Streaming state machine and credit-based flow control.
pub mod stream;
/// Transport seam (connection trait, client endpoint, loopback pair).
pub mod transport;

pub use error::{ErrorCode, RpcError, RpcResult};
