// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport seam.
//!
//! The core never touches sockets: a [`Connection`] sends complete packets
//! and notifies close; a [`Connector`] produces connections for resolved
//! instances. The [`loopback`] module provides an in-process connection
//! pair used by the tests to wire a client endpoint to a peer without any
//! networking.

pub mod endpoint;
pub mod loopback;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::RpcResult;
use crate::plugin::ServiceInstance;

/// Hook invoked when a connection observes its own close.
pub type CloseHook = Box<dyn Fn() + Send + Sync>;

/// Receive callback taking one complete inbound packet.
pub type ReceiveFn = Box<dyn Fn(&[u8]) + Send + Sync>;

/// A live, packet-oriented connection.
///
/// `send` takes one complete wire packet; the implementation owns framing
/// accumulation on the inbound path and hands complete packets to the
/// receive callback registered by its owner. The receive path is a single
/// callback per connection, so frame dispatch is serialized per
/// connection.
pub trait Connection: Send + Sync {
    /// Send one complete packet.
    fn send(&self, packet: &[u8]) -> RpcResult<()>;

    /// Whether the connection can still carry traffic.
    fn is_available(&self) -> bool;

    /// Close the connection, firing registered close hooks once.
    fn close(&self);

    /// Register a hook fired when the connection closes.
    fn register_close_hook(&self, hook: CloseHook);

    /// Install the receive callback for complete inbound packets,
    /// replacing any previous one.
    fn set_receive(&self, receive: ReceiveFn);

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Creates connections for resolved service instances.
pub trait Connector: Send + Sync {
    fn connect(&self, instance: &ServiceInstance) -> RpcResult<Arc<dyn Connection>>;
}

pub use endpoint::ClientEndpoint;
pub use loopback::LoopbackConnection;
