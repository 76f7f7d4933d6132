// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process connection pair.
//!
//! Two [`LoopbackConnection`] halves wired back to back: a packet sent on
//! one half is delivered inline to the receive callback registered on the
//! other. Delivery is inline and serialized by the sender, matching the
//! single-receive-callback contract real transports provide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::{ErrorCode, RpcError, RpcResult};

use super::{CloseHook, Connection, ReceiveFn};

/// One half of an in-process connection pair.
pub struct LoopbackConnection {
    peer: Mutex<Weak<LoopbackConnection>>,
    receive: RwLock<Option<ReceiveFn>>,
    available: AtomicBool,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl LoopbackConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            peer: Mutex::new(Weak::new()),
            receive: RwLock::new(None),
            available: AtomicBool::new(true),
            close_hooks: Mutex::new(Vec::new()),
        })
    }

    /// Create a wired pair of connection halves.
    pub fn pair() -> (Arc<LoopbackConnection>, Arc<LoopbackConnection>) {
        let a = Self::new();
        let b = Self::new();
        *a.peer.lock() = Arc::downgrade(&b);
        *b.peer.lock() = Arc::downgrade(&a);
        (a, b)
    }

    fn deliver(&self, packet: &[u8]) {
        // Inline delivery re-enters this lock when the callback answers
        // on the same thread; recursive reads must not deadlock.
        if let Some(receive) = self.receive.read_recursive().as_ref() {
            receive(packet);
        }
    }

    fn fire_close_hooks(&self) {
        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

impl Connection for LoopbackConnection {
    fn send(&self, packet: &[u8]) -> RpcResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(RpcError::new(
                ErrorCode::ConnectionClosed,
                "loopback connection closed",
            ));
        }
        // Take the peer reference, then deliver without holding the lock:
        // a callback may send on this connection again from this thread.
        let peer = self.peer.lock().upgrade();
        match peer {
            Some(peer) => {
                peer.deliver(packet);
                Ok(())
            }
            None => Err(RpcError::new(
                ErrorCode::ConnectionClosed,
                "loopback peer dropped",
            )),
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.available.swap(false, Ordering::SeqCst) {
            self.fire_close_hooks();
            let peer = self.peer.lock().upgrade();
            if let Some(peer) = peer {
                if peer.available.swap(false, Ordering::SeqCst) {
                    peer.fire_close_hooks();
                }
            }
        }
    }

    fn register_close_hook(&self, hook: CloseHook) {
        if self.available.load(Ordering::SeqCst) {
            self.close_hooks.lock().push(hook);
        } else {
            hook();
        }
    }

    fn set_receive(&self, receive: ReceiveFn) {
        *self.receive.write() = Some(receive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pair_delivers_both_ways() {
        let (a, b) = LoopbackConnection::pair();
        let got_a = Arc::new(Mutex::new(Vec::new()));
        let got_b = Arc::new(Mutex::new(Vec::new()));
        {
            let got_a = Arc::clone(&got_a);
            a.set_receive(Box::new(move |p| got_a.lock().push(p.to_vec())));
        }
        {
            let got_b = Arc::clone(&got_b);
            b.set_receive(Box::new(move |p| got_b.lock().push(p.to_vec())));
        }
        a.send(b"ping").unwrap();
        b.send(b"pong").unwrap();
        assert_eq!(got_b.lock().as_slice(), &[b"ping".to_vec()]);
        assert_eq!(got_a.lock().as_slice(), &[b"pong".to_vec()]);
    }

    #[test]
    fn test_close_fans_out_to_both_halves_once() {
        let (a, b) = LoopbackConnection::pair();
        let fired = Arc::new(AtomicUsize::new(0));
        for conn in [&a, &b] {
            let fired = Arc::clone(&fired);
            conn.register_close_hook(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        a.close();
        a.close(); // idempotent
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(!a.is_available());
        assert!(!b.is_available());
        assert_eq!(
            a.send(b"late").unwrap_err().code(),
            ErrorCode::ConnectionClosed
        );
    }

    #[test]
    fn test_hook_after_close_fires_immediately() {
        let (a, _b) = LoopbackConnection::pair();
        a.close();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        a.register_close_hook(Box::new(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
