// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Explicitly constructed runtime context.
//!
//! Owns the process-unique request id generator, the pending-call registry
//! and the worker pool handle, with a defined startup/shutdown lifecycle.
//! Components receive the runtime by `Arc`; nothing here is ambient global
//! state.
//!
//! Pending entries are inserted before the network send is issued and
//! removed exactly once by whichever of {response arrival, timeout,
//! connection close} observes them first — removal from the concurrent map
//! is the atomic claim.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use log::debug;

use crate::cluster::interceptor::Completion;
use crate::cluster::Response;
use crate::error::{ErrorCode, RpcError};
use crate::plugin::WorkerPool;

/// Shared runtime context for one client process.
pub struct RpcRuntime {
    worker_pool: Arc<dyn WorkerPool>,
    pending: DashMap<u64, Completion>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl RpcRuntime {
    /// Build a runtime around the given worker pool. The id sequence is
    /// process-unique and starts at a time-derived offset so restarts do
    /// not replay recent ids against a long-lived peer.
    pub fn new(worker_pool: Arc<dyn WorkerPool>) -> Arc<Self> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Arc::new(Self {
            worker_pool,
            pending: DashMap::new(),
            next_id: AtomicU64::new(seed | 1),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Allocate the next request id. Wraps on overflow.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn worker_pool(&self) -> &Arc<dyn WorkerPool> {
        &self.worker_pool
    }

    /// Register a pending completion before the send is issued.
    pub fn register_pending(&self, request_id: u64, done: Completion) {
        if self.shutdown.load(Ordering::SeqCst) {
            done.fail(RpcError::new(
                ErrorCode::ConnectionClosed,
                "runtime shut down",
            ));
            return;
        }
        self.pending.insert(request_id, done);
    }

    /// Complete a pending call. Returns false when someone else (timeout,
    /// connection close) already claimed it.
    pub fn complete_pending(&self, request_id: u64, response: Response) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, done)) => {
                done.complete(response);
                true
            }
            None => {
                debug!("late completion for request {} ignored", request_id);
                false
            }
        }
    }

    /// Fail a pending call. Returns false when already claimed.
    pub fn fail_pending(&self, request_id: u64, error: RpcError) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, done)) => {
                done.fail(error);
                true
            }
            None => false,
        }
    }

    /// Number of calls currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every pending call and refuse new registrations.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.fail_pending(id, RpcError::new(ErrorCode::ConnectionClosed, "shutdown"));
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::ThreadPoolExecutor;
    use std::sync::mpsc;

    fn runtime() -> Arc<RpcRuntime> {
        RpcRuntime::new(ThreadPoolExecutor::new(1, 16))
    }

    fn completion(id: u64) -> (Completion, mpsc::Receiver<Response>) {
        let (tx, rx) = mpsc::channel();
        (
            Completion::new(id, Box::new(move |resp| {
                let _ = tx.send(resp);
            })),
            rx,
        )
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let rt = runtime();
        let a = rt.next_request_id();
        let b = rt.next_request_id();
        assert!(b > a);
    }

    #[test]
    fn test_complete_claims_exactly_once() {
        let rt = runtime();
        let (done, rx) = completion(5);
        rt.register_pending(5, done);

        assert!(rt.complete_pending(5, Response::err(5, RpcError::business(0, "first"))));
        assert!(!rt.complete_pending(5, Response::err(5, RpcError::business(0, "second"))));
        assert!(!rt.fail_pending(5, RpcError::new(ErrorCode::ClientTimeout, "late")));

        let resp = rx.recv().unwrap();
        assert_eq!(resp.error().unwrap().message(), "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_fails_all_pending() {
        let rt = runtime();
        let (done_a, rx_a) = completion(1);
        let (done_b, rx_b) = completion(2);
        rt.register_pending(1, done_a);
        rt.register_pending(2, done_b);

        rt.shutdown();
        assert_eq!(rt.pending_count(), 0);
        for rx in [rx_a, rx_b] {
            let resp = rx.recv().unwrap();
            assert_eq!(resp.error().unwrap().code(), ErrorCode::ConnectionClosed);
        }

        // Registrations after shutdown fail immediately.
        let (done_c, rx_c) = completion(3);
        rt.register_pending(3, done_c);
        assert_eq!(
            rx_c.recv().unwrap().error().unwrap().code(),
            ErrorCode::ConnectionClosed
        );
    }
}
