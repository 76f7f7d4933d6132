// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! External collaborator seams: selector, worker pool, extension registry.
//!
//! Service discovery, load balancing and plugin discovery live outside the
//! core. The core consumes them through the narrow interfaces here: a
//! [`Selector`] resolves a logical naming id to concrete instances and
//! absorbs per-call outcome reports; a [`WorkerPool`] runs submitted work
//! asynchronously; an [`ExtensionRegistry`] resolves named plugin
//! instances registered at process startup and fails when a name is
//! absent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cluster::interceptor::{Interceptor, Invoker};
use crate::cluster::Request;
use crate::codec::BodySigner;
use crate::config::TransportType;
use crate::error::{ErrorCode, RpcError, RpcResult};

/// A concrete network instance resolved by the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub host: String,
    pub port: u16,
    pub transport: TransportType,
    /// Callee container name, stamped into request metadata.
    pub container: Option<String>,
    /// Callee set name, stamped into request metadata.
    pub set_name: Option<String>,
}

impl ServiceInstance {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportType::Tcp,
            container: None,
            set_name: None,
        }
    }
}

/// Naming/load-balancing collaborator.
///
/// `report` feeds per-call outcomes (status code + cost) back into the
/// selector's adaptive statistics; this is the loop that lets its circuit
/// breaker degrade unhealthy instances over time.
pub trait Selector: Send + Sync {
    /// Resolve one instance for this request.
    fn resolve(&self, naming_id: &str, request: &Request) -> RpcResult<ServiceInstance>;

    /// Resolve every known instance.
    fn resolve_all(&self, naming_id: &str, request: &Request) -> RpcResult<Vec<ServiceInstance>>;

    /// Report an observed call outcome for adaptive load statistics.
    fn report(&self, instance: &ServiceInstance, code: i32, cost: Duration);
}

impl std::fmt::Debug for dyn Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Selector")
    }
}

/// Executes submitted work asynchronously.
pub trait WorkerPool: Send + Sync {
    /// Submit a task. Fails with [`ErrorCode::Overload`] when the queue is
    /// saturated.
    fn execute(&self, task: Box<dyn FnOnce() + Send>) -> RpcResult<()>;
}

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Stop,
}

/// Default worker pool: fixed threads draining a bounded queue.
pub struct ThreadPoolExecutor {
    tx: Sender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ThreadPoolExecutor {
    /// Spawn `threads` workers sharing a queue of `queue_size` slots.
    pub fn new(threads: usize, queue_size: usize) -> Arc<Self> {
        let (tx, rx) = bounded::<Job>(queue_size);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("hrpc-worker-{}", i))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        match job {
                            Job::Run(task) => task(),
                            Job::Stop => break,
                        }
                    }
                })
                .expect("spawn worker thread");
            workers.push(handle);
        }
        Arc::new(Self {
            tx,
            workers: Mutex::new(workers),
            stopped: AtomicBool::new(false),
        })
    }

    /// Stop accepting work and join the worker threads.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles = {
            let mut workers = self.workers.lock();
            for _ in 0..workers.len() {
                // A full queue still drains; blocking send is fine here.
                let _ = self.tx.send(Job::Stop);
            }
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl WorkerPool for ThreadPoolExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) -> RpcResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(RpcError::new(
                ErrorCode::ConnectionClosed,
                "worker pool stopped",
            ));
        }
        match self.tx.try_send(Job::Run(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RpcError::new(
                ErrorCode::Overload,
                "worker queue saturated",
            )),
            Err(TrySendError::Disconnected(_)) => Err(RpcError::new(
                ErrorCode::ConnectionClosed,
                "worker pool stopped",
            )),
        }
    }
}

/// Name → instance registry populated at process startup.
///
/// Resolution is by exact name; a missing name is an error at the lookup
/// site, never a silent default.
#[derive(Default)]
pub struct ExtensionRegistry {
    selectors: DashMap<String, Arc<dyn Selector>>,
    interceptors: DashMap<String, Arc<dyn Interceptor>>,
    mocks: DashMap<String, Arc<dyn Invoker>>,
    signers: DashMap<String, Arc<dyn BodySigner>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_selector(&self, name: impl Into<String>, selector: Arc<dyn Selector>) {
        self.selectors.insert(name.into(), selector);
    }

    pub fn register_interceptor(&self, name: impl Into<String>, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.insert(name.into(), interceptor);
    }

    pub fn register_mock(&self, name: impl Into<String>, mock: Arc<dyn Invoker>) {
        self.mocks.insert(name.into(), mock);
    }

    pub fn register_signer(&self, name: impl Into<String>, signer: Arc<dyn BodySigner>) {
        self.signers.insert(name.into(), signer);
    }

    /// Resolve a selector; absence is a router (configuration) error.
    pub fn selector(&self, name: &str) -> RpcResult<Arc<dyn Selector>> {
        self.selectors
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RpcError::new(
                    ErrorCode::Router,
                    format!("no selector registered under '{}'", name),
                )
            })
    }

    pub fn interceptor(&self, name: &str) -> RpcResult<Arc<dyn Interceptor>> {
        self.interceptors
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RpcError::new(
                    ErrorCode::Unknown,
                    format!("no interceptor registered under '{}'", name),
                )
            })
    }

    pub fn mock(&self, name: &str) -> RpcResult<Arc<dyn Invoker>> {
        self.mocks
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RpcError::new(
                    ErrorCode::Unknown,
                    format!("no mock registered under '{}'", name),
                )
            })
    }

    pub fn signer(&self, name: &str) -> RpcResult<Arc<dyn BodySigner>> {
        self.signers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RpcError::new(
                    ErrorCode::Unknown,
                    format!("no signer registered under '{}'", name),
                )
            })
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.selectors.contains_key(name)
            || self.interceptors.contains_key(name)
            || self.mocks.contains_key(name)
            || self.signers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_thread_pool_runs_tasks() {
        let pool = ThreadPoolExecutor::new(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }))
            .unwrap();
        }
        for _ in 0..8 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        pool.shutdown();
    }

    #[test]
    fn test_saturated_queue_is_overload() {
        // One worker blocked on a gate; a queue of one fills immediately.
        let pool = ThreadPoolExecutor::new(1, 1);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        pool.execute(Box::new(move || {
            let _ = gate_rx.lock().recv();
        }))
        .unwrap();

        // Keep submitting no-ops: once the single slot is occupied while
        // the worker is gated, the next submission must report overload.
        let mut saw_overload = false;
        for _ in 0..64 {
            match pool.execute(Box::new(|| {})) {
                Err(e) if e.code() == ErrorCode::Overload => {
                    saw_overload = true;
                    break;
                }
                other => other.unwrap(),
            }
        }
        assert!(saw_overload);
        let _ = gate_tx.send(());
        pool.shutdown();
    }

    #[test]
    fn test_registry_missing_selector_is_router_error() {
        let registry = ExtensionRegistry::new();
        let err = registry.selector("polaris").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Router);
        assert!(!registry.has_extension("polaris"));
    }
}
