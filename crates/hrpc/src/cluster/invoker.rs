// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cluster invoker: selector resolution, endpoint invoker cache, and the
//! selector feedback loop.
//!
//! One cluster invoker fronts one backend. Per call it resolves a target
//! instance through the external selector, obtains or lazily creates a
//! cached per-endpoint invoker (atomic get-or-create on the concurrent
//! map — concurrent first access yields exactly one connection), stamps
//! instance-derived routing metadata onto the request, and reports the
//! observed outcome (status code + cost) back to the selector so its
//! circuit breaker can degrade unhealthy instances.
//!
//! An idle janitor sweeps the cache periodically; sweep and explicit close
//! race safely because map removal is idempotent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::codec::StandardCodec;
use crate::config::{BackendConfig, ConsumerConfig, TransportType};
use crate::error::{ErrorCode, RpcError, RpcResult};
use crate::plugin::{ExtensionRegistry, Selector, ServiceInstance};
use crate::runtime::RpcRuntime;
use crate::stream::{StreamOptions, StreamReader, StreamWriter};
use crate::transport::{ClientEndpoint, Connector};

use super::interceptor::{build_chain, Completion, Invoker};
use super::Request;

/// Endpoint cache key: one live entry per endpoint per backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    host: String,
    port: u16,
    transport: TransportType,
}

impl From<&ServiceInstance> for EndpointKey {
    fn from(instance: &ServiceInstance) -> Self {
        Self {
            host: instance.host.clone(),
            port: instance.port,
            transport: instance.transport,
        }
    }
}

/// A cached, chain-wrapped, connection-backed invoker.
struct CachedEndpoint {
    chain: Arc<dyn Invoker>,
    endpoint: Arc<ClientEndpoint>,
    /// Milliseconds since the cluster invoker started, for idle eviction.
    last_used_ms: AtomicU64,
}

impl CachedEndpoint {
    fn touch(&self, uptime_ms: u64) {
        self.last_used_ms.store(uptime_ms, Ordering::Relaxed);
    }
}

struct Janitor {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Client-cluster invoker for one backend.
pub struct ClusterInvoker {
    backend: BackendConfig,
    consumer: ConsumerConfig,
    registry: Arc<ExtensionRegistry>,
    runtime: Arc<RpcRuntime>,
    connector: Arc<dyn Connector>,
    cache: Arc<DashMap<EndpointKey, Arc<CachedEndpoint>>>,
    started: Instant,
    janitor: Mutex<Option<Janitor>>,
}

impl ClusterInvoker {
    pub fn new(
        backend: BackendConfig,
        consumer: ConsumerConfig,
        registry: Arc<ExtensionRegistry>,
        runtime: Arc<RpcRuntime>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let cache: Arc<DashMap<EndpointKey, Arc<CachedEndpoint>>> = Arc::new(DashMap::new());
        let started = Instant::now();
        let janitor = Self::spawn_janitor(
            Arc::clone(&cache),
            started,
            backend.invoker_idle_timeout,
            backend.invoker_sweep_interval,
        );
        Arc::new(Self {
            backend,
            consumer,
            registry,
            runtime,
            connector,
            cache,
            started,
            janitor: Mutex::new(Some(janitor)),
        })
    }

    fn spawn_janitor(
        cache: Arc<DashMap<EndpointKey, Arc<CachedEndpoint>>>,
        started: Instant,
        idle_timeout: Duration,
        sweep_interval: Duration,
    ) -> Janitor {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("hrpc-invoker-janitor".to_string())
            .spawn(move || {
                while stop_rx.recv_timeout(sweep_interval).is_err() {
                    let now_ms = started.elapsed().as_millis() as u64;
                    let idle_ms = idle_timeout.as_millis() as u64;
                    let stale: Vec<EndpointKey> = cache
                        .iter()
                        .filter(|entry| {
                            now_ms.saturating_sub(entry.last_used_ms.load(Ordering::Relaxed))
                                > idle_ms
                        })
                        .map(|entry| entry.key().clone())
                        .collect();
                    for key in stale {
                        // Idempotent removal: an explicit close racing the
                        // sweep cannot double-close the connection.
                        if let Some((_, cached)) = cache.remove(&key) {
                            info!("evicting idle endpoint {}:{}", key.host, key.port);
                            cached.endpoint.connection().close();
                        }
                    }
                }
            })
            .expect("spawn janitor thread");
        Janitor { stop_tx, handle }
    }

    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn create_endpoint(&self, instance: &ServiceInstance) -> RpcResult<Arc<CachedEndpoint>> {
        let conn = self.connector.connect(instance)?;
        let signer = match &self.backend.protocol.signer {
            Some(name) => Some(self.registry.signer(name)?),
            None => None,
        };
        let codec = StandardCodec::new(self.backend.protocol.clone(), signer);
        let endpoint = ClientEndpoint::new(
            conn,
            codec,
            Arc::clone(&self.runtime),
            StreamOptions {
                window: self.consumer.stream_window,
                content_type: self.backend.protocol.serialization.as_u8(),
                content_encoding: self.backend.protocol.compression.as_u8(),
                ..StreamOptions::default()
            },
        );
        let chain = build_chain(
            &self.backend.interceptors,
            &self.registry,
            Arc::clone(&endpoint) as Arc<dyn Invoker>,
        )?;
        Ok(Arc::new(CachedEndpoint {
            chain,
            endpoint,
            last_used_ms: AtomicU64::new(self.uptime_ms()),
        }))
    }

    /// Get or atomically create the cached invoker for an endpoint. A hit
    /// must report itself available; an unavailable entry is evicted and
    /// replaced.
    fn endpoint_for(&self, instance: &ServiceInstance) -> RpcResult<Arc<CachedEndpoint>> {
        let key = EndpointKey::from(instance);
        if let Some(entry) = self.cache.get(&key) {
            if entry.endpoint.is_available() {
                entry.touch(self.uptime_ms());
                return Ok(Arc::clone(entry.value()));
            }
        }
        self.cache
            .remove_if(&key, |_, cached| !cached.endpoint.is_available());

        let entry = self
            .cache
            .entry(key)
            .or_try_insert_with(|| self.create_endpoint(instance))?;
        Ok(Arc::clone(entry.value()))
    }

    fn resolve(&self, request: &Request) -> RpcResult<(Arc<dyn Selector>, ServiceInstance)> {
        let selector = self.registry.selector(&self.backend.selector)?;
        let instance = selector.resolve(&self.backend.naming_id, request)?;
        Ok((selector, instance))
    }

    fn stamp_instance(&self, request: &mut Request, instance: &ServiceInstance) {
        request.meta.container = instance.container.clone();
        request.meta.set_name = instance.set_name.clone();
        request.meta.remote_addr = format!("{}:{}", instance.host, instance.port).parse().ok();
    }

    /// Open a streaming call against a resolved instance's connection.
    pub fn open_stream(&self, request: &mut Request) -> RpcResult<(StreamWriter, StreamReader)> {
        let (_, instance) = self.resolve(request)?;
        let cached = self.endpoint_for(&instance)?;
        self.stamp_instance(request, &instance);
        cached.touch(self.uptime_ms());
        let timeout = Duration::from_millis(request.meta.timeout.remaining_ms().max(0) as u64);
        cached.endpoint.dispatcher().open_stream(
            request.invocation().func(),
            &request.meta.caller.composite(),
            &request.meta.callee.composite(),
            timeout,
        )
    }

    /// Close the janitor and every cached connection.
    pub fn shutdown(&self) {
        if let Some(janitor) = self.janitor.lock().take() {
            let _ = janitor.stop_tx.send(());
            let _ = janitor.handle.join();
        }
        let keys: Vec<EndpointKey> = self.cache.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, cached)) = self.cache.remove(&key) {
                cached.endpoint.connection().close();
            }
        }
    }

    /// Number of live cached endpoints.
    pub fn cached_endpoints(&self) -> usize {
        self.cache.len()
    }
}

impl Invoker for ClusterInvoker {
    fn invoke(&self, mut request: Request, done: Completion) {
        // Mock mode routes to a registered implementation, outermost.
        if let Some(mock_name) = &self.backend.mock {
            match self.registry.mock(mock_name) {
                Ok(mock) => mock.invoke(request, done),
                Err(e) => done.fail(e),
            }
            return;
        }

        let (selector, instance) = match self.resolve(&request) {
            Ok(resolved) => resolved,
            Err(e) => {
                // Resolution failures are configuration-class: no retry
                // here and nothing to report against.
                warn!("resolve failed for {}: {}", request.invocation().func(), e);
                done.fail(e);
                return;
            }
        };
        let cached = match self.endpoint_for(&instance) {
            Ok(cached) => cached,
            Err(e) => {
                done.fail(e);
                return;
            }
        };
        self.stamp_instance(&mut request, &instance);
        cached.touch(self.uptime_ms());

        let id = request.id();
        let started = Instant::now();
        let wrapped = Completion::new(
            id,
            Box::new(move |response| {
                let code = response.error().map(|e| e.code().as_i32()).unwrap_or(0);
                selector.report(&instance, code, started.elapsed());
                debug!("request {} completed with code {}", id, code);
                done.complete(response);
            }),
        );
        cached.chain.invoke(request, wrapped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Invocation, InvokeMode, LazyBody, MethodInfo};
    use crate::codec::{DecodeOutcome, Decoded, DecodeSide};
    use crate::config::ProtocolConfig;
    use crate::plugin::ThreadPoolExecutor;
    use crate::transport::{Connection, LoopbackConnection};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    /// Selector resolving every request to one fixed instance.
    struct FixedSelector {
        instance: ServiceInstance,
        reports: Mutex<Vec<(i32, Duration)>>,
    }

    impl FixedSelector {
        fn new(instance: ServiceInstance) -> Self {
            Self {
                instance,
                reports: Mutex::new(Vec::new()),
            }
        }
    }

    impl Selector for FixedSelector {
        fn resolve(&self, _naming_id: &str, _request: &Request) -> RpcResult<ServiceInstance> {
            Ok(self.instance.clone())
        }

        fn resolve_all(
            &self,
            _naming_id: &str,
            _request: &Request,
        ) -> RpcResult<Vec<ServiceInstance>> {
            Ok(vec![self.instance.clone()])
        }

        fn report(&self, _instance: &ServiceInstance, code: i32, cost: Duration) {
            self.reports.lock().push((code, cost));
        }
    }

    /// Connector wiring each new connection to an in-process echo peer.
    struct EchoConnector {
        connects: AtomicUsize,
    }

    impl Connector for EchoConnector {
        fn connect(&self, _instance: &ServiceInstance) -> RpcResult<Arc<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (client_conn, server_conn) = LoopbackConnection::pair();
            let server_out = server_conn.clone();
            let codec = StandardCodec::new(ProtocolConfig::default(), None);
            server_conn.set_receive(Box::new(move |p| {
                if let Ok(DecodeOutcome::Complete(Decoded::Request(req))) =
                    codec.decode(DecodeSide::Server, p)
                {
                    let response = crate::cluster::Response::ok(
                        req.id(),
                        LazyBody {
                            content_type: 0,
                            content_encoding: crate::codec::CompressType::None,
                            raw: req.invocation().body().to_vec(),
                        },
                    );
                    let _ = server_out.send(&codec.encode_response(&response).unwrap());
                }
            }));
            // Keep the server half alive for the connection's lifetime.
            let server_keepalive = server_conn.clone();
            client_conn.register_close_hook(Box::new(move || {
                let _ = &server_keepalive;
            }));
            Ok(client_conn)
        }
    }

    fn request(runtime: &RpcRuntime, body: &[u8]) -> Request {
        Request::new(
            runtime.next_request_id(),
            Invocation::new(
                "greeter",
                "sayHello",
                InvokeMode::Sync,
                body.to_vec(),
                MethodInfo::default(),
            ),
        )
    }

    fn cluster(
        backend: BackendConfig,
        selector: Arc<FixedSelector>,
    ) -> (Arc<ClusterInvoker>, Arc<RpcRuntime>, Arc<ThreadPoolExecutor>) {
        let pool = ThreadPoolExecutor::new(2, 64);
        let runtime = RpcRuntime::new(pool.clone());
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register_selector("default", selector);
        let invoker = ClusterInvoker::new(
            backend,
            ConsumerConfig::default(),
            registry,
            Arc::clone(&runtime),
            Arc::new(EchoConnector {
                connects: AtomicUsize::new(0),
            }),
        );
        (invoker, runtime, pool)
    }

    #[test]
    fn test_invoke_reports_success_to_selector() {
        let selector = Arc::new(FixedSelector::new(ServiceInstance::new("10.0.0.1", 8000)));
        let (invoker, runtime, pool) = cluster(BackendConfig::default(), Arc::clone(&selector));

        let (tx, rx) = mpsc::channel();
        let req = request(&runtime, b"ping");
        let id = req.id();
        invoker.invoke(
            req,
            Completion::new(id, Box::new(move |r| tx.send(r).unwrap())),
        );
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.value().unwrap().raw, b"ping");

        let reports = selector.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, 0);
        drop(reports);
        invoker.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_missing_selector_is_router_error() {
        let pool = ThreadPoolExecutor::new(1, 16);
        let runtime = RpcRuntime::new(pool.clone());
        let registry = Arc::new(ExtensionRegistry::new());
        let invoker = ClusterInvoker::new(
            BackendConfig {
                selector: "absent".to_string(),
                ..BackendConfig::default()
            },
            ConsumerConfig::default(),
            registry,
            Arc::clone(&runtime),
            Arc::new(EchoConnector {
                connects: AtomicUsize::new(0),
            }),
        );
        let (tx, rx) = mpsc::channel();
        let req = request(&runtime, b"x");
        let id = req.id();
        invoker.invoke(
            req,
            Completion::new(id, Box::new(move |r| tx.send(r).unwrap())),
        );
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.error().unwrap().code(), ErrorCode::Router);
        invoker.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_endpoint_created_once_under_concurrency() {
        let selector = Arc::new(FixedSelector::new(ServiceInstance::new("10.0.0.2", 8000)));
        let (invoker, runtime, pool) = cluster(BackendConfig::default(), Arc::clone(&selector));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let invoker = Arc::clone(&invoker);
            let runtime = Arc::clone(&runtime);
            joins.push(std::thread::spawn(move || {
                let (tx, rx) = mpsc::channel();
                let req = request(&runtime, b"concurrent");
                let id = req.id();
                invoker.invoke(
                    req,
                    Completion::new(id, Box::new(move |r| tx.send(r).unwrap())),
                );
                rx.recv_timeout(Duration::from_secs(2)).unwrap()
            }));
        }
        for join in joins {
            let response = join.join().unwrap();
            assert!(response.error().is_none());
        }
        // Exactly one endpoint (and one underlying connection) created.
        assert_eq!(invoker.cached_endpoints(), 1);
        invoker.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_unavailable_entry_evicted_and_replaced() {
        let selector = Arc::new(FixedSelector::new(ServiceInstance::new("10.0.0.3", 8000)));
        let (invoker, runtime, pool) = cluster(BackendConfig::default(), Arc::clone(&selector));

        let instance = ServiceInstance::new("10.0.0.3", 8000);
        let first = invoker.endpoint_for(&instance).unwrap();
        first.endpoint.connection().close();
        let second = invoker.endpoint_for(&instance).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.endpoint.is_available());
        assert_eq!(invoker.cached_endpoints(), 1);

        let _ = runtime;
        invoker.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_mock_bypasses_network() {
        struct MockGreeter;
        impl Invoker for MockGreeter {
            fn invoke(&self, request: Request, done: Completion) {
                done.complete(crate::cluster::Response::ok(
                    request.id(),
                    LazyBody {
                        content_type: 0,
                        content_encoding: crate::codec::CompressType::None,
                        raw: b"mocked".to_vec(),
                    },
                ));
            }
        }

        let pool = ThreadPoolExecutor::new(1, 16);
        let runtime = RpcRuntime::new(pool.clone());
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register_mock("greeter-mock", Arc::new(MockGreeter));
        let invoker = ClusterInvoker::new(
            BackendConfig {
                mock: Some("greeter-mock".to_string()),
                ..BackendConfig::default()
            },
            ConsumerConfig::default(),
            registry,
            Arc::clone(&runtime),
            Arc::new(EchoConnector {
                connects: AtomicUsize::new(0),
            }),
        );
        let (tx, rx) = mpsc::channel();
        let req = request(&runtime, b"ignored");
        let id = req.id();
        invoker.invoke(
            req,
            Completion::new(id, Box::new(move |r| tx.send(r).unwrap())),
        );
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.value().unwrap().raw, b"mocked");
        assert_eq!(invoker.cached_endpoints(), 0);
        invoker.shutdown();
        pool.shutdown();
    }
}
