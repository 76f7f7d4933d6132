// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cluster invocation handler: the top of the client stack.
//!
//! Every call enters through an explicit per-service dispatch table — a
//! [`ServiceDescriptor`] mapping method names to invocation metadata. The
//! handler validates the call context, builds the immutable [`Invocation`]
//! and its [`Request`], computes the full-link timeout budget, dispatches
//! through the cluster invoker, and adapts the asynchronous result to the
//! caller's convention: sync blocks up to the remaining budget, async
//! returns a future, one-way returns immediately, streaming returns the
//! reader/writer pair.
//!
//! When a backup-request delay is configured, a synchronous call that has
//! not completed within the delay issues one secondary request; the first
//! completion wins and the race is resolved exactly once by the pending
//! registry.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::config::{BackendConfig, ConsumerConfig};
use crate::error::{ErrorCode, RpcError, RpcResult};
use crate::runtime::RpcRuntime;
use crate::stream::{StreamReader, StreamWriter};

use super::interceptor::{Completion, Invoker};
use super::invocation::{Identity, Invocation, InvokeMode, MethodInfo, Request, Response};
use super::invoker::ClusterInvoker;
use super::timeout::{compute_budget, LeftTimeout, LinkContext};

/// Static metadata for one declared service method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: &'static str,
    /// Wire alias overriding `name` unless the context overrides both.
    pub alias: Option<&'static str>,
    pub mode: InvokeMode,
    pub info: MethodInfo,
}

impl MethodDescriptor {
    pub fn new(name: &'static str, mode: InvokeMode) -> Self {
        Self {
            name,
            alias: None,
            mode,
            info: MethodInfo::default(),
        }
    }

    pub fn with_alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }

    pub fn with_info(mut self, info: MethodInfo) -> Self {
        self.info = info;
        self
    }
}

/// Dispatch table for one service interface.
#[derive(Debug, Clone, Default)]
pub struct ServiceDescriptor {
    service: String,
    methods: HashMap<&'static str, MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            methods: HashMap::new(),
        }
    }

    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.insert(method.name, method);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }
}

/// Per-call client context. The caller must supply one; its contents
/// override descriptor and backend defaults.
#[derive(Default)]
pub struct ClientContext {
    /// Explicit callee service name, highest priority.
    pub callee_service: Option<String>,
    /// Explicit method name/alias, highest priority.
    pub method_alias: Option<String>,
    /// Explicit per-call timeout.
    pub timeout_ms: Option<u64>,
    /// Inherited full-link timeout context, if this call is a downstream
    /// hop.
    pub link: Option<LinkContext>,
    pub dyeing_key: Option<String>,
    /// Consistent-routing hash value offered to the selector.
    pub hash_val: Option<String>,
    pub attachments: HashMap<String, Vec<u8>>,
    /// Opaque pass-through attachment segment.
    pub attachment: Vec<u8>,
}

/// The cluster invocation handler for one service proxy.
pub struct ClusterHandler {
    descriptor: ServiceDescriptor,
    backend: BackendConfig,
    consumer: ConsumerConfig,
    invoker: Arc<ClusterInvoker>,
    runtime: Arc<RpcRuntime>,
}

impl ClusterHandler {
    pub fn new(
        descriptor: ServiceDescriptor,
        backend: BackendConfig,
        consumer: ConsumerConfig,
        invoker: Arc<ClusterInvoker>,
        runtime: Arc<RpcRuntime>,
    ) -> Self {
        Self {
            descriptor,
            backend,
            consumer,
            invoker,
            runtime,
        }
    }

    /// Resolve names, compute the budget, and build the transport request.
    ///
    /// Name priority: explicit context value, then descriptor metadata,
    /// then the configured backend callee; both service and method must
    /// end up non-blank.
    fn build_request(
        &self,
        ctx: &ClientContext,
        method: &str,
        body: Vec<u8>,
    ) -> RpcResult<Request> {
        let descriptor = self.descriptor.method(method).ok_or_else(|| {
            RpcError::new(
                ErrorCode::UnknownInvoke,
                format!("unknown invoke '{}' on service '{}'", method, self.descriptor.service),
            )
        })?;

        let service = ctx
            .callee_service
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.descriptor.service.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| self.backend.callee.clone());
        if service.is_empty() {
            return Err(RpcError::new(
                ErrorCode::InvalidArgument,
                "callee service name is blank",
            ));
        }
        let method_name = ctx
            .method_alias
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| descriptor.alias.map(str::to_string))
            .unwrap_or_else(|| descriptor.name.to_string());
        if method_name.is_empty() {
            return Err(RpcError::new(
                ErrorCode::InvalidArgument,
                "method name is blank",
            ));
        }

        let budget = self.compute_budget(ctx)?;

        let invocation = Invocation::new(
            service.clone(),
            method_name.clone(),
            descriptor.mode,
            body,
            descriptor.info,
        );
        let mut request = Request::new(self.runtime.next_request_id(), invocation);
        request.meta.timeout = budget;
        request.meta.one_way = descriptor.mode == InvokeMode::OneWay;
        request.meta.caller = Identity {
            app: self.consumer.app.clone(),
            server: self.consumer.server.clone(),
            service: self.consumer.service.clone(),
            method: String::new(),
        };
        request.meta.callee = Identity {
            app: self.backend.callee_app.clone(),
            server: self.backend.callee_server.clone(),
            service,
            method: method_name,
        };
        request.meta.dyeing_key = ctx.dyeing_key.clone();
        request.meta.hash_val = ctx.hash_val.clone();
        request.attachments = ctx.attachments.clone();
        request.attachment = ctx.attachment.clone();
        Ok(request)
    }

    /// Budget computation plus the full-link fail-fast check: the check
    /// applies only when propagation is enabled on both the current call
    /// and the inherited link.
    fn compute_budget(&self, ctx: &ClientContext) -> RpcResult<LeftTimeout> {
        let budget = compute_budget(
            ctx.timeout_ms,
            self.backend.default_timeout_ms,
            ctx.link.as_ref(),
        );
        let link_enabled = self.backend.full_link_timeout
            && ctx.link.as_ref().map_or(false, |link| link.full_link_enabled);
        if link_enabled && budget.is_exhausted() {
            return Err(RpcError::new(
                ErrorCode::LinkTimeout,
                format!(
                    "full-link budget exhausted: remaining {}ms",
                    budget.remaining_ms()
                ),
            ));
        }
        Ok(budget)
    }

    fn dispatch(&self, request: Request, tx: SyncSender<Response>) -> u64 {
        let id = request.id();
        self.invoker.invoke(
            request,
            Completion::new(
                id,
                Box::new(move |response| {
                    let _ = tx.send(response);
                }),
            ),
        );
        id
    }

    fn lift(response: Response) -> RpcResult<Response> {
        match response.error() {
            Some(error) => Err(error.clone()),
            None => Ok(response),
        }
    }

    /// Synchronous call: blocks up to the remaining budget, then raises a
    /// client-invoke-timeout. With a configured backup threshold, a
    /// secondary request races the primary after the delay.
    pub fn invoke_sync(
        &self,
        ctx: ClientContext,
        method: &str,
        body: Vec<u8>,
    ) -> RpcResult<Response> {
        let request = self.build_request(&ctx, method, body.clone())?;
        let func = request.invocation().func().to_string();
        let remaining = request.meta.timeout.remaining_ms().max(0) as u64;

        // Capacity two: the backup race may complete both legs.
        let (tx, rx) = sync_channel::<Response>(2);
        let primary_id = self.dispatch(request, tx.clone());
        let mut ids = vec![primary_id];

        let backup_delay = self
            .backend
            .backup_request_ms
            .filter(|delay| *delay < remaining);
        let outcome = match backup_delay {
            None => rx.recv_timeout(Duration::from_millis(remaining)),
            Some(delay) => match rx.recv_timeout(Duration::from_millis(delay)) {
                Ok(response) => Ok(response),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("issuing backup request for {} after {}ms", func, delay);
                    let backup = self.build_request(&ctx, method, body)?;
                    ids.push(self.dispatch(backup, tx.clone()));
                    rx.recv_timeout(Duration::from_millis(remaining.saturating_sub(delay)))
                }
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(response) => Self::lift(response),
            Err(RecvTimeoutError::Timeout) => {
                // Claim the pending entries exactly once; a late response
                // racing this removal loses and is dropped.
                let error = RpcError::new(
                    ErrorCode::ClientTimeout,
                    format!("{} timed out after {}ms", func, remaining),
                );
                for id in ids {
                    self.runtime.fail_pending(id, error.clone());
                }
                Err(error)
            }
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::new(
                ErrorCode::Unknown,
                "completion channel disconnected",
            )),
        }
    }

    /// Asynchronous call: resolves when the response arrives or the
    /// remaining budget elapses.
    pub async fn invoke_async(
        &self,
        ctx: ClientContext,
        method: &str,
        body: Vec<u8>,
    ) -> RpcResult<Response> {
        let request = self.build_request(&ctx, method, body)?;
        let func = request.invocation().func().to_string();
        let remaining = request.meta.timeout.remaining_ms().max(0) as u64;
        let id = request.id();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.invoker.invoke(
            request,
            Completion::new(
                id,
                Box::new(move |response| {
                    let _ = tx.send(response);
                }),
            ),
        );
        match tokio::time::timeout(Duration::from_millis(remaining), rx).await {
            Ok(Ok(response)) => Self::lift(response),
            Ok(Err(_)) => Err(RpcError::new(
                ErrorCode::Unknown,
                "completion channel dropped",
            )),
            Err(_) => {
                let error = RpcError::new(
                    ErrorCode::ClientTimeout,
                    format!("{} timed out after {}ms", func, remaining),
                );
                self.runtime.fail_pending(id, error.clone());
                Err(error)
            }
        }
    }

    /// One-way call: returns as soon as the request is handed to the
    /// transport; send failures are logged, never observed by the caller.
    pub fn invoke_oneway(&self, ctx: ClientContext, method: &str, body: Vec<u8>) -> RpcResult<()> {
        let mut request = self.build_request(&ctx, method, body)?;
        request.meta.one_way = true;
        let id = request.id();
        self.invoker.invoke(
            request,
            Completion::new(
                id,
                Box::new(move |response| {
                    if let Some(error) = response.error() {
                        debug!("one-way request {} failed: {}", id, error);
                    }
                }),
            ),
        );
        Ok(())
    }

    /// Streaming call: opens the stream on the resolved endpoint and
    /// returns the reactive handles.
    pub fn open_stream(
        &self,
        ctx: ClientContext,
        method: &str,
    ) -> RpcResult<(StreamWriter, StreamReader)> {
        let mut request = self.build_request(&ctx, method, Vec::new())?;
        if !request.invocation().mode().is_stream() {
            return Err(RpcError::new(
                ErrorCode::InvalidArgument,
                format!("method '{}' is not declared streaming", method),
            ));
        }
        self.invoker.open_stream(&mut request)
    }
}
