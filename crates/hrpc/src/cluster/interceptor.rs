// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Invoker abstraction and the cross-cutting interceptor chain.
//!
//! An [`Invoker`] takes a request and a one-shot [`Completion`]; the
//! completion must be resolved exactly once with the response. Interceptors
//! wrap invokers: given an ordered list of plugin names the chain is built
//! right-to-left, each link delegating to "the next" through its own
//! `intercept`. An interceptor that drops the completion without resolving
//! it breaches the framework contract; the completion's drop guard turns
//! that breach into an error response instead of a hung caller.

use std::sync::Arc;

use log::error;

use crate::error::{ErrorCode, RpcError};
use crate::plugin::ExtensionRegistry;

use super::invocation::{Request, Response};

/// One-shot completion for an asynchronous response.
///
/// Resolved by exactly one of: the transport (response arrived), a timeout,
/// or a failure on the dispatch path. Dropping an unresolved completion is
/// a contract breach and resolves it with [`ErrorCode::Unknown`].
pub struct Completion {
    request_id: u64,
    done: Option<Box<dyn FnOnce(Response) + Send + Sync>>,
}

impl Completion {
    pub fn new(request_id: u64, done: Box<dyn FnOnce(Response) + Send + Sync>) -> Self {
        Self {
            request_id,
            done: Some(done),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Resolve with the response. Consumes the completion.
    pub fn complete(mut self, response: Response) {
        if let Some(done) = self.done.take() {
            done(response);
        }
    }

    /// Resolve with an error response.
    pub fn fail(self, error: RpcError) {
        let id = self.request_id;
        self.complete(Response::err(id, error));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            error!(
                "completion for request {} dropped without a result",
                self.request_id
            );
            done(Response::err(
                self.request_id,
                RpcError::new(
                    ErrorCode::Unknown,
                    "invoker completed without producing a result",
                ),
            ));
        }
    }
}

/// `invoke(Request) -> asynchronous Response`.
pub trait Invoker: Send + Sync {
    fn invoke(&self, request: Request, done: Completion);
}

/// A cross-cutting wrapper around the invoker chain.
pub trait Interceptor: Send + Sync {
    /// Intercept the call. Implementations must either forward to `next`
    /// or resolve `done` themselves, exactly once.
    fn intercept(&self, next: Arc<dyn Invoker>, request: Request, done: Completion);
}

/// One link of the chain: an interceptor plus its downstream invoker.
struct ChainLink {
    interceptor: Arc<dyn Interceptor>,
    next: Arc<dyn Invoker>,
}

impl Invoker for ChainLink {
    fn invoke(&self, request: Request, done: Completion) {
        self.interceptor
            .intercept(Arc::clone(&self.next), request, done);
    }
}

/// Build the interceptor chain around `terminal`, right-to-left, so the
/// first name in `names` is outermost.
pub fn build_chain(
    names: &[String],
    registry: &ExtensionRegistry,
    terminal: Arc<dyn Invoker>,
) -> crate::error::RpcResult<Arc<dyn Invoker>> {
    let mut next = terminal;
    for name in names.iter().rev() {
        let interceptor = registry.interceptor(name)?;
        next = Arc::new(ChainLink { interceptor, next });
    }
    Ok(next)
}
