// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client-side cluster invocation pipeline.
//!
//! Call flow, top down: [`handler`] builds the invocation and timeout
//! budget from the dispatch table, [`invoker`] resolves an instance and a
//! cached per-endpoint invoker, [`interceptor`] wraps the terminal invoker
//! with the configured cross-cutting chain, and the transport endpoint
//! carries the call. [`invocation`] holds the data carriers and
//! [`timeout`] the full-link budget arithmetic.

pub mod handler;
pub mod interceptor;
pub mod invocation;
pub mod invoker;
pub mod timeout;

pub use handler::{ClientContext, ClusterHandler, MethodDescriptor, ServiceDescriptor};
pub use interceptor::{build_chain, Completion, Interceptor, Invoker};
pub use invocation::{
    Identity, Invocation, InvokeMode, LazyBody, MethodInfo, Request, RequestMeta, Response,
};
pub use invoker::{ClusterInvoker, EndpointKey};
pub use timeout::{compute_budget, LeftTimeout, LinkContext};
