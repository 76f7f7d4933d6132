// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bidirectional streaming with credit-based flow control.
//!
//! Per-stream state machine: **uninitialized** → (INIT exchanged) →
//! **open** → (DATA flows under the window) → **closing** (CLOSE/RESET or
//! local terminal) → **removed** (erased from the dispatcher maps).
//!
//! - [`frame`] — INIT/DATA/FEEDBACK/CLOSE wire frames
//! - [`window`] — send credit + quarter-window feedback accounting
//! - [`sender`] / [`receiver`] — the outbound and inbound stream halves
//! - [`dispatcher`] — per-connection demux and lifecycle owner

pub mod dispatcher;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod window;

pub use dispatcher::{
    StreamContext, StreamDispatcher, StreamHandler, StreamOptions, StreamRoutes,
    CLIENT_STREAM_ID_BASE,
};
pub use frame::{CloseFrame, FeedbackFrame, InitFrame, StreamFrame};
pub use receiver::{StreamReader, StreamReceiver};
pub use sender::{StreamSender, StreamWriter};
pub use window::{RecvWindow, SendWindow, DEFAULT_WINDOW_SIZE};
