// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection streaming state machine.
//!
//! One dispatcher owns every stream on its connection: a map of outbound
//! senders, a map of inbound receivers, a pending-INIT registry for
//! streams this side opened, and (server role) a route table resolving
//! `/service/method` to application handlers.
//!
//! Frames arrive on the connection's single receive callback, so dispatch
//! is serialized per connection; consumer-side processing is handed to the
//! worker pool so slow consumption never blocks frame dispatch. A stream
//! leaves both maps on its terminal signal — absence of an entry after
//! termination is the closed state. Connection-level termination is
//! guarded by an atomic compare-and-set so that exactly one of
//! {connection-close callback, explicit terminate} wins the fan-out.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use log::{debug, warn};

use crate::codec::DecodeOutcome;
use crate::error::{ErrorCode, RpcError, RpcResult};
use crate::plugin::WorkerPool;
use crate::transport::Connection;

use super::frame::{
    decode_stream_frame, encode_stream_frame, CloseFrame, InitFrame, StreamFrame,
};
use super::receiver::{StreamReader, StreamReceiver};
use super::sender::{StreamSender, StreamWriter};
use super::window::{RecvWindow, DEFAULT_WINDOW_SIZE};

/// Client-created stream ids start here; lower ids are reserved for
/// control use so they can never collide.
pub const CLIENT_STREAM_ID_BASE: u32 = 101;

/// Per-dispatcher stream settings.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Receive window advertised to the peer; 0 disables flow control.
    pub window: u32,
    /// Body serialization id negotiated in INIT.
    pub content_type: u8,
    /// Body compression id negotiated in INIT.
    pub content_encoding: u8,
    /// Inbound buffer capacity in chunks per stream.
    pub recv_queue: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW_SIZE,
            content_type: 0,
            content_encoding: 0,
            recv_queue: 64,
        }
    }
}

/// Context handed to a server-side stream handler.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub func: String,
    pub caller: String,
    pub callee: String,
    pub content_type: u8,
    pub content_encoding: u8,
}

/// Application handler for one server-side stream: consume the inbound
/// sequence, produce the outbound one.
pub trait StreamHandler: Send + Sync {
    fn handle(&self, ctx: StreamContext, inbound: StreamReader, outbound: StreamWriter);
}

/// Route table keyed by `/service/method`.
#[derive(Default)]
pub struct StreamRoutes {
    routes: DashMap<String, Arc<dyn StreamHandler>>,
}

impl StreamRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, func: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        self.routes.insert(func.into(), handler);
    }

    fn get(&self, func: &str) -> Option<Arc<dyn StreamHandler>> {
        self.routes.get(func).map(|entry| Arc::clone(entry.value()))
    }
}

/// Per-connection frame demultiplexer and stream lifecycle owner.
pub struct StreamDispatcher {
    conn: Arc<dyn Connection>,
    worker: Arc<dyn WorkerPool>,
    options: StreamOptions,
    senders: DashMap<u32, Arc<StreamSender>>,
    receivers: DashMap<u32, StreamReceiver>,
    pending_init: DashMap<u32, SyncSender<RpcResult<InitFrame>>>,
    routes: Option<Arc<StreamRoutes>>,
    terminal: ArcSwapOption<RpcError>,
    next_stream_id: AtomicU32,
    me: Weak<StreamDispatcher>,
}

impl StreamDispatcher {
    /// Client-role dispatcher: opens streams, no route table.
    pub fn client(
        conn: Arc<dyn Connection>,
        worker: Arc<dyn WorkerPool>,
        options: StreamOptions,
    ) -> Arc<Self> {
        Self::build(conn, worker, options, None)
    }

    /// Server-role dispatcher: accepts streams against a route table.
    pub fn server(
        conn: Arc<dyn Connection>,
        worker: Arc<dyn WorkerPool>,
        options: StreamOptions,
        routes: Arc<StreamRoutes>,
    ) -> Arc<Self> {
        Self::build(conn, worker, options, Some(routes))
    }

    fn build(
        conn: Arc<dyn Connection>,
        worker: Arc<dyn WorkerPool>,
        options: StreamOptions,
        routes: Option<Arc<StreamRoutes>>,
    ) -> Arc<Self> {
        let dispatcher = Arc::new_cyclic(|me| Self {
            conn,
            worker,
            options,
            senders: DashMap::new(),
            receivers: DashMap::new(),
            pending_init: DashMap::new(),
            routes,
            terminal: ArcSwapOption::from(None),
            next_stream_id: AtomicU32::new(CLIENT_STREAM_ID_BASE),
            me: me.clone(),
        });
        let weak = Arc::downgrade(&dispatcher);
        dispatcher.conn.register_close_hook(Box::new(move || {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.terminate(RpcError::new(
                    ErrorCode::ConnectionClosed,
                    "connection closed",
                ));
            }
        }));
        dispatcher
    }

    pub fn is_terminated(&self) -> bool {
        self.terminal.load().is_some()
    }

    /// Live stream counts (senders, receivers) — diagnostics only.
    pub fn live_streams(&self) -> (usize, usize) {
        (self.senders.len(), self.receivers.len())
    }

    fn terminal_fn(&self) -> Box<dyn Fn(u32) + Send + Sync> {
        let weak = self.me.clone();
        Box::new(move |stream_id| {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.senders.remove(&stream_id);
            }
        })
    }

    fn send_reset(&self, stream_id: u32, code: ErrorCode, message: &str) {
        let close = CloseFrame::reset(code.as_i32(), message);
        let packet = encode_stream_frame(stream_id, &StreamFrame::Close(close));
        if let Err(e) = self.conn.send(&packet) {
            debug!("stream {} reset send failed: {}", stream_id, e);
        }
    }

    /// Open a stream to the peer and wait for its INIT acknowledgement.
    pub fn open_stream(
        &self,
        func: &str,
        caller: &str,
        callee: &str,
        timeout: Duration,
    ) -> RpcResult<(StreamWriter, StreamReader)> {
        if self.is_terminated() {
            return Err(RpcError::new(
                ErrorCode::ConnectionClosed,
                "connection terminated",
            ));
        }
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);

        let recv_window = Arc::new(RecvWindow::new(self.options.window));
        let (sink, reader) = StreamReceiver::channel(
            stream_id,
            self.options.recv_queue,
            recv_window,
            Arc::clone(&self.conn),
        );
        self.receivers.insert(stream_id, sink);

        let (ack_tx, ack_rx) = sync_channel(1);
        self.pending_init.insert(stream_id, ack_tx);

        let init = InitFrame {
            func: func.to_string(),
            caller: caller.to_string(),
            callee: callee.to_string(),
            content_type: self.options.content_type,
            content_encoding: self.options.content_encoding,
            window: self.options.window,
            ret: 0,
            error_msg: String::new(),
        };
        let packet = encode_stream_frame(stream_id, &StreamFrame::Init(init));
        if let Err(e) = self.conn.send(&packet) {
            self.pending_init.remove(&stream_id);
            self.receivers.remove(&stream_id);
            return Err(e);
        }

        let ack = match ack_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => {
                // Claim the pending entry; a late ack finds nothing.
                self.pending_init.remove(&stream_id);
                self.receivers.remove(&stream_id);
                return Err(RpcError::new(
                    ErrorCode::ClientTimeout,
                    format!("stream {} init timed out", stream_id),
                ));
            }
        };
        let ack = match ack {
            Ok(ack) => ack,
            Err(e) => {
                self.receivers.remove(&stream_id);
                return Err(e);
            }
        };

        let (sender, writer) = StreamSender::channel(
            stream_id,
            ack.window,
            Arc::clone(&self.conn),
            Arc::clone(&self.worker),
            self.terminal_fn(),
        );
        self.senders.insert(stream_id, sender);
        Ok((writer, reader))
    }

    /// Entry point for one complete inbound packet of stream type.
    pub fn on_frame(&self, packet: &[u8]) {
        if self.is_terminated() {
            debug!("frame dropped: dispatcher terminated");
            return;
        }
        let (stream_id, frame) = match decode_stream_frame(packet) {
            Ok(DecodeOutcome::Complete(decoded)) => decoded,
            Ok(DecodeOutcome::NeedMore) => {
                warn!("partial stream packet reached dispatcher");
                return;
            }
            Err(e) => {
                warn!("stream frame decode failed: {}", e);
                return;
            }
        };
        match frame {
            StreamFrame::Init(init) => self.handle_init(stream_id, init),
            StreamFrame::Data(payload) => self.handle_data(stream_id, payload),
            StreamFrame::Feedback(feedback) => self.handle_feedback(stream_id, feedback.increment),
            StreamFrame::Close(close) => self.handle_close(stream_id, close),
        }
    }

    fn handle_init(&self, stream_id: u32, init: InitFrame) {
        // Client role: an INIT for an id we opened is the peer's ack.
        if let Some((_, ack_tx)) = self.pending_init.remove(&stream_id) {
            let result = if init.ret == 0 {
                Ok(init)
            } else {
                Err(RpcError::new(
                    ErrorCode::from_i32(init.ret),
                    init.error_msg.clone(),
                ))
            };
            if ack_tx.send(result).is_err() {
                debug!("stream {} init ack arrived after local timeout", stream_id);
                self.receivers.remove(&stream_id);
            }
            return;
        }

        let routes = match &self.routes {
            Some(routes) => routes,
            None => {
                debug!("stream {} unexpected INIT on client connection", stream_id);
                return;
            }
        };
        let handler = match routes.get(&init.func) {
            Some(handler) => handler,
            None => {
                // Unroutable: answer with an error INIT; the id is never
                // admitted into the stream maps.
                let reject = InitFrame {
                    ret: ErrorCode::UnknownInvoke.as_i32(),
                    error_msg: format!("no stream route for '{}'", init.func),
                    ..init
                };
                let packet = encode_stream_frame(stream_id, &StreamFrame::Init(reject));
                if let Err(e) = self.conn.send(&packet) {
                    debug!("stream {} init reject send failed: {}", stream_id, e);
                }
                return;
            }
        };

        let recv_window = Arc::new(RecvWindow::new(self.options.window));
        let (sink, reader) = StreamReceiver::channel(
            stream_id,
            self.options.recv_queue,
            recv_window,
            Arc::clone(&self.conn),
        );
        self.receivers.insert(stream_id, sink);

        let (sender, writer) = StreamSender::channel(
            stream_id,
            init.window,
            Arc::clone(&self.conn),
            Arc::clone(&self.worker),
            self.terminal_fn(),
        );
        self.senders.insert(stream_id, sender);

        let ack = InitFrame {
            window: self.options.window,
            ret: 0,
            error_msg: String::new(),
            ..init.clone()
        };
        let packet = encode_stream_frame(stream_id, &StreamFrame::Init(ack));
        if let Err(e) = self.conn.send(&packet) {
            warn!("stream {} init ack send failed: {}", stream_id, e);
            self.teardown_stream(stream_id, None);
            return;
        }

        let ctx = StreamContext {
            func: init.func,
            caller: init.caller,
            callee: init.callee,
            content_type: init.content_type,
            content_encoding: init.content_encoding,
        };
        // Handler runs on the worker pool: consumption must never block
        // the connection receive path.
        if let Err(e) = self.worker.execute(Box::new(move || {
            handler.handle(ctx, reader, writer);
        })) {
            warn!("stream {} handler not scheduled: {}", stream_id, e);
            self.teardown_stream(stream_id, Some((ErrorCode::Overload, "handler overloaded")));
        }
    }

    fn handle_data(&self, stream_id: u32, payload: Vec<u8>) {
        let emit = match self.receivers.get(&stream_id) {
            Some(sink) => sink.emit_data(payload),
            None => {
                // Frames can arrive after local cleanup under network
                // reordering: reset, and never admit the id.
                self.send_reset(stream_id, ErrorCode::Unknown, "unknown stream");
                return;
            }
        };
        if let Err(e) = emit {
            warn!("stream {} receiver rejected data: {}", stream_id, e);
            self.teardown_stream(
                stream_id,
                Some((ErrorCode::Overload, "receive buffer overrun")),
            );
        }
    }

    fn handle_feedback(&self, stream_id: u32, increment: u32) {
        let sender = self
            .senders
            .get(&stream_id)
            .map(|entry| Arc::clone(entry.value()));
        match sender {
            Some(sender) => sender.on_feedback(increment),
            // The peer's replenishment may race with local completion.
            None => debug!("feedback for unknown stream {} ignored", stream_id),
        }
    }

    fn handle_close(&self, stream_id: u32, close: CloseFrame) {
        if close.is_reset() {
            let had_state = self.senders.contains_key(&stream_id)
                || self.receivers.contains_key(&stream_id);
            self.remove_both(
                stream_id,
                RpcError::new(ErrorCode::from_i32(close.ret), close.message.clone()),
            );
            if had_state {
                self.send_reset(stream_id, ErrorCode::from_i32(close.ret), &close.message);
            }
            return;
        }
        // Normal close: complete or error-complete the inbound receiver.
        if let Some((_, sink)) = self.receivers.remove(&stream_id) {
            if close.ret == 0 && close.func_ret == 0 {
                sink.complete();
            } else if close.func_ret != 0 {
                sink.emit_error(RpcError::business(close.func_ret, close.message));
            } else {
                sink.emit_error(RpcError::new(
                    ErrorCode::from_i32(close.ret),
                    close.message,
                ));
            }
        } else {
            debug!("close for unknown stream {} ignored", stream_id);
        }
    }

    /// Reset one stream: cancel outbound, error inbound, tell the peer.
    fn teardown_stream(&self, stream_id: u32, reset: Option<(ErrorCode, &str)>) {
        if let Some((_, sender)) = self.senders.remove(&stream_id) {
            sender.cancel();
        }
        if let Some((code, message)) = reset {
            if let Some((_, sink)) = self.receivers.remove(&stream_id) {
                sink.emit_error(RpcError::new(code, message));
            }
            self.send_reset(stream_id, code, message);
        } else {
            self.receivers.remove(&stream_id);
        }
    }

    fn remove_both(&self, stream_id: u32, error: RpcError) {
        if let Some((_, sender)) = self.senders.remove(&stream_id) {
            sender.cancel();
        }
        if let Some((_, sink)) = self.receivers.remove(&stream_id) {
            sink.emit_error(error);
        }
    }

    /// Connection-level termination: exactly one caller wins the CAS and
    /// fans out to every live stream; no stream outlives its connection.
    pub fn terminate(&self, error: RpcError) {
        let won = self
            .terminal
            .compare_and_swap(&None::<Arc<RpcError>>, Some(Arc::new(error.clone())))
            .is_none();
        if !won {
            return;
        }
        let sender_ids: Vec<u32> = self.senders.iter().map(|e| *e.key()).collect();
        for id in sender_ids {
            if let Some((_, sender)) = self.senders.remove(&id) {
                sender.cancel();
            }
        }
        let receiver_ids: Vec<u32> = self.receivers.iter().map(|e| *e.key()).collect();
        for id in receiver_ids {
            if let Some((_, sink)) = self.receivers.remove(&id) {
                sink.emit_error(error.clone());
            }
        }
        let pending_ids: Vec<u32> = self.pending_init.iter().map(|e| *e.key()).collect();
        for id in pending_ids {
            if let Some((_, ack_tx)) = self.pending_init.remove(&id) {
                let _ = ack_tx.send(Err(error.clone()));
            }
        }
    }
}
