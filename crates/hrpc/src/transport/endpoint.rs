// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection-backed terminal invoker and inbound demultiplexer.
//!
//! One [`ClientEndpoint`] owns one connection: outbound, it encodes
//! requests and registers their pending completions before the send;
//! inbound, it splits the receive path by frame type — stream frames go
//! to the dispatcher, unary frames complete pending calls. The
//! connection's close signal fails every call still in flight on this
//! endpoint, exactly once per call.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};

use crate::cluster::interceptor::{Completion, Invoker};
use crate::cluster::{Request, Response};
use crate::codec::{DecodeOutcome, Decoded, DecodeSide, FrameType, StandardCodec, StandardFrame};
use crate::error::{ErrorCode, RpcError};
use crate::runtime::RpcRuntime;
use crate::stream::{StreamDispatcher, StreamOptions};

use super::Connection;

/// Client side of one connection: terminal invoker + receive demux.
pub struct ClientEndpoint {
    conn: Arc<dyn Connection>,
    codec: StandardCodec,
    runtime: Arc<RpcRuntime>,
    dispatcher: Arc<StreamDispatcher>,
    in_flight: DashMap<u64, ()>,
}

impl ClientEndpoint {
    pub fn new(
        conn: Arc<dyn Connection>,
        codec: StandardCodec,
        runtime: Arc<RpcRuntime>,
        stream_options: StreamOptions,
    ) -> Arc<Self> {
        let dispatcher = StreamDispatcher::client(
            Arc::clone(&conn),
            Arc::clone(runtime.worker_pool()),
            stream_options,
        );
        let endpoint = Arc::new(Self {
            conn,
            codec,
            runtime,
            dispatcher,
            in_flight: DashMap::new(),
        });
        let weak = Arc::downgrade(&endpoint);
        endpoint.conn.register_close_hook(Box::new(move || {
            if let Some(endpoint) = weak.upgrade() {
                endpoint.on_connection_closed();
            }
        }));
        let weak = Arc::downgrade(&endpoint);
        endpoint.conn.set_receive(Box::new(move |packet| {
            if let Some(endpoint) = weak.upgrade() {
                endpoint.on_inbound(packet);
            }
        }));
        endpoint
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.conn
    }

    pub fn dispatcher(&self) -> &Arc<StreamDispatcher> {
        &self.dispatcher
    }

    pub fn is_available(&self) -> bool {
        self.conn.is_available()
    }

    /// Fail every in-flight call on this endpoint. The pending registry's
    /// atomic removal makes a race with a late response harmless.
    fn on_connection_closed(&self) {
        let ids: Vec<u64> = self.in_flight.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.in_flight.remove(&id);
            self.runtime.fail_pending(
                id,
                RpcError::new(ErrorCode::ConnectionClosed, "connection closed"),
            );
        }
    }

    /// Receive-path entry: one complete packet from the transport.
    pub fn on_inbound(&self, packet: &[u8]) {
        let frame = match StandardFrame::decode(packet) {
            Ok(DecodeOutcome::Complete(frame)) => frame,
            Ok(DecodeOutcome::NeedMore) => {
                warn!("partial packet reached endpoint demux");
                return;
            }
            Err(e) => {
                warn!("inbound frame rejected: {}", e);
                return;
            }
        };
        match frame.frame_type {
            FrameType::Stream => self.dispatcher.on_frame(packet),
            FrameType::Unary => match self.codec.decode(DecodeSide::Client, packet) {
                Ok(DecodeOutcome::Complete(Decoded::Response(response))) => {
                    let id = response.request_id();
                    self.in_flight.remove(&id);
                    self.runtime.complete_pending(id, response);
                }
                Ok(DecodeOutcome::Complete(Decoded::Request(_))) => {
                    warn!("unexpected request frame on client connection");
                }
                Ok(DecodeOutcome::NeedMore) => {
                    warn!("partial unary packet reached endpoint demux");
                }
                Err(e) => {
                    // Header parse failures leave the pending entry to the
                    // per-call timeout; the request id is unknown here.
                    warn!("response decode failed: {}", e);
                }
            },
        }
    }
}

impl Invoker for ClientEndpoint {
    fn invoke(&self, mut request: Request, done: Completion) {
        let wire = match self.codec.encode_request(&mut request) {
            Ok(wire) => wire,
            Err(e) => {
                done.fail(e);
                return;
            }
        };
        let id = request.id();

        if request.meta.one_way {
            // One-way: send errors are logged, never observed by callers.
            if let Err(e) = self.conn.send(&wire) {
                debug!("one-way request {} send failed: {}", id, e);
            }
            done.complete(Response::default());
            return;
        }

        // Insert before the send so a fast response cannot miss its entry.
        self.runtime.register_pending(id, done);
        self.in_flight.insert(id, ());
        if let Err(e) = self.conn.send(&wire) {
            self.in_flight.remove(&id);
            self.runtime.fail_pending(id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Invocation, InvokeMode, LazyBody, MethodInfo};
    use crate::codec::CompressType;
    use crate::config::ProtocolConfig;
    use crate::plugin::ThreadPoolExecutor;
    use crate::transport::LoopbackConnection;
    use std::sync::mpsc;
    use std::time::Duration;

    fn endpoint_with_echo_peer() -> (Arc<ClientEndpoint>, Arc<ThreadPoolExecutor>) {
        let (client_conn, server_conn) = LoopbackConnection::pair();
        let pool = ThreadPoolExecutor::new(2, 64);
        let runtime = RpcRuntime::new(pool.clone());
        let endpoint = ClientEndpoint::new(
            client_conn.clone(),
            StandardCodec::new(ProtocolConfig::default(), None),
            runtime,
            StreamOptions::default(),
        );
        // Peer: decode the request, echo its body back as the response.
        {
            let server_conn_out = server_conn.clone();
            let codec = StandardCodec::new(ProtocolConfig::default(), None);
            server_conn.set_receive(Box::new(move |p| {
                if let Ok(DecodeOutcome::Complete(Decoded::Request(req))) =
                    codec.decode(DecodeSide::Server, p)
                {
                    if req.meta.one_way {
                        return;
                    }
                    let response = Response::ok(
                        req.id(),
                        LazyBody {
                            content_type: 0,
                            content_encoding: CompressType::None,
                            raw: req.invocation().body().to_vec(),
                        },
                    );
                    let wire = codec.encode_response(&response).unwrap();
                    let _ = server_conn_out.send(&wire);
                }
            }));
        }
        (endpoint, pool)
    }

    fn request(id: u64, body: &[u8], one_way: bool) -> Request {
        let mut request = Request::new(
            id,
            Invocation::new(
                "greeter",
                "sayHello",
                if one_way {
                    InvokeMode::OneWay
                } else {
                    InvokeMode::Sync
                },
                body.to_vec(),
                MethodInfo::default(),
            ),
        );
        request.meta.one_way = one_way;
        request
    }

    #[test]
    fn test_invoke_completes_with_echoed_body() {
        let (endpoint, pool) = endpoint_with_echo_peer();
        let (tx, rx) = mpsc::channel();
        endpoint.invoke(
            request(1, b"marco", false),
            Completion::new(1, Box::new(move |r| tx.send(r).unwrap())),
        );
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.value().unwrap().raw, b"marco");
        assert_eq!(endpoint.in_flight.len(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_one_way_returns_placeholder_immediately() {
        let (endpoint, pool) = endpoint_with_echo_peer();
        let (tx, rx) = mpsc::channel();
        endpoint.invoke(
            request(2, b"fire-and-forget", true),
            Completion::new(2, Box::new(move |r| tx.send(r).unwrap())),
        );
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(response.value().is_none());
        assert!(response.error().is_none());
        assert_eq!(endpoint.in_flight.len(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_connection_close_fails_in_flight() {
        let (client_conn, _server_conn) = LoopbackConnection::pair();
        let pool = ThreadPoolExecutor::new(1, 16);
        let runtime = RpcRuntime::new(pool.clone());
        let endpoint = ClientEndpoint::new(
            client_conn.clone(),
            StandardCodec::new(ProtocolConfig::default(), None),
            Arc::clone(&runtime),
            StreamOptions::default(),
        );
        // Peer never answers.
        let (tx, rx) = mpsc::channel();
        endpoint.invoke(
            request(3, b"void", false),
            Completion::new(3, Box::new(move |r| tx.send(r).unwrap())),
        );
        assert_eq!(runtime.pending_count(), 1);
        client_conn.close();
        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            response.error().unwrap().code(),
            ErrorCode::ConnectionClosed
        );
        assert_eq!(runtime.pending_count(), 0);
        pool.shutdown();
    }
}
