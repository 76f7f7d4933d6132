// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound stream half: a bounded sink fed by received DATA frames,
//! exposed to the local consumer as a lazy pull-based reader.
//!
//! The sink end lives in the dispatcher's receiver map and is fed from the
//! connection receive path; `try_send` rejection on a full buffer is a
//! backpressure violation that resets the stream. The reader end performs
//! receive-side window accounting: every chunk handed to the application
//! counts toward the next FEEDBACK frame.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::debug;

use crate::error::{ErrorCode, RpcError, RpcResult};
use crate::stream::frame::{encode_stream_frame, FeedbackFrame, StreamFrame};
use crate::stream::window::RecvWindow;
use crate::transport::Connection;

/// Items flowing from the dispatcher into the local consumer.
#[derive(Debug)]
enum StreamItem {
    Data(Vec<u8>),
    /// Terminal error; the channel disconnects right after.
    Error(RpcError),
}

/// Dispatcher-side sink for one stream.
///
/// Removal from the dispatcher map drops the sink, which disconnects the
/// channel: the reader observes that as orderly completion unless an
/// `Error` item arrived first.
pub struct StreamReceiver {
    stream_id: u32,
    tx: Sender<StreamItem>,
}

impl StreamReceiver {
    /// Build the sink/reader pair for one stream.
    pub fn channel(
        stream_id: u32,
        capacity: usize,
        window: Arc<RecvWindow>,
        conn: Arc<dyn Connection>,
    ) -> (StreamReceiver, StreamReader) {
        let (tx, rx) = bounded(capacity);
        (
            StreamReceiver { stream_id, tx },
            StreamReader {
                stream_id,
                rx,
                window,
                conn,
            },
        )
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Feed one received DATA payload to the consumer.
    ///
    /// A full buffer means the consumer fell behind the negotiated window:
    /// the caller resets the stream.
    pub fn emit_data(&self, payload: Vec<u8>) -> RpcResult<()> {
        match self.tx.try_send(StreamItem::Data(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RpcError::new(
                ErrorCode::Overload,
                format!("stream {} receive buffer rejected data", self.stream_id),
            )),
            Err(TrySendError::Disconnected(_)) => Err(RpcError::new(
                ErrorCode::ConnectionClosed,
                format!("stream {} consumer dropped", self.stream_id),
            )),
        }
    }

    /// Error-complete the consumer. Consumes the sink; the disconnect that
    /// follows is the terminal signal.
    pub fn emit_error(self, error: RpcError) {
        if self.tx.try_send(StreamItem::Error(error)).is_err() {
            debug!(
                "stream {} error dropped: consumer already gone",
                self.stream_id
            );
        }
    }

    /// Complete the consumer normally by dropping the sink.
    pub fn complete(self) {}
}

/// Local consumer handle: a lazy pull-based sequence of payload chunks.
pub struct StreamReader {
    stream_id: u32,
    rx: Receiver<StreamItem>,
    window: Arc<RecvWindow>,
    conn: Arc<dyn Connection>,
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

impl StreamReader {
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    fn account(&self, payload: &[u8]) {
        if let Some(increment) = self.window.on_consumed(payload.len()) {
            let feedback =
                encode_stream_frame(self.stream_id, &StreamFrame::Feedback(FeedbackFrame {
                    increment,
                }));
            if let Err(e) = self.conn.send(&feedback) {
                debug!("stream {} feedback send failed: {}", self.stream_id, e);
            }
        }
    }

    /// Block for the next chunk. `Ok(None)` is orderly completion; an
    /// error is the stream's terminal error.
    pub fn recv(&self) -> RpcResult<Option<Vec<u8>>> {
        match self.rx.recv() {
            Ok(StreamItem::Data(payload)) => {
                self.account(&payload);
                Ok(Some(payload))
            }
            Ok(StreamItem::Error(error)) => Err(error),
            Err(_) => Ok(None),
        }
    }

    /// Block up to `timeout` for the next chunk.
    pub fn recv_timeout(&self, timeout: Duration) -> RpcResult<Option<Vec<u8>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(StreamItem::Data(payload)) => {
                self.account(&payload);
                Ok(Some(payload))
            }
            Ok(StreamItem::Error(error)) => Err(error),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(RpcError::new(
                ErrorCode::ClientTimeout,
                format!("stream {} receive timed out", self.stream_id),
            )),
        }
    }
}
