// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound stream half: a bounded queue drained onto the wire under the
//! send window.
//!
//! The producer writes through a [`StreamWriter`]; a drain task on the
//! worker pool encodes queued chunks as DATA frames while credit remains,
//! decrementing the window by each payload's size. When the window is
//! exhausted the drain stops; a FEEDBACK increment that takes the window
//! back above zero schedules exactly one drain resume on the worker pool,
//! never inline, so replenishment cannot grow the sender's stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, warn};

use crate::error::{ErrorCode, RpcError, RpcResult};
use crate::plugin::WorkerPool;
use crate::stream::frame::{encode_stream_frame, CloseFrame, StreamFrame};
use crate::stream::window::SendWindow;
use crate::transport::Connection;

/// Default outbound queue capacity in chunks.
pub const DEFAULT_SEND_QUEUE: usize = 64;

enum OutItem {
    Data(Vec<u8>),
    Close(CloseFrame),
}

/// Callback the dispatcher hands in to remove terminal streams from its
/// maps.
pub type TerminalFn = Box<dyn Fn(u32) + Send + Sync>;

/// Outbound sender for one stream: queue drain + window bookkeeping.
pub struct StreamSender {
    stream_id: u32,
    conn: Arc<dyn Connection>,
    window: SendWindow,
    rx: Receiver<OutItem>,
    draining: AtomicBool,
    cancelled: AtomicBool,
    worker: Arc<dyn WorkerPool>,
    on_terminal: TerminalFn,
    me: Weak<StreamSender>,
}

impl StreamSender {
    /// Build the sender/writer pair for one stream.
    pub fn channel(
        stream_id: u32,
        window: u32,
        conn: Arc<dyn Connection>,
        worker: Arc<dyn WorkerPool>,
        on_terminal: TerminalFn,
    ) -> (Arc<StreamSender>, StreamWriter) {
        let (tx, rx) = bounded(DEFAULT_SEND_QUEUE);
        let sender = Arc::new_cyclic(|me| StreamSender {
            stream_id,
            conn,
            window: SendWindow::new(window),
            rx,
            draining: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            worker,
            on_terminal,
            me: me.clone(),
        });
        let writer = StreamWriter {
            tx,
            sender: Arc::clone(&sender),
            closed: AtomicBool::new(false),
        };
        (sender, writer)
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn window_remaining(&self) -> i64 {
        self.window.remaining()
    }

    /// Apply a FEEDBACK increment; on the exhausted→positive transition
    /// schedule one drain resume on the worker pool.
    pub fn on_feedback(&self, increment: u32) {
        if self.window.add(increment) {
            self.schedule_drain();
        }
    }

    /// Stop sending and discard anything still queued. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblock a producer stuck on a full queue.
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Schedule a drain pass unless one is already running.
    pub fn schedule_drain(&self) {
        let this = match self.me.upgrade() {
            Some(this) => this,
            None => return,
        };
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Err(e) = self.worker.execute(Box::new(move || this.drain())) {
                self.draining.store(false, Ordering::SeqCst);
                warn!("stream {} drain not scheduled: {}", self.stream_id, e);
            }
        }
    }

    fn send_frame(&self, frame: &StreamFrame) -> RpcResult<()> {
        self.conn
            .send(&encode_stream_frame(self.stream_id, frame))
    }

    fn drain(self: Arc<Self>) {
        loop {
            while !self.is_cancelled() && self.window.available() {
                match self.rx.try_recv() {
                    Ok(OutItem::Data(payload)) => {
                        let len = payload.len();
                        if let Err(e) = self.send_frame(&StreamFrame::Data(payload)) {
                            warn!("stream {} data send failed: {}", self.stream_id, e);
                            self.cancel();
                            (self.on_terminal)(self.stream_id);
                            return;
                        }
                        self.window.consume(len);
                    }
                    Ok(OutItem::Close(close)) => {
                        if let Err(e) = self.send_frame(&StreamFrame::Close(close)) {
                            debug!("stream {} close send failed: {}", self.stream_id, e);
                        }
                        self.cancel();
                        (self.on_terminal)(self.stream_id);
                        return;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            self.draining.store(false, Ordering::SeqCst);
            // Re-check after clearing the flag so a producer or feedback
            // racing with the store is not lost.
            let runnable = !self.is_cancelled() && self.window.available() && !self.rx.is_empty();
            if !runnable {
                return;
            }
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
        }
    }
}

/// Producer handle for one outbound stream.
///
/// `send` blocks once the bounded queue fills — the producer is gated by
/// the drain's consumption, which is gated by the peer's credits.
pub struct StreamWriter {
    tx: Sender<OutItem>,
    sender: Arc<StreamSender>,
    closed: AtomicBool,
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("stream_id", &self.sender.stream_id)
            .finish()
    }
}

impl StreamWriter {
    pub fn stream_id(&self) -> u32 {
        self.sender.stream_id
    }

    /// Queue one chunk for transmission.
    pub fn send(&self, payload: Vec<u8>) -> RpcResult<()> {
        if self.sender.is_cancelled() {
            return Err(RpcError::new(
                ErrorCode::ConnectionClosed,
                format!("stream {} cancelled", self.sender.stream_id),
            ));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::new(
                ErrorCode::InvalidArgument,
                format!("stream {} already finished", self.sender.stream_id),
            ));
        }
        self.tx
            .send(OutItem::Data(payload))
            .map_err(|_| RpcError::new(ErrorCode::ConnectionClosed, "stream sender gone"))?;
        self.sender.schedule_drain();
        Ok(())
    }

    fn close_with(&self, close: CloseFrame) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.tx.try_send(OutItem::Close(close)) {
            Ok(()) => self.sender.schedule_drain(),
            Err(TrySendError::Full(item)) => {
                // Queue full: the close must still go out after the data.
                if self.tx.send(item).is_ok() {
                    self.sender.schedule_drain();
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Finish the stream normally: a CLOSE frame follows the queued data.
    pub fn finish(self) {
        self.close_with(CloseFrame::normal_ok());
    }

    /// Finish the stream with an error carried to the peer.
    pub fn fail(self, error: &RpcError) {
        self.close_with(CloseFrame::normal_error(
            error.code().as_i32(),
            error.to_string(),
        ));
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        // A writer dropped without finish()/fail() still closes cleanly.
        self.close_with(CloseFrame::normal_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodeOutcome;
    use crate::plugin::ThreadPoolExecutor;
    use crate::stream::frame::decode_stream_frame;
    use crate::transport::LoopbackConnection;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    struct Harness {
        frames: Arc<Mutex<Vec<(u32, StreamFrame)>>>,
        sender: Arc<StreamSender>,
        writer: StreamWriter,
        pool: Arc<ThreadPoolExecutor>,
    }

    fn harness(window: u32) -> Harness {
        let (conn, peer) = LoopbackConnection::pair();
        let frames = Arc::new(Mutex::new(Vec::new()));
        {
            let frames = Arc::clone(&frames);
            peer.set_receive(Box::new(move |p| {
                if let Ok(DecodeOutcome::Complete(decoded)) = decode_stream_frame(p) {
                    frames.lock().push(decoded);
                }
            }));
        }
        let pool = ThreadPoolExecutor::new(2, 64);
        let (sender, writer) = StreamSender::channel(
            11,
            window,
            conn,
            pool.clone(),
            Box::new(|_| {}),
        );
        // `conn` holds only a Weak reference to its peer half, so the
        // loopback would disconnect the instant `peer` dropped at the end of
        // this helper — before any frame is delivered. Keep the peer half
        // (and its receive callback) alive for the rest of the test process.
        std::mem::forget(peer);
        Harness {
            frames,
            sender,
            writer,
            pool,
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn data_frames(frames: &Mutex<Vec<(u32, StreamFrame)>>) -> usize {
        frames
            .lock()
            .iter()
            .filter(|(_, f)| matches!(f, StreamFrame::Data(_)))
            .count()
    }

    #[test]
    fn test_drain_sends_then_closes() {
        let Harness {
            frames,
            writer,
            pool,
            ..
        } = harness(0);
        writer.send(b"alpha".to_vec()).unwrap();
        writer.send(b"beta".to_vec()).unwrap();
        writer.finish();
        wait_for(|| frames.lock().len() == 3);
        {
            let frames = frames.lock();
            assert!(matches!(frames[0], (11, StreamFrame::Data(ref d)) if d == b"alpha"));
            assert!(matches!(frames[1], (11, StreamFrame::Data(ref d)) if d == b"beta"));
            assert!(matches!(frames[2], (11, StreamFrame::Close(ref c)) if !c.is_reset()));
        }
        pool.shutdown();
    }

    #[test]
    fn test_window_stalls_and_feedback_resumes() {
        let Harness {
            frames,
            sender,
            writer,
            pool,
        } = harness(100);
        // Three 60-byte chunks against a 100-byte window: the first two
        // drain (window goes 100 -> 40 -> -20), the third stalls.
        for _ in 0..3 {
            writer.send(vec![1u8; 60]).unwrap();
        }
        wait_for(|| data_frames(&frames) == 2);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(data_frames(&frames), 2);
        assert!(sender.window_remaining() <= 0);

        // Credit returns: exactly one resume sends the stalled chunk.
        sender.on_feedback(120);
        wait_for(|| data_frames(&frames) == 3);
        pool.shutdown();
    }

    #[test]
    fn test_sent_bytes_never_exceed_window_between_feedbacks() {
        let Harness {
            frames,
            sender,
            writer,
            pool,
        } = harness(100);
        for _ in 0..10 {
            writer.send(vec![2u8; 30]).unwrap();
        }
        // Window 100, chunks of 30: drain sends until remaining <= 0,
        // which allows at most ceil(100/30) = 4 chunks = 120 bytes; the
        // decrement below zero blocks the fifth.
        wait_for(|| data_frames(&frames) == 4);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(data_frames(&frames), 4);
        sender.on_feedback(150);
        wait_for(|| data_frames(&frames) > 4);
        pool.shutdown();
    }

    #[test]
    fn test_cancel_discards_queue() {
        let Harness {
            sender,
            writer,
            pool,
            ..
        } = harness(0);
        sender.cancel();
        let err = writer.send(b"late".to_vec()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectionClosed);
        pool.shutdown();
    }
}
