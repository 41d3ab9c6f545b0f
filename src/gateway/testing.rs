//! In-memory transport halves for exercising sessions without a socket.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{stream, Sink, Stream};
use tokio::sync::mpsc;

/// Sink that records text frames and counts close calls.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every send fails like a dropped connection.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Sink<Message> for RecordingSink {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        if let Message::Text(text) = item {
            self.frames.lock().unwrap().push(text.as_str().to_string());
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

pub type InboundStream = Pin<Box<dyn Stream<Item = Result<Message, io::Error>> + Send>>;

/// Inbound half fed through a channel. Dropping the sender ends the stream.
pub fn channel_stream() -> (mpsc::UnboundedSender<Result<Message, io::Error>>, InboundStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    });
    (tx, Box::pin(stream))
}

/// Poll until the sink holds at least `count` frames.
pub async fn wait_for_frames(sink: &RecordingSink, count: usize) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let frames = sink.frames();
        if frames.len() >= count {
            return frames;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} frames, got {frames:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
