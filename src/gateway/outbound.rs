use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::frames::OutboundFrame;
use super::session::Session;
use super::shutdown::{ShutdownCoordinator, ShutdownReason};

/// The writer task has exited; nothing more can reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundClosed;

impl fmt::Display for OutboundClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outbound queue closed")
    }
}

/// Cloneable handle onto a session's single outbound queue.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl Outbound {
    /// A bare queue; the receiver side belongs to whoever writes the frames.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, frame: OutboundFrame) -> Result<(), OutboundClosed> {
        self.tx.send(frame).map_err(|_| OutboundClosed)
    }
}

/// Spawn the task that owns the sink. Every frame the session emits passes
/// through it, so frames never interleave. The sink is handed back when the
/// task ends so teardown can close it.
pub fn spawn_writer<Si>(
    sink: Si,
    session: Arc<Session>,
    shutdown: Arc<ShutdownCoordinator>,
) -> (Outbound, JoinHandle<Si>)
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: fmt::Display + Send,
{
    let (outbound, rx) = Outbound::channel();
    let handle = tokio::spawn(
        write_loop(sink, rx, session, shutdown).instrument(tracing::Span::current()),
    );
    (outbound, handle)
}

async fn write_loop<Si>(
    mut sink: Si,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    session: Arc<Session>,
    shutdown: Arc<ShutdownCoordinator>,
) -> Si
where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display,
{
    let token = shutdown.token();
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if !deliver(&mut sink, frame, &session, &shutdown).await {
            return sink;
        }
    }

    // Closing: flush what was queued before the close, then stop accepting.
    rx.close();
    while session.is_connected() {
        let Ok(frame) = rx.try_recv() else { break };
        if !deliver(&mut sink, frame, &session, &shutdown).await {
            break;
        }
    }
    sink
}

async fn deliver<Si>(
    sink: &mut Si,
    frame: OutboundFrame,
    session: &Session,
    shutdown: &ShutdownCoordinator,
) -> bool
where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display,
{
    match sink.send(Message::Text(frame.to_string().into())).await {
        Ok(()) => {
            session.touch();
            true
        }
        Err(e) => {
            tracing::debug!("send failed: {e}");
            session.mark_disconnected();
            shutdown.request(ShutdownReason::TransportError(e.to_string()));
            false
        }
    }
}
