use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::frames::{FrameError, OutboundFrame};
use super::heartbeat;
use super::outbound::spawn_writer;
use super::router::MessageRouter;
use super::shutdown::{ShutdownCoordinator, ShutdownReason};
use crate::config::GatewayTimings;
use crate::upstream::UpstreamClient;

/// Lifecycle of one client connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// State shared by every activity of one connection.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    state: watch::Sender<SessionState>,
    connected: AtomicBool,
    /// Milliseconds since the epoch.
    last_activity: AtomicI64,
}

impl Session {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Connecting);
        Arc::new(Self {
            id: Uuid::new_v4(),
            state,
            connected: AtomicBool::new(true),
            last_activity: AtomicI64::new(Utc::now().timestamp_millis()),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `next` if it is later than the current state.
    pub fn advance(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or_default()
    }
}

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    pub timings: GatewayTimings,
    pub upstream: UpstreamClient,
    /// Server-wide stop signal; each session listens on a child of it.
    pub server_shutdown: CancellationToken,
}

/// Drive one connection from handshake to close.
///
/// The receive loop runs here; the heartbeat, the writer and any relays run
/// as spawned tasks sharing the session's cancellation token. Returns the
/// reason the session ended.
pub async fn run<Si, St, E>(
    session: Arc<Session>,
    sink: Si,
    mut stream: St,
    ctx: SessionContext,
) -> Option<ShutdownReason>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: fmt::Display + Send,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let shutdown = Arc::new(ShutdownCoordinator::new(
        session.clone(),
        ctx.server_shutdown.child_token(),
        ctx.timings.shutdown_grace,
    ));
    // Siblings stop even if this task unwinds before the teardown below.
    let _cancel_on_exit = shutdown.token().drop_guard();
    let (outbound, writer) = spawn_writer(sink, session.clone(), shutdown.clone());

    // First frame on the queue, so first on the wire.
    let _ = outbound.send(OutboundFrame::ConnectSuccess);
    session.advance(SessionState::Open);
    info!("client connected");

    let heartbeat = tokio::spawn(
        heartbeat::run(
            outbound.clone(),
            session.clone(),
            shutdown.clone(),
            ctx.timings.heartbeat_interval,
        )
        .instrument(tracing::Span::current()),
    );

    let router = MessageRouter::new(outbound.clone(), ctx.upstream.clone(), shutdown.token());
    let mut relays: JoinSet<()> = JoinSet::new();
    let token = shutdown.token();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                shutdown.request(ShutdownReason::CloseRequested);
                break;
            }
            Some(joined) = relays.join_next(), if !relays.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        let detail = "relay task panicked".to_string();
                        warn!("{detail}");
                        let _ = outbound.send(OutboundFrame::ServerError(detail.clone()));
                        shutdown.request(ShutdownReason::Internal(detail));
                        break;
                    }
                }
            }
            next = tokio::time::timeout(ctx.timings.receive_timeout, stream.next()) => {
                let message = match next {
                    // Advisory only; liveness is the heartbeat's job.
                    Err(_) => continue,
                    Ok(None) => {
                        session.mark_disconnected();
                        shutdown.request(ShutdownReason::ClientDisconnected);
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        session.mark_disconnected();
                        shutdown.request(ShutdownReason::TransportError(e.to_string()));
                        break;
                    }
                    Ok(Some(Ok(message))) => message,
                };
                session.touch();

                let routed = match message {
                    Message::Text(text) => router.route(text.as_str(), &mut relays),
                    Message::Binary(_) => router.reject(FrameError::Malformed),
                    Message::Close(_) => {
                        session.mark_disconnected();
                        shutdown.request(ShutdownReason::ClientDisconnected);
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                if let Err(e) = routed {
                    shutdown.request(ShutdownReason::TransportError(e.to_string()));
                    break;
                }
            }
        }
    }

    shutdown.join_task("heartbeat", heartbeat).await;
    shutdown.drain_relays(&mut relays).await;
    drop(router);
    drop(outbound);
    match shutdown.join_task("writer", writer).await {
        Some(mut sink) => shutdown.close_transport(&mut sink).await,
        None => debug!("writer did not return the sink, skipping close"),
    }
    session.advance(SessionState::Closed);

    let reason = shutdown.reason().cloned();
    let last_activity = session.last_activity();
    match &reason {
        Some(reason) => info!(%last_activity, "session closed: {reason}"),
        None => info!(%last_activity, "session closed"),
    }
    reason
}
