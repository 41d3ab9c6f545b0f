//! Single teardown path for a gateway session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{Session, SessionState};

/// Transport error texts that only mean the peer already went away.
const SEND_AFTER_CLOSE: &[&str] = &[
    "Sending after closing is not allowed",
    "Trying to work with closed connection",
    "Connection closed normally",
];

/// Why a session left `Open`.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    ClientDisconnected,
    TransportError(String),
    HeartbeatFailed,
    Internal(String),
    CloseRequested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::ClientDisconnected => write!(f, "client disconnected"),
            ShutdownReason::TransportError(e) => write!(f, "transport error: {e}"),
            ShutdownReason::HeartbeatFailed => write!(f, "heartbeat send failed"),
            ShutdownReason::Internal(e) => write!(f, "internal error: {e}"),
            ShutdownReason::CloseRequested => write!(f, "close requested"),
        }
    }
}

/// Cancels a session's activities and closes its transport exactly once.
pub struct ShutdownCoordinator {
    session: Arc<Session>,
    token: CancellationToken,
    reason: OnceLock<ShutdownReason>,
    transport_closed: AtomicBool,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(session: Arc<Session>, token: CancellationToken, grace: Duration) -> Self {
        Self {
            session,
            token,
            reason: OnceLock::new(),
            transport_closed: AtomicBool::new(false),
            grace,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason recorded by the first shutdown request.
    pub fn reason(&self) -> Option<&ShutdownReason> {
        self.reason.get()
    }

    /// Begin teardown. Only the first call has any effect; it returns `true`.
    pub fn request(&self, reason: ShutdownReason) -> bool {
        if let Err(reason) = self.reason.set(reason) {
            debug!("shutdown already requested, ignoring: {reason}");
            return false;
        }
        if let Some(reason) = self.reason.get() {
            info!("session closing: {reason}");
        }
        self.session.advance(SessionState::Closing);
        self.token.cancel();
        true
    }

    /// Wait up to the grace period for a cancelled task, aborting it after.
    pub async fn join_task<T>(&self, name: &str, handle: JoinHandle<T>) -> Option<T> {
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.grace, handle).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                log_join_error(name, &e);
                None
            }
            Err(_) => {
                warn!("{name} task did not stop within {:?}, aborting", self.grace);
                abort.abort();
                None
            }
        }
    }

    /// Wait for every in-flight relay, aborting stragglers after the grace period.
    pub async fn drain_relays(&self, relays: &mut JoinSet<()>) {
        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = relays.join_next().await {
                if let Err(e) = joined {
                    log_join_error("relay", &e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} relay(s) still running after {:?}, aborting",
                relays.len(),
                self.grace
            );
            relays.abort_all();
            while relays.join_next().await.is_some() {}
        }
    }

    /// Close the transport if it is still connected. Repeat calls are no-ops.
    pub async fn close_transport<Si>(&self, sink: &mut Si)
    where
        Si: Sink<Message> + Unpin,
        Si::Error: fmt::Display,
    {
        if self.transport_closed.swap(true, Ordering::SeqCst) {
            debug!("transport close already performed");
            return;
        }

        if self.session.is_connected() {
            match sink.close().await {
                Ok(()) => info!("connection closed"),
                Err(e) => {
                    let msg = e.to_string();
                    if is_send_after_close(&msg) {
                        debug!("connection already closed, ignoring: {msg}");
                    } else {
                        warn!("failed to close connection: {msg}");
                    }
                }
            }
            self.session.mark_disconnected();
        } else {
            debug!("connection already closed, nothing to do");
        }

        self.session.advance(SessionState::Closed);
    }
}

fn log_join_error(name: &str, e: &JoinError) {
    if e.is_cancelled() {
        debug!("{name} task cancelled");
    } else {
        warn!("{name} task failed: {e}");
    }
}

pub fn is_send_after_close(msg: &str) -> bool {
    SEND_AFTER_CLOSE.iter().any(|needle| msg.contains(needle))
}
