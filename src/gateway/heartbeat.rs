use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::frames::OutboundFrame;
use super::outbound::Outbound;
use super::session::Session;
use super::shutdown::{ShutdownCoordinator, ShutdownReason};

/// Send `[HEARTBEAT] PONG` every `interval` until the session stops.
///
/// Never tears the connection down itself: a failed send only asks the
/// coordinator to shut down.
pub async fn run(
    outbound: Outbound,
    session: Arc<Session>,
    shutdown: Arc<ShutdownCoordinator>,
    interval: Duration,
) {
    let token = shutdown.token();
    info!("heartbeat started");

    loop {
        if shutdown.is_shutting_down() {
            debug!("heartbeat: cancellation observed, stopping");
            break;
        }
        if !session.is_connected() {
            debug!("heartbeat: connection gone, stopping");
            break;
        }
        if let Err(e) = outbound.send(OutboundFrame::Pong) {
            warn!("heartbeat send failed: {e}");
            shutdown.request(ShutdownReason::HeartbeatFailed);
            break;
        }

        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
