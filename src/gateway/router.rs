use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use super::frames::{parse_inbound, FrameError, InboundFrame, OutboundFrame};
use super::outbound::{Outbound, OutboundClosed};
use super::relay;
use crate::upstream::UpstreamClient;

/// What the router did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    HeartbeatAnswered,
    Rejected(FrameError),
    RelayStarted,
}

/// Classifies inbound frames and answers or hands them to a relay.
pub struct MessageRouter {
    outbound: Outbound,
    upstream: UpstreamClient,
    token: CancellationToken,
}

impl MessageRouter {
    pub fn new(outbound: Outbound, upstream: UpstreamClient, token: CancellationToken) -> Self {
        Self {
            outbound,
            upstream,
            token,
        }
    }

    /// Handle one text frame. Business requests are spawned into `relays`
    /// and never awaited here, so a client may have several in flight.
    pub fn route(
        &self,
        text: &str,
        relays: &mut JoinSet<()>,
    ) -> Result<RouteOutcome, OutboundClosed> {
        let request = match parse_inbound(text) {
            Ok(InboundFrame::Heartbeat) => {
                self.outbound.send(OutboundFrame::Pong)?;
                debug!("client ping answered");
                return Ok(RouteOutcome::HeartbeatAnswered);
            }
            Ok(InboundFrame::Business(request)) => request,
            Err(e) => return self.reject(e),
        };

        self.outbound.send(OutboundFrame::RequestAccepted)?;
        relays.spawn(
            relay::run(
                request,
                self.upstream.clone(),
                self.outbound.clone(),
                self.token.clone(),
            )
            .instrument(tracing::Span::current()),
        );
        Ok(RouteOutcome::RelayStarted)
    }

    /// Answer a frame that failed parsing or validation. The session stays open.
    pub fn reject(&self, error: FrameError) -> Result<RouteOutcome, OutboundClosed> {
        match error {
            FrameError::Malformed => debug!("malformed frame from client"),
            FrameError::MissingParams => warn!("client sent a request without resm or data"),
        }
        self.outbound.send(error.reply())?;
        Ok(RouteOutcome::Rejected(error))
    }
}
