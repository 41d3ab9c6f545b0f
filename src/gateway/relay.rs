use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frames::{BusinessRequest, OutboundFrame};
use super::outbound::{Outbound, OutboundClosed};
use crate::upstream::{LineBuffer, UpstreamClient, UpstreamError};

enum RelayError {
    Upstream(UpstreamError),
    ClientGone,
}

impl From<UpstreamError> for RelayError {
    fn from(e: UpstreamError) -> Self {
        RelayError::Upstream(e)
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Upstream(UpstreamError::Http(e))
    }
}

impl From<OutboundClosed> for RelayError {
    fn from(_: OutboundClosed) -> Self {
        RelayError::ClientGone
    }
}

/// Stream one upstream answer back to the client.
///
/// Ends with exactly one of the completion status or an upstream error
/// frame, unless the session is torn down first. Cancellation drops the
/// in-flight response, which releases the upstream connection.
pub async fn run(
    request: BusinessRequest,
    upstream: UpstreamClient,
    outbound: Outbound,
    token: CancellationToken,
) {
    let target = upstream.endpoint(&request.resm);
    info!("relaying request to {target}");

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("relay to {target} cancelled");
            return;
        }
        result = stream_answer(&request, &upstream, &outbound) => result,
    };

    let frame = match result {
        Ok(lines) => {
            info!("relay to {target} complete, {lines} line(s) forwarded");
            OutboundFrame::StreamComplete
        }
        Err(RelayError::Upstream(e)) => {
            warn!("relay to {target} failed: {e}");
            OutboundFrame::UpstreamFailed(e.to_string())
        }
        Err(RelayError::ClientGone) => {
            debug!("relay to {target} stopped, client gone");
            return;
        }
    };
    let _ = outbound.send(frame);
}

async fn stream_answer(
    request: &BusinessRequest,
    upstream: &UpstreamClient,
    outbound: &Outbound,
) -> Result<usize, RelayError> {
    let response = upstream.open_stream(request).await?;
    let mut body = response.bytes_stream();
    let mut lines = LineBuffer::new();
    let mut forwarded = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for line in lines.push(&chunk) {
            forwarded += forward(outbound, &line)?;
        }
    }
    if let Some(line) = lines.finish() {
        forwarded += forward(outbound, &line)?;
    }

    Ok(forwarded)
}

fn forward(outbound: &Outbound, line: &str) -> Result<usize, OutboundClosed> {
    match OutboundFrame::answer(line) {
        Some(frame) => {
            outbound.send(frame)?;
            Ok(1)
        }
        None => Ok(0),
    }
}
