//! WebSocket gateway fronting the streaming inference service.
//!
//! Each connection is a [`session::Session`] driven by [`session::run`]:
//! the receive loop feeds the [`router`], which answers directly or starts a
//! [`relay`]; the [`heartbeat`] pulses independently; all outbound frames go
//! through one writer ([`outbound`]); [`shutdown`] tears everything down once.

pub mod frames;
pub mod heartbeat;
pub mod outbound;
pub mod relay;
pub mod router;
pub mod session;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::StreamExt;
use tracing::Instrument;

use crate::state::AppState;
use session::{Session, SessionContext};

pub const GATEWAY_PATH: &str = "/ws/dify";

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let ctx = state.session_context();
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: SessionContext) {
    let session = Session::new();
    let span = tracing::info_span!("session", id = %session.id);
    let (sink, stream) = socket.split();
    session::run(session, sink, stream, ctx).instrument(span).await;
}
