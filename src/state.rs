use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, GatewayTimings};
use crate::gateway::session::SessionContext;
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub timings: GatewayTimings,
    pub upstream: UpstreamClient,
    /// Peer allow-list for the gateway route. Empty admits everyone.
    pub allowed_ips: Arc<HashSet<IpAddr>>,
    /// Cancelled when the server stops; open sessions close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            timings: config.timings,
            upstream: UpstreamClient::new(
                &config.upstream_base_url,
                config.timings.upstream_timeout,
            ),
            allowed_ips: Arc::new(config.allowed_ips.clone()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            timings: self.timings,
            upstream: self.upstream.clone(),
            server_shutdown: self.shutdown.clone(),
        }
    }
}
