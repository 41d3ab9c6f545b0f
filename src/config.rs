use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://myaitest.miyingbl.com/v1/";

/// Durations that drive a single gateway session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatewayTimings {
    /// Cadence of the `[HEARTBEAT] PONG` pulse.
    pub heartbeat_interval: Duration,
    /// Bounded wait for the next inbound frame. Expiry is a no-op.
    pub receive_timeout: Duration,
    /// Overall deadline for one upstream request, body included.
    pub upstream_timeout: Duration,
    /// How long teardown waits for cancelled activities before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for GatewayTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            receive_timeout: Duration::from_secs(35),
            upstream_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(5000),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub upstream_base_url: String,
    pub timings: GatewayTimings,
    pub allowed_ips: HashSet<IpAddr>,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = GatewayTimings::default();

        let timings = GatewayTimings {
            heartbeat_interval: env_u64("GATEWAY_HEARTBEAT_INTERVAL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            receive_timeout: env_u64("GATEWAY_RECEIVE_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.receive_timeout),
            upstream_timeout: env_u64("GATEWAY_UPSTREAM_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            shutdown_grace: env_u64("GATEWAY_SHUTDOWN_GRACE")
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),
        };

        let allowed_ips = std::env::var("GATEWAY_ALLOWED_IPS")
            .map(|v| parse_ip_list(&v))
            .unwrap_or_default();

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            upstream_base_url: std::env::var("DIFY_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE_URL.to_string()),
            timings,
            allowed_ips,
        }
    }
}

/// Positive integer from the environment. Zero counts as unset.
fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|n| *n > 0)
}

/// Parse a comma-separated list of IP addresses, skipping blanks and junk.
pub fn parse_ip_list(raw: &str) -> HashSet<IpAddr> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!("ignoring invalid allow-list entry {s:?}");
                None
            }
        })
        .collect()
}
