use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;

/// Admit only peers whose IP is in the configured allow-list.
///
/// An empty list admits everyone. With a non-empty list, a request whose
/// peer address is unknown is refused.
pub async fn allow_list_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if !is_allowed(&state.allowed_ips, peer) {
        match peer {
            Some(ip) => tracing::warn!("rejected gateway connection from {ip}"),
            None => tracing::warn!("rejected gateway connection with unknown peer address"),
        }
        return AppError::Forbidden("address not allowed".to_string()).into_response();
    }

    next.run(req).await
}

pub fn is_allowed(allowed: &HashSet<IpAddr>, peer: Option<IpAddr>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    peer.is_some_and(|ip| allowed.contains(&ip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_list_admits_everyone() {
        let allowed = HashSet::new();
        assert!(is_allowed(&allowed, Some(ip("203.0.113.9"))));
        assert!(is_allowed(&allowed, None));
    }

    #[test]
    fn test_listed_peer_admitted() {
        let allowed: HashSet<IpAddr> = [ip("127.0.0.1"), ip("::1")].into_iter().collect();
        assert!(is_allowed(&allowed, Some(ip("127.0.0.1"))));
        assert!(is_allowed(&allowed, Some(ip("::1"))));
    }

    #[test]
    fn test_unlisted_or_unknown_peer_refused() {
        let allowed: HashSet<IpAddr> = [ip("127.0.0.1")].into_iter().collect();
        assert!(!is_allowed(&allowed, Some(ip("10.0.0.7"))));
        assert!(!is_allowed(&allowed, None));
    }
}
