//! Client IP extraction from proxy forwarding headers.

use http::HeaderMap;
use std::net::SocketAddr;

/// Determine the client IP for a request, trying sources in priority order:
/// the first entry of `x-forwarded-for`, then `x-real-ip`, then the
/// connection's remote address (without the port). Missing, empty, or
/// non-UTF-8 header values fall through to the next source; this never fails.
pub fn extract_client_ip(headers: &HeaderMap, remote_addr: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        // The client is the first entry; later entries are proxies
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return first.to_owned();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_owned();
        }
    }

    remote_addr.ip().to_string()
}
