//! Client IP extraction from HTTP headers with trust validation
//!
//! Beacons usually arrive through a reverse proxy, so the socket address is
//! rarely the client. Headers are only honored when the trust mode says so;
//! otherwise the socket remote address is used as-is.

use axum::http::HeaderMap;
use std::net::IpAddr;

use crate::config::{IngestConfig, TrustedProxyMode};

/// Extract the client IP address according to the trust configuration,
/// falling back to the socket remote address.
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &IngestConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Standard => {
            extract_forwarded(headers).or_else(|| extract_x_forwarded_for(headers, config))
        }
        TrustedProxyMode::None => None,
    }
    .unwrap_or(socket_addr)
}

/// First `for=` parameter of an RFC 7239 `Forwarded` header.
fn extract_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    for element in forwarded.split(',') {
        for param in element.split(';') {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("for=") {
                // Strip quotes, brackets, and a trailing port if present.
                let ip_str = value
                    .trim_matches('"')
                    .trim_start_matches('[')
                    .split(']')
                    .next()
                    .unwrap_or(value)
                    .split(':')
                    .next()
                    .unwrap_or(value);

                if let Ok(ip) = ip_str.parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    None
}

/// X-Forwarded-For with right-to-left trust: skip the configured number of
/// trusted proxies from the right, take the next hop as the client.
fn extract_x_forwarded_for(headers: &HeaderMap, config: &IngestConfig) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    if ips.is_empty() {
        return None;
    }

    if let Some(num_trusted) = config.num_trusted_proxies {
        if ips.len() > num_trusted {
            return Some(ips[ips.len() - num_trusted - 1]);
        }
        // Chain shorter than the trusted depth; fall back to the leftmost.
        return ips.first().copied();
    }

    ips.last().copied()
}
