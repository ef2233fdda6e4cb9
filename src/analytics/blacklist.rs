//! Request blacklist applied before any persistence
//!
//! Rules are loaded once from configuration and are immutable for the
//! lifetime of the process. A blacklisted request is dropped with no event
//! row and no counter increments.

use std::net::IpAddr;

use ipnet::IpNet;
use tracing::warn;

use crate::analytics::ranges::normalize_ip;
use crate::config::BlacklistConfig;

#[derive(Debug, Default)]
pub struct Blacklist {
    ips: Vec<IpAddr>,
    cidrs: Vec<IpNet>,
    exact_uas: Vec<String>,
    ua_substrings: Vec<String>,
}

impl Blacklist {
    /// Parse the configured rule lists. Unparseable IP or CIDR entries are
    /// logged and skipped rather than failing startup.
    pub fn from_config(config: &BlacklistConfig) -> Self {
        let mut ips = Vec::new();
        for raw in &config.ips {
            match normalize_ip(raw) {
                Some(addr) => ips.push(addr),
                None => warn!(entry = %raw, "skipping unparseable blacklist IP"),
            }
        }

        let mut cidrs = Vec::new();
        for raw in &config.cidrs {
            match raw.trim().parse::<IpNet>() {
                Ok(net) => cidrs.push(net),
                Err(_) => warn!(entry = %raw, "skipping unparseable blacklist CIDR"),
            }
        }

        Self {
            ips,
            cidrs,
            exact_uas: config
                .user_agents
                .iter()
                .map(|ua| ua.trim().to_lowercase())
                .collect(),
            ua_substrings: config
                .ua_substrings
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn is_blacklisted(&self, ip: &str, user_agent: &str) -> bool {
        self.ip_matches(ip) || self.ua_matches(user_agent)
    }

    /// Exact-IP and CIDR matching after folding IPv4-mapped IPv6 addresses,
    /// so both textual representations of the same host are rejected.
    /// Invalid addresses are never blacklisted.
    fn ip_matches(&self, raw: &str) -> bool {
        let Some(addr) = normalize_ip(raw) else {
            return false;
        };
        if self.ips.contains(&addr) {
            return true;
        }
        self.cidrs.iter().any(|net| cidr_contains(net, addr))
    }

    fn ua_matches(&self, user_agent: &str) -> bool {
        if user_agent.is_empty() {
            return false;
        }
        let ua = user_agent.to_lowercase();
        self.exact_uas.iter().any(|exact| *exact == ua)
            || self.ua_substrings.iter().any(|sub| ua.contains(sub.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
            && self.cidrs.is_empty()
            && self.exact_uas.is_empty()
            && self.ua_substrings.is_empty()
    }
}

fn cidr_contains(net: &IpNet, addr: IpAddr) -> bool {
    match (net, addr) {
        (IpNet::V4(n), IpAddr::V4(a)) => n.contains(&a),
        (IpNet::V6(n), IpAddr::V6(a)) => n.contains(&a),
        // The address is normalized to IPv4 when mapped, so a blacklisted
        // IPv6 block must still catch its mapped form.
        (IpNet::V6(n), IpAddr::V4(a)) => n.contains(&a.to_ipv6_mapped()),
        (IpNet::V4(n), IpAddr::V6(a)) => a
            .to_ipv4_mapped()
            .map(|mapped| n.contains(&mapped))
            .unwrap_or(false),
    }
}
