//! Immutable IP range index for crawler and organization range lookups
//!
//! The index is built once at startup from a pre-normalized runtime range
//! document (the output of an external registry conversion step) and is never
//! mutated afterwards, so concurrent readers need no synchronization.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use serde::Deserialize;
use thiserror::Error;

/// Which published list a range came from.
///
/// Crawler tags (`Googlebot`, `Bingbot`) cover the narrowly-published
/// crawler ranges; `Google` and `Microsoft` cover the organization-wide
/// address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeSource {
    Googlebot,
    Google,
    Bingbot,
    Microsoft,
}

#[derive(Debug, Error)]
pub enum RangeError {
    #[error("failed to read range file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse range file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid CIDR prefix '{0}'")]
    InvalidPrefix(String),
}

/// One entry of the runtime range document: a source tag plus its
/// already-normalized CIDR prefixes (IPv4 and IPv6 mixed).
#[derive(Debug, Clone, Deserialize)]
pub struct RangeDocument {
    pub tag: RangeSource,
    pub prefixes: Vec<String>,
}

/// An IPv4 range with precomputed 32-bit bounds.
#[derive(Debug, Clone)]
pub struct Ipv4Range {
    pub cidr: Ipv4Net,
    pub start: u32,
    pub end: u32,
    pub sources: Vec<RangeSource>,
}

impl Ipv4Range {
    fn matches(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.cidr.netmask());
        (u32::from(addr) & mask) == (u32::from(self.cidr.network()) & mask)
    }
}

/// An IPv6 range identified by CIDR and prefix length.
#[derive(Debug, Clone)]
pub struct Ipv6Range {
    pub cidr: Ipv6Net,
    pub prefix_len: u8,
    pub sources: Vec<RangeSource>,
}

impl Ipv6Range {
    fn matches(&self, addr: Ipv6Addr) -> bool {
        let mask = if self.prefix_len == 0 {
            0u128
        } else {
            u128::MAX << (128 - u32::from(self.prefix_len))
        };
        (u128::from(addr) & mask) == (u128::from(self.cidr.network()) & mask)
    }
}

/// Process-lifetime range index. A few thousand entries at most, so
/// containment is a linear scan.
#[derive(Debug, Default)]
pub struct IpRangeIndex {
    v4: Vec<Ipv4Range>,
    v6: Vec<Ipv6Range>,
}

impl IpRangeIndex {
    /// Load and build the index from a runtime range document on disk.
    pub fn from_file(path: &str) -> Result<Self, RangeError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RangeError::Io {
            path: path.to_string(),
            source,
        })?;
        let docs: Vec<RangeDocument> =
            serde_json::from_str(&raw).map_err(|source| RangeError::Parse {
                path: path.to_string(),
                source,
            })?;
        Self::build(&docs)
    }

    /// Build the index from per-source prefix lists, deduplicating by exact
    /// CIDR and merging source tags on collision.
    pub fn build(docs: &[RangeDocument]) -> Result<Self, RangeError> {
        let mut index = Self::default();
        for doc in docs {
            for prefix in &doc.prefixes {
                index.add(prefix, doc.tag)?;
            }
        }
        Ok(index)
    }

    fn add(&mut self, prefix: &str, tag: RangeSource) -> Result<(), RangeError> {
        if let Ok(net) = prefix.parse::<Ipv4Net>() {
            match self.v4.iter_mut().find(|r| r.cidr == net) {
                Some(existing) => merge_tag(&mut existing.sources, tag),
                None => self.v4.push(Ipv4Range {
                    cidr: net,
                    start: u32::from(net.network()),
                    end: u32::from(net.broadcast()),
                    sources: vec![tag],
                }),
            }
            return Ok(());
        }
        if let Ok(net) = prefix.parse::<Ipv6Net>() {
            match self.v6.iter_mut().find(|r| r.cidr == net) {
                Some(existing) => merge_tag(&mut existing.sources, tag),
                None => self.v6.push(Ipv6Range {
                    cidr: net,
                    prefix_len: net.prefix_len(),
                    sources: vec![tag],
                }),
            }
            return Ok(());
        }
        Err(RangeError::InvalidPrefix(prefix.to_string()))
    }

    /// Whether `ip` falls in any range carrying one of the `filter` tags.
    /// An empty filter matches any source. Invalid addresses are never
    /// contained.
    pub fn contains(&self, ip: &str, filter: &[RangeSource]) -> bool {
        let Some(addr) = normalize_ip(ip) else {
            return false;
        };
        match addr {
            IpAddr::V4(v4) => self
                .v4
                .iter()
                .any(|r| tag_match(&r.sources, filter) && r.matches(v4)),
            IpAddr::V6(v6) => self
                .v6
                .iter()
                .any(|r| tag_match(&r.sources, filter) && r.matches(v6)),
        }
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    #[cfg(test)]
    fn v4_ranges(&self) -> &[Ipv4Range] {
        &self.v4
    }
}

fn merge_tag(sources: &mut Vec<RangeSource>, tag: RangeSource) {
    if !sources.contains(&tag) {
        sources.push(tag);
        sources.sort();
    }
}

fn tag_match(sources: &[RangeSource], filter: &[RangeSource]) -> bool {
    filter.is_empty() || sources.iter().any(|s| filter.contains(s))
}

/// Parse an address string, folding IPv4-mapped IPv6 into plain IPv4 so both
/// textual representations of the same host compare identically.
pub fn normalize_ip(raw: &str) -> Option<IpAddr> {
    let addr: IpAddr = raw.trim().parse().ok()?;
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => Some(IpAddr::V4(v4)),
            None => Some(addr),
        },
        v4 => Some(v4),
    }
}
