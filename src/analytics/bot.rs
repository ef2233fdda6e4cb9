//! Bot classification flags computed per event
//!
//! Six independent booleans, not mutually exclusive: a request can set any
//! subset, including UA-true/IP-false or the reverse.

use crate::analytics::ranges::{IpRangeIndex, RangeSource};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BotFlags {
    /// User agent names Googlebot.
    pub ua_googlebot: bool,
    /// User agent names Bingbot.
    pub ua_bingbot: bool,
    /// IP in Google's published crawler ranges.
    pub ip_googlebot: bool,
    /// IP in Google's organization-wide ranges.
    pub ip_google: bool,
    /// IP in Microsoft's published crawler ranges.
    pub ip_bingbot: bool,
    /// IP in Microsoft's organization-wide ranges.
    pub ip_microsoft: bool,
}

impl BotFlags {
    /// Aggregate counter column for each flag, in `as_deltas` order. The
    /// upsert statement binds its bot increments by iterating this fixed
    /// mapping, so the flag set and the column set cannot drift apart.
    pub const COLUMNS: [&'static str; 6] = [
        "bot_ua_googlebot",
        "bot_ua_bingbot",
        "bot_ip_googlebot",
        "bot_ip_google",
        "bot_ip_bingbot",
        "bot_ip_microsoft",
    ];

    pub fn as_deltas(&self) -> [i64; 6] {
        [
            self.ua_googlebot as i64,
            self.ua_bingbot as i64,
            self.ip_googlebot as i64,
            self.ip_google as i64,
            self.ip_bingbot as i64,
            self.ip_microsoft as i64,
        ]
    }

    pub fn any(&self) -> bool {
        self.as_deltas().iter().any(|d| *d > 0)
    }
}

/// Compute all six flags for a request. Each flag is derived independently;
/// no tie-break is applied.
pub fn classify(ranges: &IpRangeIndex, user_agent: &str, ip: &str) -> BotFlags {
    let ua = user_agent.to_lowercase();
    BotFlags {
        ua_googlebot: ua.contains("googlebot"),
        ua_bingbot: ua.contains("bingbot"),
        ip_googlebot: ranges.contains(ip, &[RangeSource::Googlebot]),
        ip_google: ranges.contains(ip, &[RangeSource::Google]),
        ip_bingbot: ranges.contains(ip, &[RangeSource::Bingbot]),
        ip_microsoft: ranges.contains(ip, &[RangeSource::Microsoft]),
    }
}
