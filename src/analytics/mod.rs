//! Beacon analytics engine
//!
//! Everything between an inbound beacon and the daily aggregate rows lives
//! here: the immutable IP range index, the blacklist filter, the bot
//! classifier, beacon payload normalization, and the ingestion engine that
//! ties them to the event store.

pub mod beacon;
pub mod blacklist;
pub mod bot;
pub mod ingest;
pub mod ip;
pub mod models;
pub mod ranges;
pub mod stats;

pub use blacklist::Blacklist;
pub use bot::{classify, BotFlags};
pub use ingest::{AnalyticsContext, IngestOutcome, Ingestor};
pub use ranges::{IpRangeIndex, RangeSource};
