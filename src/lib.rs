//! bluewhois - multi-source WHOIS/RDAP resolution for domains and IP addresses
//!
//! Targets are normalized, then resolved through RDAP, port 43 WHOIS and keyed
//! HTTP WHOIS APIs in turn. Whichever source answers first is converted into a
//! single [`CanonicalRecord`] shape and cached.

#[cfg(feature = "http-api")]
pub mod api;
pub mod cache;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod ratelimit;
pub mod rdap;
pub mod store;
pub mod target;
pub mod timestamp;
pub mod types;
#[cfg(feature = "whois")]
pub mod whois;

// Re-export commonly used types
pub use error::{ErrorKind, LookupError, Result};
pub use types::{
    CanonicalRecord, Contact, ContactRole, DnsSummary, EngineConfig, GeoInfo, NetworkInfo,
    Resolution, SourceKind, Target, TargetKind,
};

// Re-export main functionality
pub use engine::{Engine, EngineBuilder, RecordSource};
pub use store::{Clock, FileStore, KvStore, MemoryStore, SystemClock};
pub use target::parse_target;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();
    Ok(())
}
