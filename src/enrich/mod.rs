//! Best-effort data attached after a source answers. Enrichment failures never
//! fail a resolution.

pub mod dns;
pub mod geo;

pub use dns::{DnsProbe, HickoryDnsProbe};
pub use geo::{locate_with_fallback, merge_geo, GeoLocator, IpSbLocator, IpWhoLocator};
