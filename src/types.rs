//! Core types and structures for bluewhois

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::timestamp::record_format;

/// Kind of lookup target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Domain,
    Ipv4,
    Ipv6,
}

impl TargetKind {
    pub fn is_ip(&self) -> bool {
        matches!(self, TargetKind::Ipv4 | TargetKind::Ipv6)
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Domain => write!(f, "domain"),
            TargetKind::Ipv4 => write!(f, "ipv4"),
            TargetKind::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// A normalized, validated lookup target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub value: String,
    pub kind: TargetKind,
}

impl Target {
    /// Last label of a domain target, `None` for IPs
    pub fn tld(&self) -> Option<&str> {
        match self.kind {
            TargetKind::Domain => self.value.rsplit('.').next(),
            _ => None,
        }
    }

    /// Parsed address for IP targets
    pub fn ip(&self) -> Option<std::net::IpAddr> {
        if self.kind.is_ip() {
            self.value.parse().ok()
        } else {
            None
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// Which kind of source produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rdap,
    Whois,
    WhoApi,
    WhoisXml,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Rdap => write!(f, "rdap"),
            SourceKind::Whois => write!(f, "whois"),
            SourceKind::WhoApi => write!(f, "whoapi"),
            SourceKind::WhoisXml => write!(f, "whoisxml"),
        }
    }
}

/// Role a contact plays for the registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactRole {
    Registrant,
    Admin,
    Tech,
    Billing,
    Registrar,
    Abuse,
}

impl ContactRole {
    /// Map the role vocabulary used by RDAP, WHOIS text and the HTTP APIs
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "registrant" | "owner" | "holder" => Some(Self::Registrant),
            "administrative" | "admin" | "admin-c" => Some(Self::Admin),
            "technical" | "tech" | "tech-c" => Some(Self::Tech),
            "billing" | "billing-c" => Some(Self::Billing),
            "registrar" | "sponsoring registrar" => Some(Self::Registrar),
            "abuse" => Some(Self::Abuse),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContactRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactRole::Registrant => write!(f, "registrant"),
            ContactRole::Admin => write!(f, "admin"),
            ContactRole::Tech => write!(f, "tech"),
            ContactRole::Billing => write!(f, "billing"),
            ContactRole::Registrar => write!(f, "registrar"),
            ContactRole::Abuse => write!(f, "abuse"),
        }
    }
}

/// A registration contact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub role: ContactRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Contact {
    pub fn new(role: ContactRole) -> Self {
        Self {
            role,
            name: None,
            organization: None,
            email: None,
            phone: None,
            country: None,
        }
    }

    /// A contact with no populated field carries no information
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.organization.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.country.is_none()
    }
}

/// Network block details for IP targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_organization: Option<String>,
}

/// IP geolocation details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub provider: String,
}

/// DNS records observed for a domain at lookup time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsSummary {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub a: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aaaa: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cname: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mx: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub txt: Vec<String>,
}

impl DnsSummary {
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
            && self.aaaa.is_empty()
            && self.cname.is_empty()
            && self.mx.is_empty()
            && self.ns.is_empty()
            && self.txt.is_empty()
    }
}

/// The unified result of a resolution, independent of which source answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub target: String,
    pub kind: TargetKind,
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar_iana_id: Option<String>,
    #[serde(default, with = "record_format", skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "record_format", skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, with = "record_format", skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub source: SourceKind,
    pub server: String,
    /// Port 43 server the registry advertises, when the source reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whois_server: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_chain: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsSummary>,
}

impl CanonicalRecord {
    /// Start an empty record for a target, answered by `server`
    pub fn new(target: &Target, source: SourceKind, server: impl Into<String>) -> Self {
        Self {
            target: target.value.clone(),
            kind: target.kind,
            registered: true,
            registrar: None,
            registrar_iana_id: None,
            created: None,
            updated: None,
            expires: None,
            status: Vec::new(),
            nameservers: Vec::new(),
            contacts: Vec::new(),
            raw: None,
            source,
            server: server.into(),
            whois_server: None,
            query_chain: Vec::new(),
            attempts: Vec::new(),
            network: None,
            geo: None,
            dns: None,
        }
    }

    /// Append status values, skipping duplicates
    pub fn push_status(&mut self, value: &str) {
        let value = value.trim();
        if !value.is_empty() && !self.status.iter().any(|s| s.eq_ignore_ascii_case(value)) {
            self.status.push(value.to_string());
        }
    }

    /// Copy without the raw upstream text, for compact output
    pub fn without_raw(&self) -> Self {
        Self {
            raw: None,
            ..self.clone()
        }
    }
}

/// Filter placeholder or malformed nameserver entries, lowercase and deduplicate in order
pub fn clean_nameservers<I, S>(nameservers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cleaned: Vec<String> = Vec::new();
    for ns in nameservers {
        let ns = ns.as_ref().trim().to_lowercase();
        let ns = ns.trim_end_matches('.');
        if ns.is_empty() || matches!(ns, "not.defined" | "undefined" | "null") {
            continue;
        }
        if !ns.contains('.') {
            continue;
        }
        if !cleaned.iter().any(|existing| existing == ns) {
            cleaned.push(ns.to_string());
        }
    }
    cleaned
}

/// Outcome handed back to callers of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub record: CanonicalRecord,
    pub from_cache: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub cached_at: DateTime<Utc>,
}

/// Configuration for the resolution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for cache entries, bootstrap tables and rate windows; `None` keeps state in memory
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub bootstrap_ttl: Duration,
    pub iana_discovery_ttl: Duration,
    pub rdap_timeout: Duration,
    pub whois_timeout: Duration,
    pub iana_timeout: Duration,
    pub http_api_timeout: Duration,
    pub geo_timeout: Duration,
    pub dns_timeout: Duration,
    /// Outer wall-clock budget for one resolution
    pub resolve_timeout: Duration,
    /// Resolutions allowed in flight at once
    pub concurrent_resolutions: usize,
    pub enable_dns_summary: bool,
    pub enable_geo: bool,
    pub rate_limit_bucket: String,
    pub rate_limit_window_secs: u64,
    pub rate_limit: usize,
    pub whoapi_key: Option<String>,
    pub whoisxml_api_key: Option<String>,
    pub bootstrap_base_url: String,
    pub whoapi_endpoint: String,
    pub whoisxml_endpoint: String,
    pub geo_primary_url: String,
    pub geo_secondary_url: String,
    pub iana_whois_server: String,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_ttl: Duration::from_secs(3600),
            bootstrap_ttl: Duration::from_secs(24 * 60 * 60),
            iana_discovery_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            rdap_timeout: Duration::from_secs(30),
            whois_timeout: Duration::from_secs(15),
            iana_timeout: Duration::from_secs(12),
            http_api_timeout: Duration::from_secs(30),
            geo_timeout: Duration::from_secs(12),
            dns_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(35),
            concurrent_resolutions: 8,
            enable_dns_summary: true,
            enable_geo: true,
            rate_limit_bucket: "api".to_string(),
            rate_limit_window_secs: 10,
            rate_limit: 8,
            whoapi_key: None,
            whoisxml_api_key: None,
            bootstrap_base_url: "https://data.iana.org/rdap".to_string(),
            whoapi_endpoint: "https://api.whoapi.com/".to_string(),
            whoisxml_endpoint: "https://www.whoisxmlapi.com/whoisserver/WhoisService".to_string(),
            geo_primary_url: "https://api.ip.sb/geoip".to_string(),
            geo_secondary_url: "https://ipwho.is".to_string(),
            iana_whois_server: "whois.iana.org".to_string(),
            user_agent: concat!("bluewhois/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from the process environment (after loading `.env`)
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = non_empty("BLUEWHOIS_CACHE_DIR") {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(ttl) = non_empty("BLUEWHOIS_CACHE_TTL").and_then(|v| v.parse::<u64>().ok()) {
            config.cache_ttl = Duration::from_secs(ttl);
        }
        config.whoapi_key = non_empty("WHOAPI_KEY");
        config.whoisxml_api_key = non_empty("WHOISXML_API_KEY");
        if let Some(endpoint) = non_empty("WHOISXML_API_ENDPOINT") {
            config.whoisxml_endpoint = endpoint;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_nameservers() {
        let cleaned = clean_nameservers(vec![
            "NS1.Example.COM.",
            "ns1.example.com",
            "not.defined.",
            "undefined",
            "localhost",
            "",
            "ns2.example.com",
        ]);
        assert_eq!(cleaned, vec!["ns1.example.com", "ns2.example.com"]);
    }

    #[test]
    fn test_contact_role_labels() {
        assert_eq!(ContactRole::from_label("Administrative"), Some(ContactRole::Admin));
        assert_eq!(ContactRole::from_label("technical"), Some(ContactRole::Tech));
        assert_eq!(ContactRole::from_label("sponsor"), None);
    }

    #[test]
    fn test_record_omits_absent_fields() {
        let target = Target {
            value: "example.com".to_string(),
            kind: TargetKind::Domain,
        };
        let record = CanonicalRecord::new(&target, SourceKind::Rdap, "rdap.example");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("registrar").is_none());
        assert!(json.get("created").is_none());
        assert!(json.get("nameservers").is_none());
        assert_eq!(json["source"], "rdap");
    }

    #[test]
    fn test_config_from_lookup() {
        let config = EngineConfig::from_lookup(|key| match key {
            "WHOISXML_API_KEY" => Some("  secret ".to_string()),
            "WHOAPI_KEY" => Some("   ".to_string()),
            "BLUEWHOIS_CACHE_TTL" => Some("60".to_string()),
            _ => None,
        });
        assert_eq!(config.whoisxml_api_key.as_deref(), Some("secret"));
        assert!(config.whoapi_key.is_none());
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
    }
}
