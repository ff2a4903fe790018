//! IANA RDAP bootstrap tables (RFC 9224): which RDAP servers answer for a
//! domain suffix or an address block.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::error::{LookupError, Result};
use crate::store::{is_fresh, Clock, KvStore};
use crate::target::suffix_chain;
use crate::types::TargetKind;

const STORE_PREFIX: &str = "bootstrap:v1:";

/// Which bootstrap file a table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootstrapCategory {
    Dns,
    Ipv4,
    Ipv6,
}

impl BootstrapCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapCategory::Dns => "dns",
            BootstrapCategory::Ipv4 => "ipv4",
            BootstrapCategory::Ipv6 => "ipv6",
        }
    }

    pub fn for_kind(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Domain => BootstrapCategory::Dns,
            TargetKind::Ipv4 => BootstrapCategory::Ipv4,
            TargetKind::Ipv6 => BootstrapCategory::Ipv6,
        }
    }

    fn store_key(&self) -> String {
        format!("{STORE_PREFIX}{}", self.as_str())
    }
}

impl std::fmt::Display for BootstrapCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `[[keys], [urls]]` service entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapService {
    pub keys: Vec<String>,
    pub urls: Vec<String>,
}

/// A parsed bootstrap file plus when we fetched it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapTable {
    pub category: BootstrapCategory,
    pub fetched_at: DateTime<Utc>,
    pub services: Vec<BootstrapService>,
}

impl BootstrapTable {
    /// Parse the IANA JSON document. A body without a `services` array is an error,
    /// never an empty table. Malformed individual entries are skipped.
    pub fn from_iana_json(
        category: BootstrapCategory,
        body: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self> {
        let doc: Value = serde_json::from_str(body).map_err(|e| {
            LookupError::parse(format!("{category} bootstrap is not JSON: {e}"), None)
        })?;

        let entries = doc
            .get("services")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                LookupError::parse(format!("{category} bootstrap has no services array"), None)
            })?;

        let services = entries
            .iter()
            .filter_map(|entry| {
                let pair = entry.as_array()?;
                let keys = string_list(pair.first()?)?;
                let urls = string_list(pair.get(1)?)?;
                Some(BootstrapService { keys, urls })
            })
            .collect();

        Ok(Self {
            category,
            fetched_at,
            services,
        })
    }

    /// Walk the suffix chain from most to least specific; first exact match wins.
    pub fn servers_for_domain(&self, domain: &str) -> Vec<String> {
        for suffix in suffix_chain(&domain.to_lowercase()) {
            for service in &self.services {
                if service
                    .keys
                    .iter()
                    .any(|key| key.trim().eq_ignore_ascii_case(&suffix))
                {
                    return service.urls.clone();
                }
            }
        }
        Vec::new()
    }

    /// First service whose CIDR list contains the address
    pub fn servers_for_ip(&self, ip: IpAddr) -> Vec<String> {
        self.services
            .iter()
            .find(|service| service.keys.iter().any(|cidr| cidr_contains(cidr, ip)))
            .map(|service| service.urls.clone())
            .unwrap_or_default()
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    Some(
        value
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

/// Prefix-mask comparison over raw address bytes. Families are told apart by
/// byte length, so an IPv4 address never matches an IPv6 block.
pub fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
    let (network, prefix) = match cidr.trim().split_once('/') {
        Some((network, prefix)) => match prefix.parse::<u32>() {
            Ok(prefix) => (network, prefix),
            Err(_) => return false,
        },
        None => (cidr.trim(), u32::MAX),
    };

    let Ok(network) = network.parse::<IpAddr>() else {
        return false;
    };

    let net_bytes = ip_bytes(network);
    let ip_bytes = ip_bytes(ip);
    if net_bytes.len() != ip_bytes.len() {
        return false;
    }

    let max_bits = (net_bytes.len() * 8) as u32;
    let prefix = if prefix == u32::MAX { max_bits } else { prefix };
    if prefix > max_bits {
        return false;
    }

    let full = (prefix / 8) as usize;
    if net_bytes[..full] != ip_bytes[..full] {
        return false;
    }

    let rest = prefix % 8;
    if rest == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rest);
    (net_bytes[full] & mask) == (ip_bytes[full] & mask)
}

fn ip_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Loads, persists and hands out bootstrap tables.
///
/// Readers always get a complete table: a refresh builds the new table off to the
/// side and swaps the `Arc` in under the write lock.
pub struct BootstrapRegistry {
    client: Client,
    base_url: String,
    ttl: Duration,
    request_timeout: Duration,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    tables: RwLock<HashMap<BootstrapCategory, Arc<BootstrapTable>>>,
}

impl BootstrapRegistry {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        ttl: Duration,
        request_timeout: Duration,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            ttl,
            request_timeout,
            store,
            clock,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// URL of the IANA file for a category
    pub fn table_url(&self, category: BootstrapCategory) -> String {
        format!(
            "{}/{}.json",
            self.base_url.trim_end_matches('/'),
            category.as_str()
        )
    }

    /// Memory if fresh, then the store if fresh, then the network. When the
    /// network fails any cached copy is served regardless of age.
    pub async fn load_table(&self, category: BootstrapCategory) -> Result<Arc<BootstrapTable>> {
        let now = self.clock.now();

        let in_memory = self.tables.read().get(&category).cloned();
        if let Some(table) = &in_memory {
            if is_fresh(table.fetched_at, now, self.ttl) {
                return Ok(Arc::clone(table));
            }
        }

        let persisted = self.read_persisted(category).map(Arc::new);
        if let Some(table) = &persisted {
            if is_fresh(table.fetched_at, now, self.ttl) {
                self.swap(Arc::clone(table));
                return Ok(Arc::clone(table));
            }
        }

        match self.fetch(category).await {
            Ok(table) => {
                let table = Arc::new(table);
                self.persist(&table);
                self.swap(Arc::clone(&table));
                tracing::debug!(
                    category = %category,
                    services = table.services.len(),
                    "Bootstrap table refreshed"
                );
                Ok(table)
            }
            Err(e) => {
                let stale = match (in_memory, persisted) {
                    (Some(a), Some(b)) => Some(if a.fetched_at >= b.fetched_at { a } else { b }),
                    (a, b) => a.or(b),
                };
                match stale {
                    Some(table) => {
                        tracing::warn!(
                            category = %category,
                            fetched_at = %table.fetched_at,
                            error = %e,
                            "Bootstrap refresh failed, serving stale table"
                        );
                        self.swap(Arc::clone(&table));
                        Ok(table)
                    }
                    None => Err(match e {
                        parse @ LookupError::Parse { .. } => parse,
                        other => LookupError::bootstrap_unavailable(
                            category.as_str(),
                            other.to_string(),
                        ),
                    }),
                }
            }
        }
    }

    /// Candidate RDAP base URLs for a target, in bootstrap order
    pub async fn servers_for(&self, kind: TargetKind, value: &str) -> Result<Vec<String>> {
        let table = self.load_table(BootstrapCategory::for_kind(kind)).await?;
        match kind {
            TargetKind::Domain => Ok(table.servers_for_domain(value)),
            TargetKind::Ipv4 | TargetKind::Ipv6 => {
                let ip = value.parse::<IpAddr>().map_err(|e| {
                    LookupError::invalid_target(value, format!("not an IP address: {e}"))
                })?;
                Ok(table.servers_for_ip(ip))
            }
        }
    }

    async fn fetch(&self, category: BootstrapCategory) -> Result<BootstrapTable> {
        let url = self.table_url(category);
        let secs = self.request_timeout.as_secs();

        let response = timeout(self.request_timeout, self.client.get(&url).send())
            .await
            .map_err(|_| LookupError::timeout(format!("bootstrap fetch {url}"), secs))?
            .map_err(|e| LookupError::from_http(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::http_status(url, status.as_u16()));
        }

        let body = timeout(self.request_timeout, response.text())
            .await
            .map_err(|_| LookupError::timeout(format!("bootstrap read {url}"), secs))?
            .map_err(|e| LookupError::from_http(e, self.request_timeout))?;

        BootstrapTable::from_iana_json(category, &body, self.clock.now())
    }

    fn read_persisted(&self, category: BootstrapCategory) -> Option<BootstrapTable> {
        match self.store.get(&category.store_key()) {
            Ok(Some(bytes)) => match serde_json::from_slice::<BootstrapTable>(&bytes) {
                Ok(table) => Some(table),
                Err(e) => {
                    tracing::warn!(category = %category, error = %e, "Discarding unreadable bootstrap table");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(category = %category, error = %e, "Failed to read bootstrap table");
                None
            }
        }
    }

    fn persist(&self, table: &BootstrapTable) {
        let result = serde_json::to_vec(table)
            .map_err(LookupError::from)
            .and_then(|bytes| self.store.put(&table.category.store_key(), &bytes));
        if let Err(e) = result {
            tracing::warn!(category = %table.category, error = %e, "Failed to persist bootstrap table");
        }
    }

    fn swap(&self, table: Arc<BootstrapTable>) {
        self.tables.write().insert(table.category, table);
    }
}
