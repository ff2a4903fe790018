//! Which port 43 servers to ask for a TLD

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{is_fresh, Clock, KvStore};
use crate::whois::parse::{clean_host, extract_referral};
use crate::whois::port43::Port43Client;

const STORE_PREFIX: &str = "iana-whois:v1:";

/// Known-good servers for high-traffic TLDs. Unknown TLDs go through IANA.
pub fn manual_server(tld: &str) -> Option<&'static str> {
    match tld {
        "com" | "net" => Some("whois.verisign-grs.com"),
        "org" => Some("whois.pir.org"),
        "info" => Some("whois.afilias.net"),
        "biz" => Some("whois.nic.biz"),
        "io" => Some("whois.nic.io"),
        "ai" => Some("whois.nic.ai"),
        "co" => Some("whois.nic.co"),
        "me" => Some("whois.nic.me"),
        "xyz" => Some("whois.nic.xyz"),
        "sb" => Some("whois.nic.net.sb"),
        "bi" => Some("whois1.nic.bi"),
        _ => None,
    }
}

/// Conventional host names registries tend to use
pub fn generic_guesses(tld: &str) -> [String; 3] {
    [
        format!("whois.nic.{tld}"),
        format!("whois.nic.net.{tld}"),
        format!("whois.{tld}"),
    ]
}

/// A cached IANA answer; `server: None` records that IANA knew of no server
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiscoveryEntry {
    server: Option<String>,
    cached_at: DateTime<Utc>,
}

/// Builds the ordered candidate list: manual map, IANA discovery, generic guesses
pub struct WhoisServerDirectory {
    iana: Port43Client,
    iana_server: String,
    ttl: Duration,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl WhoisServerDirectory {
    pub fn new(
        iana: Port43Client,
        iana_server: impl Into<String>,
        ttl: Duration,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            iana,
            iana_server: iana_server.into(),
            ttl,
            store,
            clock,
        }
    }

    /// Ask IANA which server handles a TLD. Answers, including "none", are cached
    /// for the TTL; failed queries are not.
    pub async fn discover(&self, tld: &str) -> Option<String> {
        let key = format!("{STORE_PREFIX}{tld}");
        let now = self.clock.now();

        match self.store.get(&key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<DiscoveryEntry>(&bytes) {
                Ok(entry) if is_fresh(entry.cached_at, now, self.ttl) => return entry.server,
                Ok(_) => {}
                Err(e) => tracing::warn!(tld = %tld, error = %e, "Discarding unreadable IANA discovery entry"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(tld = %tld, error = %e, "Failed to read IANA discovery cache"),
        }

        let raw = match self.iana.query_raw(tld, &self.iana_server).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(tld = %tld, server = %self.iana_server, error = %e, "IANA discovery failed");
                return None;
            }
        };

        let server = extract_referral(&raw);
        tracing::debug!(tld = %tld, server = ?server, "IANA discovery answered");

        let entry = DiscoveryEntry {
            server: server.clone(),
            cached_at: now,
        };
        let stored = serde_json::to_vec(&entry)
            .map_err(crate::error::LookupError::from)
            .and_then(|bytes| self.store.put(&key, &bytes));
        if let Err(e) = stored {
            tracing::warn!(tld = %tld, error = %e, "Failed to cache IANA discovery result");
        }

        server
    }

    /// Cleaned, deduplicated candidates in priority order
    pub async fn candidates(&self, tld: &str) -> Vec<String> {
        let tld = tld.trim().trim_start_matches('.').to_lowercase();
        if tld.is_empty() {
            return Vec::new();
        }

        let mut servers: Vec<String> = Vec::new();
        if let Some(server) = manual_server(&tld) {
            servers.push(server.to_string());
        }
        if let Some(server) = self.discover(&tld).await {
            servers.push(server);
        }
        servers.extend(generic_guesses(&tld));

        let mut cleaned: Vec<String> = Vec::new();
        for server in servers {
            if let Some(host) = clean_host(&server) {
                if !cleaned.contains(&host) {
                    cleaned.push(host);
                }
            }
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use crate::whois::port43::test_server;

    fn directory(port: u16, store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> WhoisServerDirectory {
        WhoisServerDirectory::new(
            Port43Client::new(Duration::from_secs(5)).with_port(port),
            "127.0.0.1",
            Duration::from_secs(7 * 24 * 60 * 60),
            store,
            clock,
        )
    }

    #[tokio::test]
    async fn test_candidates_order() {
        let iana = test_server::spawn(|query| match query {
            "com" => "domain: COM\nwhois: whois.verisign-grs.com\n".to_string(),
            "sb" => "domain: SB\nwhois: whois.nic.net.sb\n".to_string(),
            _ => "domain: ZZ\n".to_string(),
        })
        .await;
        let dir = directory(iana.port, Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(Utc::now())));

        // manual and discovered entries collapse into one
        assert_eq!(
            dir.candidates("com").await,
            vec!["whois.verisign-grs.com", "whois.nic.com", "whois.nic.net.com", "whois.com"]
        );
        assert_eq!(
            dir.candidates("sb").await,
            vec!["whois.nic.net.sb", "whois.nic.sb", "whois.sb"]
        );
        assert_eq!(
            dir.candidates("zz").await,
            vec!["whois.nic.zz", "whois.nic.net.zz", "whois.zz"]
        );
    }

    #[tokio::test]
    async fn test_discovery_cached_including_negative() {
        let iana = test_server::spawn(|query| match query {
            "io" => "refer: whois.nic.io\n".to_string(),
            _ => "% no whois server\n".to_string(),
        })
        .await;
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let dir = directory(iana.port, store.clone(), clock.clone());

        assert_eq!(dir.discover("io").await.as_deref(), Some("whois.nic.io"));
        assert_eq!(dir.discover("io").await.as_deref(), Some("whois.nic.io"));
        assert_eq!(dir.discover("zz").await, None);
        assert_eq!(dir.discover("zz").await, None);
        assert_eq!(iana.connections(), 2);
        assert_eq!(store.len(), 2);

        clock.advance(chrono::Duration::days(8));
        assert_eq!(dir.discover("zz").await, None);
        assert_eq!(iana.connections(), 3);
    }

    #[tokio::test]
    async fn test_failed_discovery_not_cached() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let store = Arc::new(MemoryStore::new());
        let dir = directory(port, store.clone(), Arc::new(ManualClock::new(Utc::now())));

        assert_eq!(dir.discover("io").await, None);
        assert!(store.is_empty());
    }
}
