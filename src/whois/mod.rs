//! Port 43 WHOIS: candidate servers, raw queries, parsing and one-hop referrals

pub mod parse;
pub mod port43;
pub mod servers;

pub use parse::{extract_referral, parse_whois};
pub use port43::Port43Client;
pub use servers::WhoisServerDirectory;

use async_trait::async_trait;

use crate::engine::RecordSource;
use crate::error::{LookupError, Result};
use crate::types::{CanonicalRecord, Target, TargetKind};

/// Failure details kept in the aggregated error
const MAX_REPORTED_FAILURES: usize = 4;

/// WHOIS client for domain lookups
pub struct WhoisClient {
    port43: Port43Client,
    directory: WhoisServerDirectory,
}

impl WhoisClient {
    pub fn new(port43: Port43Client, directory: WhoisServerDirectory) -> Self {
        Self { port43, directory }
    }

    /// Query one server and parse its answer
    pub async fn query_domain(&self, target: &Target, server: &str) -> Result<CanonicalRecord> {
        let raw = self.port43.query_raw(&target.value, server).await?;
        Ok(parse_whois(target, &raw, server))
    }

    /// First server that answers wins. If its answer names a different WHOIS server,
    /// that server is asked exactly once; its answer replaces the first on success.
    pub async fn query_with_referral(&self, target: &Target, servers: &[String]) -> Result<CanonicalRecord> {
        if servers.is_empty() {
            return Err(LookupError::upstream(
                "whois",
                format!("no WHOIS server known for {}", target.value),
            ));
        }

        let mut failures: Vec<String> = Vec::new();

        for server in servers {
            let mut primary = match self.query_domain(target, server).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(target = %target, server = %server, error = %e, "WHOIS attempt failed");
                    failures.push(format!("{server}: {e}"));
                    continue;
                }
            };
            primary.query_chain = vec![server.clone()];

            let referral = primary
                .raw
                .as_deref()
                .and_then(extract_referral)
                .filter(|referral| !referral.eq_ignore_ascii_case(server));

            if let Some(referral) = referral {
                match self.query_domain(target, &referral).await {
                    Ok(mut referred) => {
                        tracing::debug!(target = %target, from = %server, to = %referral, "Followed WHOIS referral");
                        referred.query_chain = vec![server.clone(), referral];
                        referred.attempts = failures;
                        return Ok(referred);
                    }
                    Err(e) => {
                        tracing::debug!(target = %target, server = %referral, error = %e, "WHOIS referral failed");
                        failures.push(format!("{referral}: {e}"));
                    }
                }
            }

            primary.attempts = failures;
            return Ok(primary);
        }

        let shown: Vec<&str> = failures
            .iter()
            .take(MAX_REPORTED_FAILURES)
            .map(String::as_str)
            .collect();
        Err(LookupError::upstream(
            "whois",
            format!("WHOIS lookup failed; details: {}", shown.join(" | ")),
        ))
    }

    /// Resolve candidates for the target's TLD and query them
    pub async fn lookup(&self, target: &Target) -> Result<CanonicalRecord> {
        let tld = target
            .tld()
            .ok_or_else(|| LookupError::invalid_target(&target.value, "WHOIS lookups need a domain"))?;
        let servers = self.directory.candidates(tld).await;
        tracing::debug!(target = %target, candidates = ?servers, "WHOIS candidates resolved");
        self.query_with_referral(target, &servers).await
    }
}

/// Second stage: raw WHOIS for domains
pub struct WhoisSource {
    client: WhoisClient,
}

impl WhoisSource {
    pub fn new(client: WhoisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordSource for WhoisSource {
    fn name(&self) -> &str {
        "whois"
    }

    fn supports(&self, target: &Target) -> bool {
        target.kind == TargetKind::Domain
    }

    fn enrich_dns(&self) -> bool {
        true
    }

    async fn lookup(&self, target: &Target) -> Result<CanonicalRecord> {
        self.client.lookup(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use crate::types::SourceKind;
    use chrono::Utc;
    use port43::test_server;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(port: u16) -> WhoisClient {
        let port43 = Port43Client::new(Duration::from_secs(5)).with_port(port);
        let directory = WhoisServerDirectory::new(
            port43.clone(),
            "127.0.0.1",
            Duration::from_secs(3600),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
        );
        WhoisClient::new(port43, directory)
    }

    fn example() -> Target {
        crate::target::parse_target("example.com").unwrap()
    }

    #[tokio::test]
    async fn test_referral_takes_exactly_one_hop() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // first answer refers to 127.0.0.1, the referred answer points back at localhost
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        let server = test_server::spawn(move |_| {
            let next = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                "127.0.0.1"
            } else {
                "localhost.localdomain"
            };
            format!("Domain Name: EXAMPLE.COM\nRegistrar: Example Registrar\nRegistrar WHOIS Server: {next}\n")
        })
        .await;
        let whois = client(server.port);

        let record = whois
            .query_with_referral(&example(), &["localhost".to_string()])
            .await
            .unwrap();

        assert_eq!(record.query_chain, vec!["localhost", "127.0.0.1"]);
        assert_eq!(record.server, "127.0.0.1");
        assert_eq!(server.connections(), 2);
    }

    #[tokio::test]
    async fn test_failed_referral_keeps_primary() {
        let registry = test_server::spawn(|_| {
            "Domain Name: EXAMPLE.COM\nRegistrar: Thin\nRegistrar WHOIS Server: whois.invalid\n".to_string()
        })
        .await;
        let whois = client(registry.port);

        let record = whois
            .query_with_referral(&example(), &["127.0.0.1".to_string()])
            .await
            .unwrap();
        assert_eq!(record.query_chain, vec!["127.0.0.1"]);
        assert_eq!(record.registrar.as_deref(), Some("Thin"));
        assert_eq!(record.attempts.len(), 1);
        assert!(record.attempts[0].starts_with("whois.invalid"));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_first_four() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let whois = client(port);
        let servers: Vec<String> = (0..6).map(|_| "127.0.0.1".to_string()).collect();

        let err = whois.query_with_referral(&example(), &servers).await.unwrap_err();
        let message = err.to_string();
        assert_eq!(message.matches("127.0.0.1:").count(), 4);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_not_found_is_unregistered_record() {
        let server = test_server::spawn(|q| format!("No match for \"{}\".\r\n", q.to_uppercase())).await;
        let whois = client(server.port);

        let record = whois
            .query_with_referral(&example(), &["127.0.0.1".to_string()])
            .await
            .unwrap();
        assert!(!record.registered);
        assert_eq!(record.source, SourceKind::Whois);
    }
}
