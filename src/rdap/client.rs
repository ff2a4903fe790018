//! RDAP HTTPS client: tries candidate servers in order until one answers.

use std::time::{Duration, Instant};

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use tokio::time::timeout;

use crate::error::{LookupError, Result};
use crate::rdap::convert::convert_rdap;
use crate::rdap::registry::rdap_url;
use crate::types::{CanonicalRecord, Target};

const RDAP_ACCEPT: &str = "application/rdap+json, application/json";

/// How a single candidate attempt ended
enum Attempt {
    Found(CanonicalRecord),
    NotFound,
    TimedOut(LookupError),
    Failed(String),
}

/// RDAP client for domain and IP lookups
#[derive(Debug, Clone)]
pub struct RdapClient {
    client: Client,
    request_timeout: Duration,
}

impl RdapClient {
    pub fn new(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    /// Query `{base}/domain/{target}` on each server in turn
    pub async fn query_domain(&self, target: &Target, servers: &[String]) -> Result<CanonicalRecord> {
        self.query(target, "domain", servers).await
    }

    /// Query `{base}/ip/{target}` on each server in turn
    pub async fn query_ip(&self, target: &Target, servers: &[String]) -> Result<CanonicalRecord> {
        self.query(target, "ip", servers).await
    }

    /// Walk candidates in order. A 404 from every candidate means the target is not
    /// registered; any other failure mix is reported as upstream unavailability.
    async fn query(&self, target: &Target, object: &str, servers: &[String]) -> Result<CanonicalRecord> {
        let servers: Vec<&String> = servers.iter().filter(|s| !s.trim().is_empty()).collect();
        if servers.is_empty() {
            return Err(LookupError::upstream(
                "rdap",
                format!("no RDAP server known for {}", target.value),
            ));
        }

        let mut attempts: Vec<String> = Vec::new();
        let mut not_found = 0usize;
        let mut timed_out = 0usize;

        for base in servers {
            let started = Instant::now();
            let url = rdap_url(base, &format!("{object}/{}", target.value));

            match self.attempt(target, base, &url).await {
                Attempt::Found(mut record) => {
                    tracing::debug!(
                        target = %target,
                        server = %base,
                        duration_ms = %started.elapsed().as_millis(),
                        "RDAP lookup succeeded"
                    );
                    record.attempts = attempts;
                    return Ok(record);
                }
                Attempt::NotFound => {
                    tracing::debug!(target = %target, server = %base, "RDAP returned 404");
                    not_found += 1;
                    attempts.push(format!("{base}: HTTP 404"));
                }
                Attempt::TimedOut(err) => {
                    tracing::debug!(target = %target, server = %base, error = %err, "RDAP attempt timed out");
                    timed_out += 1;
                    attempts.push(format!("{base}: {err}"));
                }
                Attempt::Failed(reason) => {
                    tracing::debug!(target = %target, server = %base, error = %reason, "RDAP attempt failed");
                    attempts.push(format!("{base}: {reason}"));
                }
            }
        }

        if not_found == attempts.len() {
            return Err(LookupError::not_registered(
                &target.value,
                format!("no RDAP record ({})", attempts.join(" | ")),
            ));
        }

        if timed_out == attempts.len() {
            return Err(LookupError::timeout(
                format!("RDAP lookup of {}", target.value),
                self.request_timeout.as_secs(),
            ));
        }

        Err(LookupError::upstream("rdap", attempts.join(" | ")))
    }

    async fn attempt(&self, target: &Target, base: &str, url: &str) -> Attempt {
        let request = self.client.get(url).header(ACCEPT, RDAP_ACCEPT).send();

        let response = match timeout(self.request_timeout, request).await {
            Err(_) => {
                return Attempt::TimedOut(LookupError::timeout(
                    format!("RDAP request to {base}"),
                    self.request_timeout.as_secs(),
                ))
            }
            Ok(Err(e)) => return Attempt::Failed(LookupError::from_http(e, self.request_timeout).to_string()),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.as_u16() == 404 {
            return Attempt::NotFound;
        }
        if !status.is_success() {
            return Attempt::Failed(format!("HTTP {}", status.as_u16()));
        }

        let body = match timeout(self.request_timeout, response.text()).await {
            Err(_) => {
                return Attempt::TimedOut(LookupError::timeout(
                    format!("RDAP read from {base}"),
                    self.request_timeout.as_secs(),
                ))
            }
            Ok(Err(e)) => return Attempt::Failed(LookupError::from_http(e, self.request_timeout).to_string()),
            Ok(Ok(body)) => body,
        };

        let doc: Value = match serde_json::from_str(&body) {
            Ok(doc) => doc,
            Err(e) => return Attempt::Failed(format!("invalid JSON: {e}")),
        };

        match convert_rdap(target, &doc, base) {
            Ok(record) => Attempt::Found(record),
            Err(e) => Attempt::Failed(e.to_string()),
        }
    }
}
