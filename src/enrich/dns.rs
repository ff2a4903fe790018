//! DNS summary (A/AAAA/CNAME/MX/NS/TXT) attached to domain records

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::rr::RecordType,
    TokioResolver,
};

use crate::types::DnsSummary;

/// Collects whatever DNS data is available for a domain. Never fails: a lookup
/// that errors simply contributes nothing.
#[async_trait]
pub trait DnsProbe: Send + Sync {
    async fn summarize(&self, domain: &str) -> DnsSummary;
}

/// Resolver-backed probe; all six record types are queried concurrently
pub struct HickoryDnsProbe {
    resolver: TokioResolver,
}

impl HickoryDnsProbe {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        let resolver = TokioResolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
            .with_options(opts)
            .build();
        Self { resolver }
    }

    async fn a(&self, domain: &str) -> Vec<String> {
        match self.resolver.ipv4_lookup(domain).await {
            Ok(response) => response.iter().map(|ip| ip.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn aaaa(&self, domain: &str) -> Vec<String> {
        match self.resolver.ipv6_lookup(domain).await {
            Ok(response) => response.iter().map(|ip| ip.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn cname(&self, domain: &str) -> Vec<String> {
        match self.resolver.lookup(domain, RecordType::CNAME).await {
            Ok(response) => response
                .record_iter()
                .filter_map(|record| record.data().as_cname().map(|c| trim_dot(&c.0.to_string())))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn mx(&self, domain: &str) -> Vec<String> {
        match self.resolver.mx_lookup(domain).await {
            Ok(response) => {
                let mut records: Vec<(u16, String)> = response
                    .iter()
                    .map(|mx| (mx.preference(), trim_dot(&mx.exchange().to_string())))
                    .collect();
                records.sort();
                records.into_iter().map(|(_, host)| host).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    async fn ns(&self, domain: &str) -> Vec<String> {
        match self.resolver.ns_lookup(domain).await {
            Ok(response) => response.iter().map(|ns| trim_dot(&ns.to_string())).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn txt(&self, domain: &str) -> Vec<String> {
        match self.resolver.txt_lookup(domain).await {
            Ok(response) => response
                .iter()
                .map(|txt| {
                    txt.iter()
                        .map(|data| String::from_utf8_lossy(data).to_string())
                        .collect::<String>()
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn trim_dot(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

#[async_trait]
impl DnsProbe for HickoryDnsProbe {
    async fn summarize(&self, domain: &str) -> DnsSummary {
        let (a, aaaa, cname, mx, ns, txt) = tokio::join!(
            self.a(domain),
            self.aaaa(domain),
            self.cname(domain),
            self.mx(domain),
            self.ns(domain),
            self.txt(domain),
        );
        DnsSummary {
            a,
            aaaa,
            cname,
            mx,
            ns,
            txt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_dot() {
        assert_eq!(trim_dot("NS1.Example.COM."), "ns1.example.com");
    }

    #[tokio::test]
    async fn test_unresolvable_name_is_empty_summary() {
        let probe = HickoryDnsProbe::new(Duration::from_secs(1));
        let summary = probe.summarize("does-not-exist.invalid").await;
        assert!(summary.is_empty());
    }
}
