//! RDAP lookups: bootstrap-driven server discovery plus the HTTPS client.

pub mod bootstrap;
pub mod client;
pub mod convert;
pub mod registry;

pub use bootstrap::{BootstrapCategory, BootstrapRegistry, BootstrapTable};
pub use client::RdapClient;

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::RecordSource;
use crate::error::Result;
use crate::types::{CanonicalRecord, Target, TargetKind};

/// First stage of every resolution; the only source that handles IP targets
pub struct RdapSource {
    registry: Arc<BootstrapRegistry>,
    client: RdapClient,
}

impl RdapSource {
    pub fn new(registry: Arc<BootstrapRegistry>, client: RdapClient) -> Self {
        Self { registry, client }
    }

    /// Bootstrap servers first, then manual overrides for the TLD
    pub async fn candidates(&self, target: &Target) -> Result<Vec<String>> {
        match target.kind {
            TargetKind::Domain => {
                let overrides = target.tld().map(registry::override_servers).unwrap_or(&[]);
                match self.registry.servers_for(target.kind, &target.value).await {
                    Ok(servers) => Ok(registry::merge_servers(servers, overrides)),
                    Err(e) if !overrides.is_empty() => {
                        tracing::warn!(
                            target = %target,
                            error = %e,
                            "Bootstrap unavailable, using manual RDAP servers only"
                        );
                        Ok(registry::merge_servers(Vec::new(), overrides))
                    }
                    Err(e) => Err(e),
                }
            }
            TargetKind::Ipv4 | TargetKind::Ipv6 => {
                self.registry.servers_for(target.kind, &target.value).await
            }
        }
    }
}

#[async_trait]
impl RecordSource for RdapSource {
    fn name(&self) -> &str {
        "rdap"
    }

    fn supports(&self, _target: &Target) -> bool {
        true
    }

    fn enrich_dns(&self) -> bool {
        true
    }

    async fn lookup(&self, target: &Target) -> Result<CanonicalRecord> {
        let servers = self.candidates(target).await?;
        tracing::debug!(target = %target, candidates = servers.len(), "RDAP candidates resolved");

        match target.kind {
            TargetKind::Domain => self.client.query_domain(target, &servers).await,
            TargetKind::Ipv4 | TargetKind::Ipv6 => self.client.query_ip(target, &servers).await,
        }
    }
}
