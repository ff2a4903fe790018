//! Resolution engine: cache, rate limiting and the ordered fallback stages

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::cache::ResultCache;
use crate::enrich::{locate_with_fallback, merge_geo, DnsProbe, GeoLocator, HickoryDnsProbe, IpSbLocator, IpWhoLocator};
use crate::error::{ErrorKind, LookupError, Result};
use crate::ratelimit::RateLimiter;
use crate::rdap::{BootstrapRegistry, RdapClient, RdapSource};
use crate::store::{Clock, FileStore, KvStore, MemoryStore, SystemClock};
use crate::target::parse_target;
use crate::types::{CanonicalRecord, EngineConfig, Resolution, Target, TargetKind};

/// One stage of the fallback chain
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short name used in logs and aggregated errors
    fn name(&self) -> &str;

    /// Whether this stage can answer for the target at all (kind, credentials)
    fn supports(&self, target: &Target) -> bool;

    /// Whether a successful answer should get a DNS summary attached
    fn enrich_dns(&self) -> bool {
        false
    }

    async fn lookup(&self, target: &Target) -> Result<CanonicalRecord>;
}

/// Assembles an [`Engine`]; anything not supplied is built from the config
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn KvStore>>,
    clock: Option<Arc<dyn Clock>>,
    client: Option<Client>,
    sources: Option<Vec<Arc<dyn RecordSource>>>,
    dns_probe: Option<Arc<dyn DnsProbe>>,
    geo_locators: Option<Vec<Arc<dyn GeoLocator>>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            client: None,
            sources: None,
            dns_probe: None,
            geo_locators: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the default stage list; stages run in the order added
    pub fn with_source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.sources.get_or_insert_with(Vec::new).push(source);
        self
    }

    pub fn with_dns_probe(mut self, probe: Arc<dyn DnsProbe>) -> Self {
        self.dns_probe = Some(probe);
        self
    }

    /// Replace the default geolocation providers; asked in the order added
    pub fn with_geo_locator(mut self, locator: Arc<dyn GeoLocator>) -> Self {
        self.geo_locators.get_or_insert_with(Vec::new).push(locator);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config;

        let store: Arc<dyn KvStore> = match self.store {
            Some(store) => store,
            None => match &config.cache_dir {
                Some(dir) => Arc::new(FileStore::open(dir)?),
                None => Arc::new(MemoryStore::new()),
            },
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&config.user_agent)
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to create configured HTTP client: {}. Using default.", e);
                    Client::new()
                }),
        };

        let sources = match self.sources {
            Some(sources) => sources,
            None => default_sources(&config, &client, &store, &clock),
        };

        let dns_probe = if config.enable_dns_summary {
            Some(
                self.dns_probe
                    .unwrap_or_else(|| Arc::new(HickoryDnsProbe::new(config.dns_timeout)) as Arc<dyn DnsProbe>),
            )
        } else {
            None
        };

        let geo_locators = if config.enable_geo {
            self.geo_locators.unwrap_or_else(|| {
                vec![
                    Arc::new(IpSbLocator::new(client.clone(), &config.geo_primary_url, config.geo_timeout)) as Arc<dyn GeoLocator>,
                    Arc::new(IpWhoLocator::new(client.clone(), &config.geo_secondary_url, config.geo_timeout)),
                ]
            })
        } else {
            Vec::new()
        };

        tracing::debug!(
            stages = ?sources.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            persistent = config.cache_dir.is_some(),
            "Engine assembled"
        );

        Ok(Engine {
            cache: ResultCache::new(store.clone(), clock.clone(), config.cache_ttl),
            limiter: RateLimiter::new(store, clock),
            semaphore: Semaphore::new(config.concurrent_resolutions.max(1)),
            sources,
            dns_probe,
            geo_locators,
            config,
        })
    }
}

/// RDAP, then port 43 WHOIS, then the keyed HTTP APIs
fn default_sources(
    config: &EngineConfig,
    client: &Client,
    store: &Arc<dyn KvStore>,
    clock: &Arc<dyn Clock>,
) -> Vec<Arc<dyn RecordSource>> {
    let mut sources: Vec<Arc<dyn RecordSource>> = Vec::new();

    let registry = Arc::new(BootstrapRegistry::new(
        client.clone(),
        &config.bootstrap_base_url,
        config.bootstrap_ttl,
        config.rdap_timeout,
        store.clone(),
        clock.clone(),
    ));
    sources.push(Arc::new(RdapSource::new(
        registry,
        RdapClient::new(client.clone(), config.rdap_timeout),
    )));

    #[cfg(feature = "whois")]
    {
        use crate::whois::{Port43Client, WhoisClient, WhoisServerDirectory, WhoisSource};

        let directory = WhoisServerDirectory::new(
            Port43Client::new(config.iana_timeout),
            &config.iana_whois_server,
            config.iana_discovery_ttl,
            store.clone(),
            clock.clone(),
        );
        let whois = WhoisClient::new(Port43Client::new(config.whois_timeout), directory);
        sources.push(Arc::new(WhoisSource::new(whois)));
    }

    #[cfg(feature = "http-api")]
    {
        use crate::api::{WhoApiSource, WhoisXmlSource};

        sources.push(Arc::new(WhoApiSource::new(
            client.clone(),
            &config.whoapi_endpoint,
            config.whoapi_key.clone(),
            config.http_api_timeout,
        )));
        sources.push(Arc::new(WhoisXmlSource::new(
            client.clone(),
            &config.whoisxml_endpoint,
            config.whoisxml_api_key.clone(),
            config.http_api_timeout,
        )));
    }

    sources
}

/// Resolves targets into canonical records
pub struct Engine {
    config: EngineConfig,
    sources: Vec<Arc<dyn RecordSource>>,
    cache: ResultCache,
    limiter: RateLimiter,
    semaphore: Semaphore,
    dns_probe: Option<Arc<dyn DnsProbe>>,
    geo_locators: Vec<Arc<dyn GeoLocator>>,
}

impl Engine {
    /// Engine with the default stages and storage for `config`
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Names of the stages in the order they are tried
    pub fn stages(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Resolve one target, serving a fresh cache entry unless `force_refresh`
    pub async fn resolve(&self, raw: &str, force_refresh: bool) -> Result<Resolution> {
        let target = parse_target(raw)?;
        self.resolve_target(&target, force_refresh).await
    }

    /// Like [`Engine::resolve`], but charged against `client_key`'s request budget
    pub async fn resolve_for(&self, client_key: &str, raw: &str, force_refresh: bool) -> Result<Resolution> {
        let target = parse_target(raw)?;
        self.limiter.check(
            &self.config.rate_limit_bucket,
            client_key,
            self.config.rate_limit_window_secs,
            self.config.rate_limit,
        )?;
        self.resolve_target(&target, force_refresh).await
    }

    /// Resolve several targets concurrently; results keep the input order
    pub async fn resolve_many(&self, raws: &[String], force_refresh: bool) -> Vec<Result<Resolution>> {
        let batch_start = Instant::now();
        let futures = raws.iter().map(|raw| self.resolve(raw, force_refresh));
        let results = join_all(futures).await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(
            requested = raws.len(),
            failures,
            batch_duration_ms = %batch_start.elapsed().as_millis(),
            "Batch resolution completed"
        );
        results
    }

    async fn resolve_target(&self, target: &Target, force_refresh: bool) -> Result<Resolution> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| LookupError::internal(format!("Failed to acquire semaphore: {}", e)))?;

        if !force_refresh {
            if let Some(hit) = self.cache.get(target) {
                tracing::debug!(target = %target, cached_at = %hit.cached_at, "Cache hit");
                return Ok(hit);
            }
        }

        let start = Instant::now();
        let budget = self.config.resolve_timeout;

        let staged = timeout(budget, self.run_stages(target))
            .await
            .map_err(|_| LookupError::timeout(format!("resolution of {target}"), budget.as_secs()))?;
        let (mut record, enrich_dns) = match staged {
            Ok(found) => found,
            Err(e) => {
                // an authoritative "not registered" supersedes whatever was cached
                if e.kind() == ErrorKind::NotRegistered {
                    self.cache.invalidate(target);
                }
                return Err(e);
            }
        };

        // enrichment only gets what is left of the budget
        let remaining = budget.saturating_sub(start.elapsed());
        if timeout(remaining, self.enrich(target, &mut record, enrich_dns)).await.is_err() {
            tracing::warn!(target = %target, "Enrichment cut short by the resolution budget");
        }

        let cached_at = self.cache.put(target, &record);

        tracing::info!(
            target = %target,
            source = %record.source,
            server = %record.server,
            registered = record.registered,
            duration_ms = %start.elapsed().as_millis(),
            "Resolution completed"
        );

        Ok(Resolution {
            record,
            from_cache: false,
            cached_at,
        })
    }

    /// Try each supporting stage in order. A stage saying "not registered" ends
    /// the chain; any other failure moves on to the next stage.
    async fn run_stages(&self, target: &Target) -> Result<(CanonicalRecord, bool)> {
        let mut failures: Vec<String> = Vec::new();

        for source in self.sources.iter().filter(|s| s.supports(target)) {
            let started = Instant::now();
            match source.lookup(target).await {
                Ok(record) => {
                    tracing::info!(
                        target = %target,
                        stage = source.name(),
                        duration_ms = %started.elapsed().as_millis(),
                        "Stage answered"
                    );
                    return Ok((record, source.enrich_dns()));
                }
                Err(e) if e.kind() == ErrorKind::NotRegistered => {
                    tracing::debug!(target = %target, stage = source.name(), "Target is not registered");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(
                        target = %target,
                        stage = source.name(),
                        error = %e,
                        duration_ms = %started.elapsed().as_millis(),
                        "Stage failed"
                    );
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        if failures.is_empty() {
            failures.push(format!("no lookup source supports {} targets", target.kind));
        }
        Err(LookupError::exhausted(&target.value, failures.join("; ")))
    }

    async fn enrich(&self, target: &Target, record: &mut CanonicalRecord, enrich_dns: bool) {
        if !record.registered {
            return;
        }

        match target.kind {
            TargetKind::Domain => {
                let Some(probe) = self.dns_probe.as_ref().filter(|_| enrich_dns) else {
                    return;
                };
                let summary = probe.summarize(&target.value).await;
                if !summary.is_empty() {
                    record.dns = Some(summary);
                }
            }
            TargetKind::Ipv4 | TargetKind::Ipv6 => {
                let Some(ip) = target.ip() else {
                    return;
                };
                if let Some(geo) = locate_with_fallback(&self.geo_locators, ip).await {
                    merge_geo(record, geo);
                }
            }
        }
    }
}
