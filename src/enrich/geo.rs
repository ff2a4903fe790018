//! IP geolocation: ip.sb first, ipwho.is as the backup

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::timeout;

use crate::error::{LookupError, Result};
use crate::types::{CanonicalRecord, GeoInfo, NetworkInfo};

#[async_trait]
pub trait GeoLocator: Send + Sync {
    fn provider(&self) -> &str;
    async fn locate(&self, ip: IpAddr) -> Result<GeoInfo>;
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    provider: &str,
    url: &str,
    request_timeout: Duration,
) -> Result<T> {
    let response = timeout(request_timeout, client.get(url).send())
        .await
        .map_err(|_| LookupError::timeout(format!("{provider} geolocation"), request_timeout.as_secs()))?
        .map_err(|e| LookupError::from_http(e, request_timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(LookupError::http_status(provider, status.as_u16()));
    }

    let body = timeout(request_timeout, response.text())
        .await
        .map_err(|_| LookupError::timeout(format!("{provider} geolocation read"), request_timeout.as_secs()))?
        .map_err(|e| LookupError::from_http(e, request_timeout))?;

    serde_json::from_str(&body)
        .map_err(|e| LookupError::parse(format!("{provider} returned unexpected JSON: {e}"), None))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Response structure from the ip.sb geoip API
#[derive(Debug, Deserialize)]
struct IpSbResponse {
    country: Option<String>,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    asn: Option<u32>,
    asn_organization: Option<String>,
    isp: Option<String>,
    organization: Option<String>,
    timezone: Option<String>,
}

pub struct IpSbLocator {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl IpSbLocator {
    pub fn new(client: Client, base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl GeoLocator for IpSbLocator {
    fn provider(&self) -> &str {
        "ip.sb"
    }

    async fn locate(&self, ip: IpAddr) -> Result<GeoInfo> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ip);
        let response: IpSbResponse = get_json(&self.client, self.provider(), &url, self.request_timeout).await?;

        Ok(GeoInfo {
            country: non_empty(response.country),
            country_code: non_empty(response.country_code),
            region: non_empty(response.region),
            city: non_empty(response.city),
            latitude: response.latitude,
            longitude: response.longitude,
            asn: response.asn,
            as_organization: non_empty(response.asn_organization),
            isp: non_empty(response.isp).or_else(|| non_empty(response.organization)),
            timezone: non_empty(response.timezone),
            provider: self.provider().to_string(),
        })
    }
}

/// Response structure from ipwho.is
#[derive(Debug, Deserialize)]
struct IpWhoResponse {
    success: bool,
    message: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    timezone: Option<IpWhoTimezone>,
    connection: Option<IpWhoConnection>,
}

#[derive(Debug, Deserialize)]
struct IpWhoTimezone {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpWhoConnection {
    asn: Option<u32>,
    org: Option<String>,
    isp: Option<String>,
}

pub struct IpWhoLocator {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl IpWhoLocator {
    pub fn new(client: Client, base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl GeoLocator for IpWhoLocator {
    fn provider(&self) -> &str {
        "ipwho.is"
    }

    async fn locate(&self, ip: IpAddr) -> Result<GeoInfo> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ip);
        let response: IpWhoResponse = get_json(&self.client, self.provider(), &url, self.request_timeout).await?;

        if !response.success {
            let message = response.message.unwrap_or_else(|| "lookup failed".to_string());
            return Err(LookupError::upstream(self.provider(), message));
        }

        let (asn, as_organization, isp) = match response.connection {
            Some(conn) => (conn.asn, non_empty(conn.org), non_empty(conn.isp)),
            None => (None, None, None),
        };

        Ok(GeoInfo {
            country: non_empty(response.country),
            country_code: non_empty(response.country_code),
            region: non_empty(response.region),
            city: non_empty(response.city),
            latitude: response.latitude,
            longitude: response.longitude,
            asn,
            as_organization,
            isp,
            timezone: response.timezone.and_then(|tz| non_empty(tz.id)),
            provider: self.provider().to_string(),
        })
    }
}

/// Ask each provider in order; the first answer wins. Failures are logged, not returned.
pub async fn locate_with_fallback(locators: &[Arc<dyn GeoLocator>], ip: IpAddr) -> Option<GeoInfo> {
    for locator in locators {
        match locator.locate(ip).await {
            Ok(geo) => return Some(geo),
            Err(e) => {
                tracing::debug!(ip = %ip, provider = locator.provider(), error = %e, "Geolocation provider failed");
            }
        }
    }
    None
}

/// Attach geolocation to a record, copying ASN details into the network block
pub fn merge_geo(record: &mut CanonicalRecord, geo: GeoInfo) {
    let network = record.network.get_or_insert_with(NetworkInfo::default);
    if network.asn.is_none() {
        network.asn = geo.asn;
    }
    if network.as_organization.is_none() {
        network.as_organization = geo.as_organization.clone();
    }
    if network.country.is_none() {
        network.country = geo.country_code.clone();
    }
    record.geo = Some(geo);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SourceKind, Target, TargetKind};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ip() -> IpAddr {
        "1.1.1.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_ip_sb_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geoip/1.1.1.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "1.1.1.1",
                "country": "Australia",
                "country_code": "AU",
                "asn": 13335,
                "asn_organization": "Cloudflare, Inc.",
                "organization": "Cloudflare",
                "latitude": -33.494,
                "longitude": 143.2104,
                "timezone": "Australia/Sydney"
            })))
            .mount(&server)
            .await;

        let locator = IpSbLocator::new(Client::new(), format!("{}/geoip", server.uri()), Duration::from_secs(5));
        let geo = locator.locate(ip()).await.unwrap();
        assert_eq!(geo.country_code.as_deref(), Some("AU"));
        assert_eq!(geo.asn, Some(13335));
        assert_eq!(geo.isp.as_deref(), Some("Cloudflare"));
        assert_eq!(geo.provider, "ip.sb");
    }

    #[tokio::test]
    async fn test_fallback_to_secondary() {
        let primary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&primary)
            .await;

        let secondary = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.1.1.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "1.1.1.1",
                "success": true,
                "country": "Australia",
                "country_code": "AU",
                "timezone": {"id": "Australia/Sydney"},
                "connection": {"asn": 13335, "org": "APNIC and Cloudflare DNS Resolver project", "isp": "Cloudflare, Inc."}
            })))
            .mount(&secondary)
            .await;

        let locators: Vec<Arc<dyn GeoLocator>> = vec![
            Arc::new(IpSbLocator::new(Client::new(), primary.uri(), Duration::from_secs(5))),
            Arc::new(IpWhoLocator::new(Client::new(), secondary.uri(), Duration::from_secs(5))),
        ];
        let geo = locate_with_fallback(&locators, ip()).await.unwrap();
        assert_eq!(geo.provider, "ipwho.is");
        assert_eq!(geo.timezone.as_deref(), Some("Australia/Sydney"));
        assert_eq!(geo.asn, Some(13335));
    }

    #[tokio::test]
    async fn test_unsuccessful_ipwho_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "Reserved range"
            })))
            .mount(&server)
            .await;

        let locator = IpWhoLocator::new(Client::new(), server.uri(), Duration::from_secs(5));
        let err = locator.locate("10.0.0.1".parse().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("Reserved range"));
    }

    #[test]
    fn test_merge_geo_fills_network() {
        let target = Target {
            value: "1.1.1.1".to_string(),
            kind: TargetKind::Ipv4,
        };
        let mut record = CanonicalRecord::new(&target, SourceKind::Rdap, "rdap");
        record.network = Some(NetworkInfo {
            country: Some("AU".to_string()),
            ..NetworkInfo::default()
        });

        merge_geo(
            &mut record,
            GeoInfo {
                asn: Some(13335),
                as_organization: Some("Cloudflare, Inc.".to_string()),
                country_code: Some("US".to_string()),
                provider: "ip.sb".to_string(),
                ..GeoInfo::default()
            },
        );

        let network = record.network.as_ref().unwrap();
        assert_eq!(network.asn, Some(13335));
        assert_eq!(network.country.as_deref(), Some("AU"));
        assert!(record.geo.is_some());
    }
}
