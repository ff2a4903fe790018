//! WhoAPI (`r=whois`) as a secondary WHOIS source

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::api::{fetch_json, text, text_list};
use crate::engine::RecordSource;
use crate::error::{LookupError, Result};
use crate::timestamp::parse_timestamp;
use crate::types::{clean_nameservers, CanonicalRecord, Contact, ContactRole, SourceKind, Target, TargetKind};

const SOURCE_NAME: &str = "whoapi";

pub struct WhoApiSource {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl WhoApiSource {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>, request_timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            request_timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Map a WhoAPI whois document. `status` other than `0` is an API-level failure.
pub fn convert_whoapi(target: &Target, doc: &Value) -> Result<CanonicalRecord> {
    let status = text(doc, "status").unwrap_or_default();
    if status != "0" {
        let reason = text(doc, "status_desc").unwrap_or_else(|| format!("status {status}"));
        return Err(LookupError::upstream(SOURCE_NAME, reason));
    }

    let mut record = CanonicalRecord::new(target, SourceKind::WhoApi, SOURCE_NAME);
    record.registered = doc.get("registered").and_then(Value::as_bool).unwrap_or(true);
    record.registrar = text(doc, "whois_name").or_else(|| text(doc, "registrar"));
    record.whois_server = text(doc, "whois_server").map(|s| s.to_lowercase());
    record.created = text(doc, "date_created").as_deref().and_then(parse_timestamp);
    record.updated = text(doc, "date_updated").as_deref().and_then(parse_timestamp);
    record.expires = text(doc, "date_expires").as_deref().and_then(parse_timestamp);
    record.nameservers = clean_nameservers(text_list(doc, "nameservers"));
    for status in text_list(doc, "domain_status") {
        record.push_status(&status);
    }
    record.raw = text(doc, "whois_raw");

    if let Some(contacts) = doc.get("contacts").and_then(Value::as_array) {
        for entry in contacts {
            let Some(role) = text(entry, "type").and_then(|t| ContactRole::from_label(&t)) else {
                continue;
            };
            let contact = Contact {
                role,
                name: text(entry, "name"),
                organization: text(entry, "organization"),
                email: text(entry, "email"),
                phone: text(entry, "phone"),
                country: text(entry, "country"),
            };
            if !contact.is_empty() {
                record.contacts.push(contact);
            }
        }
    }

    Ok(record)
}

#[async_trait]
impl RecordSource for WhoApiSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn supports(&self, target: &Target) -> bool {
        self.is_configured() && target.kind == TargetKind::Domain
    }

    async fn lookup(&self, target: &Target) -> Result<CanonicalRecord> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LookupError::config("WHOAPI_KEY is not set"))?;

        let doc = fetch_json(
            &self.client,
            SOURCE_NAME,
            &self.endpoint,
            &[("domain", target.value.as_str()), ("r", "whois"), ("apikey", key)],
            self.request_timeout,
        )
        .await?;

        convert_whoapi(target, &doc)
    }
}
