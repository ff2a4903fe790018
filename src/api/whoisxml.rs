//! WhoisXML API, the paid last-resort source

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::api::{fetch_json, strings, text, text_list};
use crate::engine::RecordSource;
use crate::error::{LookupError, Result};
use crate::timestamp::parse_timestamp;
use crate::types::{clean_nameservers, CanonicalRecord, Contact, ContactRole, SourceKind, Target, TargetKind};

const SOURCE_NAME: &str = "whoisxml";

pub struct WhoisXmlSource {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl WhoisXmlSource {
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

/// Field lookup that prefers the registry's view over the registrar's
struct Layered<'a> {
    registry: Option<&'a Value>,
    record: &'a Value,
}

impl<'a> Layered<'a> {
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.registry
            .and_then(|r| r.get(key))
            .or_else(|| self.record.get(key))
    }

    fn text(&self, key: &str) -> Option<String> {
        self.registry
            .and_then(|r| text(r, key))
            .or_else(|| text(self.record, key))
    }
}

/// Map a WhoisXML `WhoisRecord` document
pub fn convert_whoisxml(target: &Target, doc: &Value) -> Result<CanonicalRecord> {
    if let Some(error) = doc.get("ErrorMessage") {
        let message = text(error, "msg").unwrap_or_else(|| "WhoisXML API query failed".to_string());
        return Err(LookupError::upstream(SOURCE_NAME, message));
    }

    let whois_record = doc
        .get("WhoisRecord")
        .filter(|v| v.is_object())
        .ok_or_else(|| LookupError::parse("WhoisXML response has no WhoisRecord", None))?;

    let fields = Layered {
        registry: whois_record.get("registryData").filter(|v| v.is_object()),
        record: whois_record,
    };

    let mut record = CanonicalRecord::new(target, SourceKind::WhoisXml, SOURCE_NAME);
    record.whois_server = fields.text("whoisServer").map(|s| s.to_lowercase());
    record.created = fields.text("createdDate").as_deref().and_then(parse_timestamp);
    record.updated = fields.text("updatedDate").as_deref().and_then(parse_timestamp);
    record.expires = fields.text("expiresDate").as_deref().and_then(parse_timestamp);
    record.registrar = fields.text("registrarName");
    record.registrar_iana_id = fields.text("registrarIANAID");
    record.raw = fields.text("rawText");

    // statuses arrive as a list or as one space-separated string
    if let Some(status) = fields.get("status") {
        for entry in strings(status) {
            for code in entry.split_whitespace() {
                record.push_status(code);
            }
        }
    }

    if let Some(name_servers) = fields.get("nameServers") {
        record.nameservers = clean_nameservers(text_list(name_servers, "hostNames"));
    }

    for (key, role) in [
        ("registrantContact", ContactRole::Registrant),
        ("administrativeContact", ContactRole::Admin),
        ("technicalContact", ContactRole::Tech),
        ("billingContact", ContactRole::Billing),
    ] {
        let Some(entry) = fields.get(key) else {
            continue;
        };
        let contact = Contact {
            role,
            name: text(entry, "name"),
            organization: text(entry, "organization"),
            email: text(entry, "email"),
            phone: text(entry, "telephone"),
            country: text(entry, "country").or_else(|| text(entry, "countryCode")),
        };
        if !contact.is_empty() {
            record.contacts.push(contact);
        }
    }

    if let Some(registrar) = fields.get("registrar") {
        let contact = Contact {
            role: ContactRole::Registrar,
            name: text(registrar, "name").or_else(|| record.registrar.clone()),
            organization: text(registrar, "name").or_else(|| record.registrar.clone()),
            email: text(registrar, "email"),
            phone: text(registrar, "phone"),
            country: None,
        };
        if !contact.is_empty() {
            record.contacts.push(contact);
        }
    }

    // WhoisXML reports unregistered names as a record with dataError set
    if let Some(error) = text(whois_record, "dataError") {
        if error.eq_ignore_ascii_case("MISSING_WHOIS_DATA") && record.registrar.is_none() && record.created.is_none() {
            record.registered = false;
        }
    }

    Ok(record)
}

#[async_trait]
impl RecordSource for WhoisXmlSource {
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
            .ok_or_else(|| LookupError::config("WHOISXML_API_KEY is not set"))?;

        let doc = fetch_json(
            &self.client,
            SOURCE_NAME,
            &self.endpoint,
            &[
                ("apiKey", key),
                ("domainName", target.value.as_str()),
                ("outputFormat", "JSON"),
            ],
            self.request_timeout,
        )
        .await?;

        convert_whoisxml(target, &doc)
    }
}
