//! RDAP JSON (RFC 9083) to [`CanonicalRecord`]

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LookupError, Result};
use crate::timestamp::parse_timestamp;
use crate::types::{
    clean_nameservers, CanonicalRecord, Contact, ContactRole, NetworkInfo, SourceKind, Target,
};

/// RDAP response structures
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RdapResponse {
    #[serde(rename = "ldhName")]
    ldh_name: Option<String>,
    #[serde(rename = "unicodeName")]
    unicode_name: Option<String>,
    handle: Option<String>,
    status: Vec<String>,
    events: Vec<RdapEvent>,
    nameservers: Vec<RdapNameserver>,
    entities: Vec<RdapEntity>,
    port43: Option<String>,
    #[serde(rename = "startAddress")]
    start_address: Option<String>,
    #[serde(rename = "endAddress")]
    end_address: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    network_type: Option<String>,
    country: Option<String>,
    #[serde(rename = "parentHandle")]
    parent_handle: Option<String>,
    cidr0_cidrs: Vec<Cidr0>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RdapEntity {
    roles: Vec<String>,
    #[serde(rename = "vcardArray")]
    vcard_array: Option<Value>,
    #[serde(rename = "publicIds")]
    public_ids: Vec<PublicId>,
    entities: Vec<RdapEntity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PublicId {
    #[serde(rename = "type")]
    id_type: String,
    identifier: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    event_action: String,
    #[serde(rename = "eventDate")]
    event_date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RdapNameserver {
    #[serde(rename = "ldhName")]
    ldh_name: Option<String>,
    #[serde(rename = "unicodeName")]
    unicode_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Cidr0 {
    v4prefix: Option<String>,
    v6prefix: Option<String>,
    length: Option<u8>,
}

enum EventKind {
    Created,
    Updated,
    Expires,
}

/// Exact RDAP event actions first, then loose matching for registries that improvise
fn classify_event(action: &str) -> Option<EventKind> {
    let action = action.trim().to_lowercase();
    match action.as_str() {
        "registration" => return Some(EventKind::Created),
        "expiration" => return Some(EventKind::Expires),
        "last changed" => return Some(EventKind::Updated),
        "last update of rdap database" | "reregistration" | "reinstantiation" | "transfer" | "locked"
        | "unlocked" | "deletion" | "enduring" => return None,
        _ => {}
    }

    if action.contains("expir") {
        Some(EventKind::Expires)
    } else if action.contains("regist") || action.contains("created") {
        Some(EventKind::Created)
    } else if action.contains("changed") || action.contains("update") {
        Some(EventKind::Updated)
    } else {
        None
    }
}

/// Convert a parsed RDAP document answered by `server` into a record
pub fn convert_rdap(target: &Target, doc: &Value, server: &str) -> Result<CanonicalRecord> {
    if !doc.is_object() {
        return Err(LookupError::parse("RDAP response is not a JSON object", None));
    }
    let response: RdapResponse = serde_json::from_value(doc.clone())
        .map_err(|e| LookupError::parse(format!("unexpected RDAP shape: {e}"), None))?;

    let mut record = CanonicalRecord::new(target, SourceKind::Rdap, server);
    record.raw = serde_json::to_string_pretty(doc).ok();
    record.whois_server = response
        .port43
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    for status in &response.status {
        record.push_status(status);
    }

    for event in &response.events {
        let Some(kind) = classify_event(&event.event_action) else {
            continue;
        };
        let Some(when) = parse_timestamp(&event.event_date) else {
            continue;
        };
        let slot = match kind {
            EventKind::Created => &mut record.created,
            EventKind::Updated => &mut record.updated,
            EventKind::Expires => &mut record.expires,
        };
        slot.get_or_insert(when);
    }

    record.nameservers = clean_nameservers(
        response
            .nameservers
            .iter()
            .filter_map(|ns| ns.ldh_name.as_deref().or(ns.unicode_name.as_deref())),
    );

    let entities = response
        .entities
        .iter()
        .flat_map(|entity| std::iter::once(entity).chain(entity.entities.iter()));

    for entity in entities {
        let card = VCard::from_entity(entity);
        let roles: Vec<ContactRole> = entity
            .roles
            .iter()
            .filter_map(|role| ContactRole::from_label(role))
            .collect();

        if roles.contains(&ContactRole::Registrar) && record.registrar.is_none() {
            record.registrar = card.name.clone().or_else(|| card.organization.clone());
            record.registrar_iana_id = entity
                .public_ids
                .iter()
                .find(|id| id.id_type.eq_ignore_ascii_case("IANA Registrar ID"))
                .map(|id| id.identifier.trim().to_string())
                .filter(|id| !id.is_empty());
        }

        for role in roles {
            let contact = card.to_contact(role);
            if !contact.is_empty() && !record.contacts.contains(&contact) {
                record.contacts.push(contact);
            }
        }
    }

    if target.kind.is_ip() {
        record.network = Some(network_info(&response));
    } else if response.ldh_name.is_none() && response.unicode_name.is_none() && response.handle.is_none() {
        return Err(LookupError::parse("RDAP domain response has no ldhName or handle", None));
    }

    Ok(record)
}

fn network_info(response: &RdapResponse) -> NetworkInfo {
    let range = match (&response.start_address, &response.end_address) {
        (Some(start), Some(end)) => Some(format!("{start} - {end}")),
        (Some(start), None) => Some(start.clone()),
        _ => None,
    };

    let cidrs = response
        .cidr0_cidrs
        .iter()
        .filter_map(|c| {
            let prefix = c.v4prefix.as_deref().or(c.v6prefix.as_deref())?;
            Some(match c.length {
                Some(len) => format!("{prefix}/{len}"),
                None => prefix.to_string(),
            })
        })
        .collect();

    NetworkInfo {
        range,
        cidrs,
        name: response.name.clone(),
        handle: response.handle.clone(),
        parent_handle: response.parent_handle.clone(),
        network_type: response.network_type.clone(),
        country: response.country.clone(),
        asn: None,
        as_organization: None,
    }
}

/// The handful of vCard properties we surface
#[derive(Debug, Default)]
struct VCard {
    name: Option<String>,
    organization: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    country: Option<String>,
}

impl VCard {
    fn from_entity(entity: &RdapEntity) -> Self {
        let Some(props) = entity
            .vcard_array
            .as_ref()
            .and_then(|v| v.get(1))
            .and_then(Value::as_array)
        else {
            return Self::default();
        };

        let mut card = Self::default();
        for prop in props.iter().filter_map(Value::as_array) {
            let (Some(key), Some(params), Some(value)) =
                (prop.first().and_then(Value::as_str), prop.get(1), prop.get(3))
            else {
                continue;
            };

            match key.to_lowercase().as_str() {
                "fn" => fill(&mut card.name, text_value(value)),
                "org" => fill(&mut card.organization, text_value(value)),
                "email" => fill(&mut card.email, text_value(value)),
                "tel" => fill(
                    &mut card.phone,
                    text_value(value).map(|t| t.trim_start_matches("tel:").to_string()),
                ),
                "adr" => {
                    let from_params = params.get("cc").and_then(Value::as_str).map(str::to_string);
                    let from_value = value
                        .as_array()
                        .and_then(|parts| parts.get(6))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    fill(&mut card.country, from_params.or(from_value));
                }
                _ => {}
            }
        }
        card
    }

    fn to_contact(&self, role: ContactRole) -> Contact {
        Contact {
            role,
            name: self.name.clone(),
            organization: self.organization.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            country: self.country.clone(),
        }
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    }
}

/// vCard values are strings, or arrays of strings for structured properties
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let joined = parts
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            Some(joined)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::format_timestamp;
    use crate::types::TargetKind;
    use serde_json::json;

    #[test]
    fn test_classify_event_actions() {
        assert!(matches!(classify_event("registration"), Some(EventKind::Created)));
        assert!(matches!(classify_event("Expiration"), Some(EventKind::Expires)));
        assert!(matches!(classify_event("last changed"), Some(EventKind::Updated)));
        assert!(classify_event("reregistration").is_none());
        assert!(classify_event("last update of RDAP database").is_none());
        assert!(classify_event("transfer").is_none());
        // non-standard spellings still land somewhere sensible
        assert!(matches!(classify_event("domain created"), Some(EventKind::Created)));
        assert!(matches!(classify_event("registrar expiry"), Some(EventKind::Expires)));
        assert!(matches!(classify_event("record updated"), Some(EventKind::Updated)));
    }

    fn domain(value: &str) -> Target {
        Target {
            value: value.to_string(),
            kind: TargetKind::Domain,
        }
    }

    fn sample_domain() -> Value {
        json!({
            "objectClassName": "domain",
            "ldhName": "EXAMPLE.COM",
            "status": ["client transfer prohibited", "server delete prohibited"],
            "port43": "whois.verisign-grs.com",
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2025-08-13T04:00:00Z"},
                {"eventAction": "last changed", "eventDate": "2024-08-14T07:01:34Z"},
                {"eventAction": "last update of RDAP database", "eventDate": "2024-09-01T00:00:00Z"}
            ],
            "nameservers": [
                {"objectClassName": "nameserver", "ldhName": "A.IANA-SERVERS.NET."},
                {"objectClassName": "nameserver", "ldhName": "b.iana-servers.net"},
                {"objectClassName": "nameserver", "ldhName": "not.defined"}
            ],
            "entities": [{
                "objectClassName": "entity",
                "roles": ["registrar"],
                "publicIds": [{"type": "IANA Registrar ID", "identifier": "376"}],
                "vcardArray": ["vcard", [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", "RESERVED-Internet Assigned Numbers Authority"]
                ]],
                "entities": [{
                    "roles": ["abuse"],
                    "vcardArray": ["vcard", [
                        ["fn", {}, "text", "Abuse Desk"],
                        ["email", {}, "text", "abuse@iana.org"],
                        ["tel", {"type": "voice"}, "uri", "tel:+1.3108239358"]
                    ]]
                }]
            }, {
                "roles": ["registrant", "technical"],
                "vcardArray": ["vcard", [
                    ["org", {}, "text", "Example Org"],
                    ["adr", {"cc": "US"}, "text", ["", "", "", "", "", "", ""]]
                ]]
            }]
        })
    }

    #[test]
    fn test_convert_domain() {
        let record = convert_rdap(&domain("example.com"), &sample_domain(), "https://rdap.verisign.com/com/v1/").unwrap();

        assert!(record.registered);
        assert_eq!(record.source, SourceKind::Rdap);
        assert_eq!(
            record.registrar.as_deref(),
            Some("RESERVED-Internet Assigned Numbers Authority")
        );
        assert_eq!(record.registrar_iana_id.as_deref(), Some("376"));
        assert_eq!(format_timestamp(&record.created.unwrap()), "1995-08-14 04:00:00");
        assert_eq!(format_timestamp(&record.expires.unwrap()), "2025-08-13 04:00:00");
        assert_eq!(format_timestamp(&record.updated.unwrap()), "2024-08-14 07:01:34");
        assert_eq!(record.nameservers, vec!["a.iana-servers.net", "b.iana-servers.net"]);
        assert_eq!(record.status.len(), 2);
        assert_eq!(record.whois_server.as_deref(), Some("whois.verisign-grs.com"));
        assert!(record.raw.as_deref().unwrap().contains("\n"));
    }

    #[test]
    fn test_contacts_walk_nested_entities() {
        let record = convert_rdap(&domain("example.com"), &sample_domain(), "rdap").unwrap();

        let abuse = record
            .contacts
            .iter()
            .find(|c| c.role == ContactRole::Abuse)
            .unwrap();
        assert_eq!(abuse.email.as_deref(), Some("abuse@iana.org"));
        assert_eq!(abuse.phone.as_deref(), Some("+1.3108239358"));

        let tech = record
            .contacts
            .iter()
            .find(|c| c.role == ContactRole::Tech)
            .unwrap();
        assert_eq!(tech.organization.as_deref(), Some("Example Org"));
        assert_eq!(tech.country.as_deref(), Some("US"));
        assert!(record.contacts.iter().any(|c| c.role == ContactRole::Registrant));
    }

    #[test]
    fn test_convert_ip_network() {
        let target = Target {
            value: "1.1.1.1".to_string(),
            kind: TargetKind::Ipv4,
        };
        let doc = json!({
            "objectClassName": "ip network",
            "handle": "1.1.1.0 - 1.1.1.255",
            "startAddress": "1.1.1.0",
            "endAddress": "1.1.1.255",
            "name": "APNIC-LABS",
            "type": "ASSIGNED PORTABLE",
            "country": "AU",
            "parentHandle": "1.0.0.0 - 1.255.255.255",
            "cidr0_cidrs": [{"v4prefix": "1.1.1.0", "length": 24}]
        });

        let record = convert_rdap(&target, &doc, "https://rdap.apnic.net/").unwrap();
        let network = record.network.unwrap();
        assert_eq!(network.range.as_deref(), Some("1.1.1.0 - 1.1.1.255"));
        assert_eq!(network.cidrs, vec!["1.1.1.0/24"]);
        assert_eq!(network.name.as_deref(), Some("APNIC-LABS"));
        assert_eq!(network.country.as_deref(), Some("AU"));
        assert_eq!(network.network_type.as_deref(), Some("ASSIGNED PORTABLE"));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(convert_rdap(&domain("example.com"), &json!([1, 2]), "rdap").is_err());
        assert!(convert_rdap(&domain("example.com"), &json!({"errorCode": 500}), "rdap").is_err());
    }
}
