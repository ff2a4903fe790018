//! WHOIS text parsing.
//!
//! Registries disagree on layout, so two passes run over every response: a flat
//! `key: value` pass for ICANN-style output, then a section pass for block layouts
//! (a header line followed by indented lines). The flat pass wins on conflicts.

use std::sync::LazyLock;

use regex::Regex;

use crate::timestamp::parse_timestamp;
use crate::types::{clean_nameservers, CanonicalRecord, Contact, ContactRole, SourceKind, Target};

macro_rules! line_re {
    ($pattern:literal) => {
        LazyLock::new(|| Regex::new(concat!(r"(?i)^\s*", $pattern, r"\s*:\s*(.*?)\s*$")).expect("valid regex"))
    };
}

static NAMESERVER_RE: LazyLock<Regex> = line_re!(r"(?:name server|nameserver|nserver|name servers)");
static REGISTRAR_RE: LazyLock<Regex> = line_re!(r"(?:registrar|registrar name|sponsoring registrar)");
static REGISTRAR_ID_RE: LazyLock<Regex> = line_re!(r"registrar iana id");
static CREATED_RE: LazyLock<Regex> =
    line_re!(r"(?:creation date|created on|created date|created|registered on|registration time|domain registration date)");
static UPDATED_RE: LazyLock<Regex> =
    line_re!(r"(?:updated date|last updated on|last updated|last modified|changed)");
static EXPIRES_RE: LazyLock<Regex> = line_re!(
    r"(?:registry expiry date|registrar registration expiration date|expiry date|expires on|expiration date|expiration time|expire date|paid-till)"
);
static STATUS_RE: LazyLock<Regex> = line_re!(r"(?:domain status|status|state)");
static WHOIS_SERVER_RE: LazyLock<Regex> = line_re!(r"registrar whois server");
static ICANN_CONTACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(registrant|admin|tech|billing)\s+(name|organization|email|phone|country)\s*:\s*(.*?)\s*$")
        .expect("valid regex")
});

static REFERRAL_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?im)^[ \t]*whois[ \t]*:[ \t]*(\S+)[ \t\r]*$").expect("valid regex"),
        Regex::new(r"(?im)^[ \t]*refer[ \t]*:[ \t]*(\S+)[ \t\r]*$").expect("valid regex"),
        Regex::new(r"(?im)^[ \t]*registrar whois server[ \t]*:[ \t]*(\S+)[ \t\r]*$").expect("valid regex"),
    ]
});
static HOST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9.-]+$").expect("valid regex"));

const NOT_FOUND_PATTERNS: &[&str] = &[
    "no match",
    "not found",
    "no entries found",
    "no data found",
    "no object found",
    "object does not exist",
    "domain not found",
    "not registered",
    "available for registration",
    "status: free",
    "status: available",
];

/// Parse a domain WHOIS response into a record
pub fn parse_whois(target: &Target, raw: &str, server: &str) -> CanonicalRecord {
    let mut record = CanonicalRecord::new(target, SourceKind::Whois, server);
    record.raw = Some(raw.to_string());

    parse_flat(raw, &mut record);
    parse_sections(raw, &mut record);

    if looks_unregistered(raw, &record) {
        record.registered = false;
    }
    record
}

/// Whether the text says "no such domain" and carries no registration data
pub fn looks_unregistered(raw: &str, record: &CanonicalRecord) -> bool {
    let has_data = record.registrar.is_some()
        || record.created.is_some()
        || record.expires.is_some()
        || !record.nameservers.is_empty();
    if has_data {
        return false;
    }
    let lower = raw.to_lowercase();
    NOT_FOUND_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Referral target named by a response (`whois:`, `refer:`, `Registrar WHOIS Server:`),
/// reduced to a bare lowercase host name.
pub fn extract_referral(raw: &str) -> Option<String> {
    REFERRAL_RES.iter().find_map(|re| {
        let value = re.captures(raw)?.get(1)?.as_str().to_lowercase();
        clean_host(&value)
    })
}

/// Strip scheme, path and trailing dots; reject anything that is not a dotted host
pub fn clean_host(value: &str) -> Option<String> {
    let value = value.trim().to_lowercase();
    let value = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(&value);
    let host = value.split('/').next().unwrap_or_default().trim_end_matches('.');
    if host.contains('.') && HOST_RE.is_match(host) {
        Some(host.to_string())
    } else {
        None
    }
}

fn capture<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|v| !v.is_empty())
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('%') || trimmed.starts_with('#') || trimmed.starts_with(">>>")
}

fn parse_flat(raw: &str, record: &mut CanonicalRecord) {
    let mut nameservers: Vec<String> = Vec::new();
    let mut contacts: Vec<Contact> = Vec::new();

    for line in raw.lines().filter(|l| !is_comment(l)) {
        if let Some(value) = capture(&NAMESERVER_RE, line) {
            if let Some(host) = value.split_whitespace().next() {
                nameservers.push(host.to_string());
            }
            continue;
        }

        if let Some(caps) = ICANN_CONTACT_RE.captures(line) {
            let value = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            let Some(role) = ContactRole::from_label(&caps[1]) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let index = match contacts.iter().position(|c| c.role == role) {
                Some(i) => i,
                None => {
                    contacts.push(Contact::new(role));
                    contacts.len() - 1
                }
            };
            set_contact_field(&mut contacts[index], &caps[2], value);
            continue;
        }

        if let Some(value) = capture(&WHOIS_SERVER_RE, line) {
            if record.whois_server.is_none() {
                record.whois_server = clean_host(value);
            }
            continue;
        }

        if let Some(value) = capture(&REGISTRAR_ID_RE, line) {
            record.registrar_iana_id.get_or_insert_with(|| value.to_string());
            continue;
        }

        if let Some(value) = capture(&REGISTRAR_RE, line) {
            record.registrar.get_or_insert_with(|| value.to_string());
            continue;
        }

        if let Some(value) = capture(&CREATED_RE, line) {
            if record.created.is_none() {
                record.created = parse_timestamp(value);
            }
            continue;
        }

        if let Some(value) = capture(&UPDATED_RE, line) {
            if record.updated.is_none() {
                record.updated = parse_timestamp(value);
            }
            continue;
        }

        if let Some(value) = capture(&EXPIRES_RE, line) {
            if record.expires.is_none() {
                record.expires = parse_timestamp(value);
            }
            continue;
        }

        if let Some(value) = capture(&STATUS_RE, line) {
            // ICANN appends an explanatory URL after the EPP code
            let status = value.split(" http").next().unwrap_or(value);
            record.push_status(status);
        }
    }

    record.nameservers = clean_nameservers(nameservers);
    record.contacts = contacts.into_iter().filter(|c| !c.is_empty()).collect();
}

fn set_contact_field(contact: &mut Contact, field: &str, value: &str) {
    let slot = match field.to_lowercase().as_str() {
        "name" | "person" | "contact" => &mut contact.name,
        "organization" | "organisation" | "org" | "company" => &mut contact.organization,
        "email" | "e-mail" | "mail" => &mut contact.email,
        "phone" | "tel" | "telephone" | "phone number" => &mut contact.phone,
        "country" | "country code" => &mut contact.country,
        _ => return,
    };
    if slot.is_none() && !value.trim().is_empty() {
        *slot = Some(value.trim().to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Nameservers,
    Contact(ContactRole),
    Registrar,
    Dates,
    Status,
}

fn classify_header(header: &str) -> Option<Section> {
    let lower = header.to_lowercase();
    if lower.contains("name server") || lower.contains("nameserver") || lower.contains("domain servers") || lower == "dns" {
        Some(Section::Nameservers)
    } else if lower.contains("status") {
        Some(Section::Status)
    } else if lower.contains("date") {
        Some(Section::Dates)
    } else if lower.contains("registrar") {
        Some(Section::Registrar)
    } else if lower.contains("registrant") || lower.contains("holder") || lower.contains("owner") {
        Some(Section::Contact(ContactRole::Registrant))
    } else if lower.contains("admin") {
        Some(Section::Contact(ContactRole::Admin))
    } else if lower.contains("tech") {
        Some(Section::Contact(ContactRole::Tech))
    } else if lower.contains("billing") {
        Some(Section::Contact(ContactRole::Billing))
    } else {
        None
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || key.contains("//") {
        return None;
    }
    Some((key, value.trim()))
}

/// Header lines are `Something:` with nothing after the colon; the lines that
/// follow with deeper indentation belong to the header.
fn parse_sections(raw: &str, record: &mut CanonicalRecord) {
    let lines: Vec<&str> = raw.lines().filter(|l| !is_comment(l)).collect();
    let mut nameservers: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        i += 1;

        let Some(header) = trimmed.strip_suffix(':') else {
            continue;
        };
        let Some(section) = classify_header(header) else {
            continue;
        };

        let header_indent = indent_of(line);
        let mut body: Vec<&str> = Vec::new();
        while i < lines.len() {
            let next = lines[i];
            if next.trim().is_empty() {
                if body.is_empty() {
                    i += 1;
                    continue;
                }
                break;
            }
            if indent_of(next) <= header_indent {
                break;
            }
            body.push(next.trim());
            i += 1;
        }

        apply_section(section, &body, record, &mut nameservers);
    }

    if record.nameservers.is_empty() {
        record.nameservers = clean_nameservers(nameservers);
    }
}

fn apply_section(section: Section, body: &[&str], record: &mut CanonicalRecord, nameservers: &mut Vec<String>) {
    match section {
        Section::Nameservers => {
            for entry in body {
                let value = split_key_value(entry).map_or(*entry, |(_, v)| v);
                if let Some(host) = value.split_whitespace().next() {
                    nameservers.push(host.to_string());
                }
            }
        }
        Section::Status => {
            for entry in body {
                let value = split_key_value(entry).map_or(*entry, |(_, v)| v);
                record.push_status(value);
            }
        }
        Section::Dates => {
            for entry in body {
                let Some((key, value)) = split_key_value(entry) else {
                    continue;
                };
                let key = key.to_lowercase();
                let slot = if key.contains("creat") || key.contains("registered") {
                    &mut record.created
                } else if key.contains("expir") || key.contains("renewal") {
                    &mut record.expires
                } else if key.contains("updat") || key.contains("modif") || key.contains("changed") {
                    &mut record.updated
                } else {
                    continue;
                };
                if slot.is_none() {
                    *slot = parse_timestamp(value);
                }
            }
        }
        Section::Registrar => {
            if record.registrar.is_some() {
                return;
            }
            let named = body.iter().find_map(|entry| match split_key_value(entry) {
                Some((key, value)) if key.eq_ignore_ascii_case("name") || key.eq_ignore_ascii_case("organization") => {
                    Some(value.to_string())
                }
                _ => None,
            });
            let first_plain = body
                .iter()
                .find(|entry| split_key_value(entry).is_none())
                .map(|entry| entry.to_string());
            record.registrar = named.or(first_plain).filter(|v| !v.is_empty());
        }
        Section::Contact(role) => {
            if record.contacts.iter().any(|c| c.role == role) {
                return;
            }
            let mut contact = Contact::new(role);
            for entry in body {
                match split_key_value(entry) {
                    Some((key, value)) => set_contact_field(&mut contact, key, value),
                    None if contact.name.is_none() => contact.name = Some(entry.to_string()),
                    None => {}
                }
            }
            if !contact.is_empty() {
                record.contacts.push(contact);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::format_timestamp;
    use crate::types::TargetKind;

    fn target(value: &str) -> Target {
        Target {
            value: value.to_string(),
            kind: TargetKind::Domain,
        }
    }

    const VERISIGN: &str = "   Domain Name: EXAMPLE.COM
   Registry Domain ID: 2336799_DOMAIN_COM-VRSN
   Registrar WHOIS Server: whois.iana.org
   Registrar URL: http://res-dom.iana.org
   Updated Date: 2024-08-14T07:01:34Z
   Creation Date: 1995-08-14T04:00:00Z
   Registry Expiry Date: 2025-08-13T04:00:00Z
   Registrar: RESERVED-Internet Assigned Numbers Authority
   Registrar IANA ID: 376
   Domain Status: clientDeleteProhibited https://icann.org/epp#clientDeleteProhibited
   Domain Status: clientTransferProhibited https://icann.org/epp#clientTransferProhibited
   Name Server: A.IANA-SERVERS.NET
   Name Server: B.IANA-SERVERS.NET
   DNSSEC: signedDelegation
>>> Last update of whois database: 2024-09-01T00:00:00Z <<<
";

    #[test]
    fn test_flat_icann_layout() {
        let record = parse_whois(&target("example.com"), VERISIGN, "whois.verisign-grs.com");

        assert!(record.registered);
        assert_eq!(record.source, SourceKind::Whois);
        assert_eq!(
            record.registrar.as_deref(),
            Some("RESERVED-Internet Assigned Numbers Authority")
        );
        assert_eq!(record.registrar_iana_id.as_deref(), Some("376"));
        assert_eq!(format_timestamp(&record.created.unwrap()), "1995-08-14 04:00:00");
        assert_eq!(format_timestamp(&record.updated.unwrap()), "2024-08-14 07:01:34");
        assert_eq!(format_timestamp(&record.expires.unwrap()), "2025-08-13 04:00:00");
        assert_eq!(record.status, vec!["clientDeleteProhibited", "clientTransferProhibited"]);
        assert_eq!(record.nameservers, vec!["a.iana-servers.net", "b.iana-servers.net"]);
        assert_eq!(record.whois_server.as_deref(), Some("whois.iana.org"));
        assert_eq!(record.raw.as_deref(), Some(VERISIGN));
    }

    #[test]
    fn test_icann_contact_lines() {
        let raw = "Domain Name: example.org
Registrar: Example Registrar
Registrant Name: REDACTED FOR PRIVACY
Registrant Organization: Example Org
Registrant Country: CA
Admin Email: admin@example.org
Tech Phone: +1.5555550100
";
        let record = parse_whois(&target("example.org"), raw, "whois.pir.org");
        let registrant = record.contacts.iter().find(|c| c.role == ContactRole::Registrant).unwrap();
        assert_eq!(registrant.name.as_deref(), Some("REDACTED FOR PRIVACY"));
        assert_eq!(registrant.organization.as_deref(), Some("Example Org"));
        assert_eq!(registrant.country.as_deref(), Some("CA"));
        let admin = record.contacts.iter().find(|c| c.role == ContactRole::Admin).unwrap();
        assert_eq!(admin.email.as_deref(), Some("admin@example.org"));
        let tech = record.contacts.iter().find(|c| c.role == ContactRole::Tech).unwrap();
        assert_eq!(tech.phone.as_deref(), Some("+1.5555550100"));
    }

    #[test]
    fn test_section_layout() {
        let raw = "
    Domain name:
        example.co.uk

    Registrant:
        Example Trading Ltd

    Registrar:
        Example Registrar Ltd [Tag = EXAMPLE]
        URL: https://registrar.example

    Relevant dates:
        Registered on: 26-Aug-1996
        Expiry date:  26-Aug-2030
        Last updated:  20-Jan-2024

    Registration status:
        Registered until expiry date.

    Name servers:
        ns1.example.net     192.0.2.1
        ns2.example.net
";
        let record = parse_whois(&target("example.co.uk"), raw, "whois.nic.uk");

        assert!(record.registered);
        assert_eq!(record.registrar.as_deref(), Some("Example Registrar Ltd [Tag = EXAMPLE]"));
        assert_eq!(format_timestamp(&record.created.unwrap()), "1996-08-26 00:00:00");
        assert_eq!(format_timestamp(&record.expires.unwrap()), "2030-08-26 00:00:00");
        assert_eq!(format_timestamp(&record.updated.unwrap()), "2024-01-20 00:00:00");
        assert_eq!(record.nameservers, vec!["ns1.example.net", "ns2.example.net"]);
        assert_eq!(record.status, vec!["Registered until expiry date."]);
        let registrant = record.contacts.iter().find(|c| c.role == ContactRole::Registrant).unwrap();
        assert_eq!(registrant.name.as_deref(), Some("Example Trading Ltd"));
    }

    #[test]
    fn test_flat_values_win_over_sections() {
        let raw = "Registrar: Flat Registrar
Registrar:
    Section Registrar
";
        let record = parse_whois(&target("example.com"), raw, "whois.example");
        assert_eq!(record.registrar.as_deref(), Some("Flat Registrar"));
    }

    #[test]
    fn test_not_found_response() {
        let raw = "No match for \"NOPE-EXAMPLE-12345.COM\".\r\n>>> Last update of whois database: 2024-09-01T00:00:00Z <<<\r\n";
        let record = parse_whois(&target("nope-example-12345.com"), raw, "whois.verisign-grs.com");
        assert!(!record.registered);

        // "not found" appearing next to real data does not flip the verdict
        let raw = "Registrar: Example\nRemarks: contact not found in cache\n";
        assert!(parse_whois(&target("example.com"), raw, "whois.example").registered);
    }

    #[test]
    fn test_extract_referral_order_and_cleanup() {
        assert_eq!(
            extract_referral("refer: whois.nic.io\nwhois: whois.example.io\n").as_deref(),
            Some("whois.example.io")
        );
        assert_eq!(
            extract_referral("   Registrar WHOIS Server: https://WHOIS.Registrar.Example/lookup\n").as_deref(),
            Some("whois.registrar.example")
        );
        assert_eq!(extract_referral("domain: COM\norganisation: Verisign\n"), None);
        assert_eq!(extract_referral("whois: not_a_host!\n"), None);
    }

    #[test]
    fn test_empty_referral_line_is_ignored() {
        let raw = "Domain Name: EXAMPLE.COM\nRegistrar WHOIS Server:\nREDACTED\nRegistrar: Example Registrar\n";
        assert_eq!(extract_referral(raw), None);

        let crlf = "Registrar WHOIS Server: \r\nwhois: whois.example.net\r\n";
        assert_eq!(extract_referral(crlf).as_deref(), Some("whois.example.net"));

        // single-label hosts are never referral targets
        assert_eq!(extract_referral("refer: localhost\n"), None);
        assert_eq!(clean_host("WHOIS.Example.NET."), Some("whois.example.net".to_string()));
    }
}
