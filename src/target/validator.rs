//! Target normalization and validation

use crate::error::{LookupError, Result};
use crate::types::{Target, TargetKind};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("valid regex"));
static TLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(xn--[a-z0-9-]{2,59}|[a-z]{2,63})$").expect("valid regex"));

/// Normalizes raw user input into a domain or IP target
#[derive(Debug, Clone, Default)]
pub struct TargetValidator;

impl TargetValidator {
    /// Create a new target validator
    pub fn new() -> Self {
        Self
    }

    /// Canonicalize raw input. Total and idempotent: never fails, and
    /// `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(&self, raw: &str) -> String {
        let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
        let cleaned = cleaned.trim();

        let host = extract_host(cleaned);
        let host = strip_decorations(&host).to_lowercase();

        if let Ok(ip) = host.parse::<IpAddr>() {
            return ip.to_string();
        }

        let mut domain = host.as_str();
        while let Some(rest) = domain.strip_prefix("www.") {
            if self.check_domain(rest).is_err() {
                break;
            }
            domain = rest;
        }
        domain.to_string()
    }

    /// Normalize then validate, returning the classified target
    pub fn validate(&self, raw: &str) -> Result<Target> {
        let normalized = self.normalize(raw);

        if normalized.is_empty() {
            return Err(LookupError::invalid_target(raw, "target cannot be empty"));
        }

        match normalized.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => {
                return Ok(Target {
                    value: normalized,
                    kind: TargetKind::Ipv4,
                })
            }
            Ok(IpAddr::V6(_)) => {
                return Ok(Target {
                    value: normalized,
                    kind: TargetKind::Ipv6,
                })
            }
            Err(_) => {}
        }

        self.check_domain(&normalized)
            .map_err(|reason| LookupError::invalid_target(raw, reason))?;

        Ok(Target {
            value: normalized,
            kind: TargetKind::Domain,
        })
    }

    /// Check whether the input names a valid domain or IP
    pub fn is_valid(&self, raw: &str) -> bool {
        self.validate(raw).is_ok()
    }

    /// Domain syntax rules; the error is a human-readable reason
    fn check_domain(&self, domain: &str) -> std::result::Result<(), &'static str> {
        if domain.len() > 253 {
            return Err("domain name too long (max 253 characters)");
        }

        if domain.contains("..") {
            return Err("domain cannot contain consecutive dots");
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 {
            return Err("domain must have at least two labels");
        }

        for label in &labels {
            if label.is_empty() {
                return Err("domain label cannot be empty");
            }
            if label.len() > 63 {
                return Err("domain label too long (max 63 characters)");
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err("domain label cannot start or end with hyphen");
            }
            if !LABEL_RE.is_match(label) {
                return Err("domain contains invalid characters");
            }
        }

        let tld = labels.last().copied().unwrap_or_default();
        if !TLD_RE.is_match(tld) {
            return Err("invalid top-level domain");
        }

        Ok(())
    }
}

/// Pull the host out of URL-shaped input; anything else passes through unchanged
fn extract_host(input: &str) -> String {
    if input.contains("://") {
        if let Ok(url) = url::Url::parse(input) {
            if let Some(host) = url.host_str() {
                return host.to_string();
            }
        }
        let rest = input.split_once("://").map_or(input, |(_, rest)| rest);
        return cut_at_separator(rest).to_string();
    }

    if input.contains(['/', '?', '#']) {
        if let Ok(url) = url::Url::parse(&format!("http://{input}")) {
            if let Some(host) = url.host_str() {
                return host.to_string();
            }
        }
        return cut_at_separator(input).to_string();
    }

    input.to_string()
}

fn cut_at_separator(input: &str) -> &str {
    input
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
}

/// Drop IPv6 literal brackets, surrounding whitespace and trailing dots
fn strip_decorations(input: &str) -> &str {
    input
        .trim_start_matches(|c: char| c.is_whitespace() || c == '[')
        .trim_end_matches(|c: char| c.is_whitespace() || c == ']' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenarios() {
        let validator = TargetValidator::new();

        let target = validator.validate("WWW.Example.COM.").unwrap();
        assert_eq!(target.value, "example.com");
        assert_eq!(target.kind, TargetKind::Domain);

        let target = validator.validate("2606:4700:4700::1111").unwrap();
        assert_eq!(target.value, "2606:4700:4700::1111");
        assert_eq!(target.kind, TargetKind::Ipv6);

        assert!(validator.validate("not a domain").is_err());
    }

    #[test]
    fn test_basic_validation() {
        let validator = TargetValidator::new();

        assert!(validator.is_valid("example.com"));
        assert!(validator.is_valid("sub.example.com"));
        assert!(validator.is_valid("test-domain.org"));
        assert!(validator.is_valid("xn--fiqs8s.xn--fiqz9s"));
        assert!(validator.is_valid("example.xn--p1ai"));

        assert!(!validator.is_valid(""));
        assert!(!validator.is_valid("invalid"));
        assert!(!validator.is_valid("-invalid.com"));
        assert!(!validator.is_valid("invalid-.com"));
        assert!(!validator.is_valid("a..com"));
        assert!(!validator.is_valid("example.c"));
        assert!(!validator.is_valid("example.c0m"));
        assert!(!validator.is_valid(&format!("{}.com", "a".repeat(64))));
    }

    #[test]
    fn test_url_inputs() {
        let validator = TargetValidator::new();

        assert_eq!(validator.normalize("https://www.Example.com/path?q=1"), "example.com");
        assert_eq!(validator.normalize("example.com/whois"), "example.com");
        assert_eq!(validator.normalize("http://[2001:DB8::1]:8080/"), "2001:db8::1");
        assert_eq!(validator.normalize("  \texample.org\n"), "example.org");
    }

    #[test]
    fn test_ip_canonicalization() {
        let validator = TargetValidator::new();

        let target = validator.validate("[2001:0DB8:0000::0001]").unwrap();
        assert_eq!(target.value, "2001:db8::1");

        let target = validator.validate("::FFFF:192.0.2.1").unwrap();
        assert_eq!(target.kind, TargetKind::Ipv6);
        assert_eq!(target.value, "::ffff:192.0.2.1");

        let target = validator.validate("1.1.1.1.").unwrap();
        assert_eq!(target.kind, TargetKind::Ipv4);
        assert_eq!(target.value, "1.1.1.1");
    }

    #[test]
    fn test_www_stripping() {
        let validator = TargetValidator::new();

        assert_eq!(validator.normalize("www.example.com"), "example.com");
        assert_eq!(validator.normalize("www.www.example.com"), "example.com");
        // remainder "com" is not a valid domain, so the label stays
        assert_eq!(validator.normalize("www.com"), "www.com");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let validator = TargetValidator::new();
        let inputs = [
            "WWW.Example.COM.",
            "www.www.example.com",
            "https://user@Example.org:8443/a/b",
            "a b/c",
            "a . .",
            "[[::1]]",
            "x://bad host/",
            "not a domain",
            "\u{0007}ctrl.example.com",
            "www.1.2.3.4",
            "..",
            "",
            "   ",
            "http://",
            "example.com?#",
        ];
        for input in inputs {
            let once = validator.normalize(input);
            assert_eq!(validator.normalize(&once), once, "input: {input:?}");
        }
    }
}
