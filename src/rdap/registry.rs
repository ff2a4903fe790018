//! Manual RDAP endpoints for TLDs the IANA bootstrap misses or serves poorly.
//!
//! Overrides are merged *after* bootstrap results, so the bootstrap always wins
//! when it has an answer and these are only tried as later candidates.

/// Extra RDAP base URLs for a TLD (lowercase, without leading dot).
pub fn override_servers(tld: &str) -> &'static [&'static str] {
    match tld {
        "cx" => &["https://rdap.nic.cx/"],
        "com" => &["https://rdap.verisign.com/com/v1/"],
        "net" => &["https://rdap.verisign.com/net/v1/"],
        _ => &[],
    }
}

/// Append `extra` to `primary`, dropping entries equal up to a trailing `/`.
pub fn merge_servers<I, S>(primary: Vec<String>, extra: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut merged: Vec<String> = Vec::with_capacity(primary.len());
    let all = primary
        .into_iter()
        .chain(extra.into_iter().map(|s| s.as_ref().to_string()));

    for server in all {
        let server = server.trim().to_string();
        if server.is_empty() {
            continue;
        }
        let key = server.trim_end_matches('/');
        if !merged.iter().any(|s| s.trim_end_matches('/').eq_ignore_ascii_case(key)) {
            merged.push(server);
        }
    }
    merged
}

/// Join a base URL and a lookup path (`domain/example.com`, `ip/1.1.1.1`).
pub fn rdap_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
