//! bluewhois - look up registration data for domains and IP addresses
//!
//! Resolves a target through RDAP, port 43 WHOIS and keyed WHOIS APIs and prints
//! one normalized record.

use anyhow::Context;
use bluewhois::{
    timestamp::format_timestamp, CanonicalRecord, Engine, EngineConfig, ErrorKind, LookupError, Resolution,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::env;
use std::io::IsTerminal;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code for targets that resolved as not registered
const EXIT_NOT_REGISTERED: i32 = 2;

#[derive(Debug, Default)]
struct CliOptions {
    refresh: bool,
    json: bool,
    verbose: bool,
    targets: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Option<CliOptions>, String> {
    let mut options = CliOptions::default();
    for arg in args {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--refresh" | "-r" => options.refresh = true,
            "--json" | "-j" => options.json = true,
            "--verbose" | "-v" => options.verbose = true,
            flag if flag.starts_with('-') => return Err(format!("unknown option '{flag}'")),
            target => options.targets.push(target.to_string()),
        }
    }
    Ok(Some(options))
}

#[tokio::main]
async fn main() {
    // Initialize the library
    if let Err(e) = bluewhois::init() {
        eprintln!("❌ Failed to initialize: {}", e);
        process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => {
            print_help();
            return;
        }
        Err(message) => {
            eprintln!("❌ {}", message);
            eprintln!("💡 Run 'bluewhois --help' for usage");
            process::exit(1);
        }
    };

    if options.targets.is_empty() {
        match prompt_target() {
            Ok(target) => options.targets.push(target),
            Err(e) => {
                eprintln!("❌ {:#}", e);
                process::exit(1);
            }
        }
    }

    match run(&options).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Ask for a target when none was given on the command line
fn prompt_target() -> anyhow::Result<String> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("no target given; usage: bluewhois [--refresh] [--json] [--verbose] <target>");
    }
    let target = inquire::Text::new("Domain or IP address:")
        .with_help_message("e.g. example.com, 1.1.1.1 or 2606:4700:4700::1111")
        .prompt()
        .context("Failed to read target")?;
    Ok(target.trim().to_string())
}

/// Resolve every target and return the process exit code
async fn run(options: &CliOptions) -> anyhow::Result<i32> {
    let config = EngineConfig::from_env();
    let engine = Engine::new(config).context("Failed to set up the resolution engine")?;

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Resolving {}...", options.targets.join(", ")));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let results = if options.targets.len() == 1 {
        vec![engine.resolve(&options.targets[0], options.refresh).await]
    } else {
        engine.resolve_many(&options.targets, options.refresh).await
    };
    spinner.finish_and_clear();

    let mut failed = false;
    let mut unregistered = false;
    for (target, result) in options.targets.iter().zip(results) {
        match report(target, result, options)? {
            0 => {}
            EXIT_NOT_REGISTERED => unregistered = true,
            _ => failed = true,
        }
    }

    // a hard failure outranks "not registered"
    Ok(if failed {
        1
    } else if unregistered {
        EXIT_NOT_REGISTERED
    } else {
        0
    })
}

/// Print one outcome; returns 0, 1 (error) or 2 (not registered)
fn report(target: &str, result: Result<Resolution, LookupError>, options: &CliOptions) -> anyhow::Result<i32> {
    match result {
        Ok(resolution) => {
            let registered = resolution.record.registered;
            if options.json {
                let record = if options.verbose {
                    resolution.record.clone()
                } else {
                    resolution.record.without_raw()
                };
                let output = Resolution { record, ..resolution };
                println!("{}", serde_json::to_string_pretty(&output).context("Failed to encode result")?);
            } else {
                print_resolution(&resolution, options.verbose);
            }
            Ok(if registered { 0 } else { EXIT_NOT_REGISTERED })
        }
        Err(e) => {
            let code = if e.kind() == ErrorKind::NotRegistered {
                EXIT_NOT_REGISTERED
            } else {
                1
            };
            if options.json {
                let body = serde_json::json!({
                    "target": target,
                    "error": e.to_string(),
                    "registered": if code == EXIT_NOT_REGISTERED { Some(false) } else { None },
                });
                println!("{}", serde_json::to_string_pretty(&body).context("Failed to encode error")?);
            } else {
                eprintln!("{}", e.user_message());
            }
            Ok(code)
        }
    }
}

fn print_resolution(resolution: &Resolution, verbose: bool) {
    let record = &resolution.record;

    println!();
    println!("🔎 {} ({})", record.target, record.kind);
    println!("═══════════════════════════════════");

    if !record.registered {
        println!("🟢 Not registered");
        println!("   Source: {} via {}", record.source, record.server);
        println!();
        return;
    }

    print_field("Registrar", record.registrar.as_deref());
    print_field("IANA ID", record.registrar_iana_id.as_deref());
    print_field("Created", record.created.as_ref().map(format_timestamp).as_deref());
    print_field("Updated", record.updated.as_ref().map(format_timestamp).as_deref());
    print_field("Expires", record.expires.as_ref().map(format_timestamp).as_deref());
    print_field("WHOIS server", record.whois_server.as_deref());

    if !record.status.is_empty() {
        println!("   Status:");
        for status in &record.status {
            println!("     • {}", status);
        }
    }
    if !record.nameservers.is_empty() {
        println!("   Nameservers:");
        for ns in &record.nameservers {
            println!("     • {}", ns);
        }
    }

    print_network(record);

    if !record.contacts.is_empty() {
        println!("   Contacts:");
        for contact in &record.contacts {
            let parts: Vec<&str> = [
                contact.name.as_deref(),
                contact.organization.as_deref(),
                contact.email.as_deref(),
                contact.phone.as_deref(),
                contact.country.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect();
            println!("     {:<10} {}", contact.role.to_string(), parts.join(" | "));
        }
    }

    if let Some(dns) = &record.dns {
        println!("   DNS:");
        for (label, values) in [
            ("A", &dns.a),
            ("AAAA", &dns.aaaa),
            ("CNAME", &dns.cname),
            ("MX", &dns.mx),
            ("NS", &dns.ns),
            ("TXT", &dns.txt),
        ] {
            if !values.is_empty() {
                println!("     {:<6} {}", label, values.join(", "));
            }
        }
    }

    println!();
    let origin = if resolution.from_cache { " (cached)" } else { "" };
    println!(
        "📡 Source: {} via {}{} at {}",
        record.source,
        record.server,
        origin,
        format_timestamp(&resolution.cached_at)
    );
    if record.query_chain.len() > 1 {
        println!("   Referral chain: {}", record.query_chain.join(" → "));
    }

    if verbose {
        for attempt in &record.attempts {
            println!("   ⚠️  {}", attempt);
        }
        if let Some(raw) = &record.raw {
            println!();
            println!("{}", raw);
        }
    }
    println!();
}

fn print_network(record: &CanonicalRecord) {
    if let Some(network) = &record.network {
        print_field("Range", network.range.as_deref());
        if !network.cidrs.is_empty() {
            print_field("CIDR", Some(&network.cidrs.join(", ")));
        }
        print_field("Network", network.name.as_deref());
        print_field("Handle", network.handle.as_deref());
        print_field("Country", network.country.as_deref());
        if let Some(asn) = network.asn {
            let org = network.as_organization.as_deref().unwrap_or("");
            println!("   {:<14} AS{} {}", "ASN:", asn, org);
        }
    }
    if let Some(geo) = &record.geo {
        let location: Vec<&str> = [geo.city.as_deref(), geo.region.as_deref(), geo.country.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !location.is_empty() {
            print_field("Location", Some(&location.join(", ")));
        }
        print_field("ISP", geo.isp.as_deref());
        print_field("Timezone", geo.timezone.as_deref());
    }
}

fn print_field(label: &str, value: Option<&str>) {
    if let Some(value) = value {
        println!("   {:<14} {}", format!("{label}:"), value);
    }
}

/// Print help information
fn print_help() {
    println!("🔎 bluewhois - WHOIS/RDAP lookups for domains and IP addresses");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("USAGE:");
    println!("    bluewhois [--refresh] [--json] [--verbose] <target>...");
    println!();
    println!("OPTIONS:");
    println!("    -r, --refresh    Ignore cached results");
    println!("    -j, --json       Print the record as JSON");
    println!("    -v, --verbose    Include raw upstream text and failed attempts");
    println!("    -h, --help       Show this help");
    println!();
    println!("EXAMPLES:");
    println!("    bluewhois example.com");
    println!("    bluewhois --json 1.1.1.1");
    println!("    bluewhois --refresh 2606:4700:4700::1111");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    BLUEWHOIS_CACHE_DIR     Persist cache and bootstrap data here");
    println!("    BLUEWHOIS_CACHE_TTL     Cache lifetime in seconds (default: 3600)");
    println!("    WHOAPI_KEY              Enables the WhoAPI fallback");
    println!("    WHOISXML_API_KEY        Enables the WhoisXML API fallback");
    println!("    WHOISXML_API_ENDPOINT   Override the WhoisXML endpoint");
    println!("    RUST_LOG                Log filter (default: warn)");
    println!();
    println!("EXIT CODES:");
    println!("    0  registered target found");
    println!("    1  lookup failed");
    println!("    2  target is not registered");
}
