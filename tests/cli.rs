//! Command-line behaviour that needs no network access

use assert_cmd::Command;
use predicates::prelude::*;

fn bluewhois() -> Command {
    let mut cmd = Command::cargo_bin("bluewhois").unwrap();
    cmd.env("RUST_LOG", "off")
        .env_remove("BLUEWHOIS_CACHE_DIR")
        .env_remove("WHOAPI_KEY")
        .env_remove("WHOISXML_API_KEY");
    cmd
}

#[test]
fn test_help() {
    bluewhois()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("USAGE:"))
        .stdout(predicate::str::contains("--refresh"));
}

#[test]
fn test_invalid_target_exits_with_error() {
    bluewhois()
        .arg("not a domain")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not a valid domain or IP address"));
}

#[test]
fn test_invalid_target_json() {
    bluewhois()
        .args(["--json", "bad..name"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"error\""));
}

#[test]
fn test_unknown_option() {
    bluewhois()
        .arg("--bogus")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown option"));
}

#[test]
fn test_missing_target_without_terminal() {
    bluewhois()
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no target given"));
}
