use assert_cmd::Command;
use predicates::prelude::*;

fn clipnote() -> Command {
    Command::cargo_bin("clipnote").unwrap()
}

#[test]
fn help_lists_subcommands() {
    clipnote()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("summarize"))
        .stdout(predicate::str::contains("doctor"));
}

#[test]
fn version_prints_the_crate_version() {
    clipnote()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn resolve_rejects_a_malformed_url() {
    clipnote()
        .args(["resolve", "not a url", "--output", "json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("INVALID_URL"));
}

#[test]
fn resolve_rejects_a_foreign_domain() {
    clipnote()
        .args(["resolve", "https://example.com/video/123", "--output", "json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("NOT_MATCHING_DOMAIN"));
}

#[test]
fn unknown_stream_format_is_refused() {
    clipnote()
        .args([
            "resolve",
            "https://www.bilibili.com/video/BV1GJ411x7h7",
            "--format",
            "webm",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported stream format"));
}
