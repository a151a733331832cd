//! CLI behavior tests for the bootd binary.
//!
//! Startup validation only; nothing here binds a privileged port.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn bootd() -> Command {
    Command::cargo_bin("bootd").expect("bootd binary builds")
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn missing_config_file_fails() {
    bootd()
        .arg("--config")
        .arg("/nonexistent/bootd.conf")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn empty_config_has_nothing_to_serve() {
    let file = config_file("[server]\nserver_ip = 192.168.1.1\n");
    bootd()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("nothing to serve"));
}

#[test]
fn coresmd_without_required_uris_fails() {
    let file = config_file(
        "[server]\nserver_ip = 192.168.1.1\n\n[coresmd]\nlease_time=5m\n",
    );
    bootd()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("[coresmd]"));
}

#[test]
fn dhcp_handler_without_server_ip_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let file = config_file(&format!(
        "[bootloop]\nlease_file={}\nipv4_start=10.0.0.5\nipv4_end=10.0.0.20\n",
        dir.path().join("leases.db").display()
    ));
    bootd()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("server_ip is required"));
}

#[test]
fn unknown_section_fails() {
    let file = config_file("[mystery]\nkey=value\n");
    bootd()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown section"));
}
