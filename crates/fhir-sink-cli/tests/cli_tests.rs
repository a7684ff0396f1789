//! CLI integration tests for fhir-sink.
//!
//! These tests cover argument parsing, help output and exit codes for
//! configuration errors. None of them needs a running database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the fhir-sink binary.
fn cmd() -> Command {
    Command::cargo_bin("fhir-sink").unwrap()
}

/// A syntactically valid sink config pointing at an unreachable host.
fn valid_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database:").unwrap();
    writeln!(file, "  host: 127.0.0.1").unwrap();
    writeln!(file, "  port: 1").unwrap();
    writeln!(file, "  database: fhir").unwrap();
    writeln!(file, "  user: sink").unwrap();
    writeln!(file, "  password: secret").unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create-tables"))
        .stdout(predicate::str::contains("load"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_create_tables_help() {
    cmd()
        .args(["create-tables", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--sink-db-config"))
        .stdout(predicate::str::contains("--resource-list"))
        .stdout(predicate::str::contains("--view-definitions-dir"))
        .stdout(predicate::str::contains("--jdbc-initial-pool-size"))
        .stdout(predicate::str::contains("--jdbc-max-pool-size"));
}

#[test]
fn test_load_help() {
    cmd()
        .args(["load", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--input"))
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--create-tables"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fhir-sink"));
}

#[test]
fn test_log_flags_have_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_no_subcommand_shows_usage() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_create_tables_requires_resource_list() {
    cmd()
        .args(["create-tables", "--sink-db-config", "sink.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--resource-list"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    // Missing file is an IO error, not a configuration error
    cmd()
        .args(["health-check", "--sink-db-config", "nonexistent_sink.yaml"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["health-check", "--sink-db-config", file.path().to_str().unwrap()])
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_fields_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database:").unwrap();
    writeln!(file, "  host: localhost").unwrap();

    cmd()
        .args(["health-check", "--sink-db-config", file.path().to_str().unwrap()])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_ssl_mode_exits_with_code_2() {
    let mut file = valid_config();
    writeln!(file, "  ssl_mode: sometimes").unwrap();

    cmd()
        .args(["health-check", "--sink-db-config", file.path().to_str().unwrap()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ssl_mode"));
}

#[test]
fn test_empty_resource_list_exits_with_code_2() {
    let file = valid_config();

    cmd()
        .args([
            "create-tables",
            "--sink-db-config",
            file.path().to_str().unwrap(),
            "--resource-list",
            " , ",
        ])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_resource_type_exits_with_code_2() {
    let file = valid_config();

    cmd()
        .args([
            "create-tables",
            "--sink-db-config",
            file.path().to_str().unwrap(),
            "--resource-list",
            "Patient,Bad-Type",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Bad-Type"));
}

#[test]
fn test_pool_initial_exceeding_max_exits_with_code_2() {
    let file = valid_config();

    cmd()
        .args([
            "create-tables",
            "--sink-db-config",
            file.path().to_str().unwrap(),
            "--resource-list",
            "Patient",
            "--jdbc-initial-pool-size",
            "5",
            "--jdbc-max-pool-size",
            "2",
        ])
        .assert()
        .code(2);
}

#[test]
fn test_missing_view_dir_exits_with_code_2() {
    let file = valid_config();
    let input = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args([
            "load",
            "--sink-db-config",
            file.path().to_str().unwrap(),
            "--input",
            input.path().to_str().unwrap(),
            "--view-definitions-dir",
            "/nonexistent/views",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ViewDefinition"));
}

#[test]
fn test_invalid_view_definition_exits_with_code_2() {
    let file = valid_config();
    let input = tempfile::NamedTempFile::new().unwrap();
    let views = tempfile::TempDir::new().unwrap();
    std::fs::write(
        views.path().join("bad.json"),
        r#"{"resourceType": "ViewDefinition", "name": "bad", "resource": "Patient",
            "select": [{"column": [{"name": "id", "path": "id.substring(1)"}]}]}"#,
    )
    .unwrap();

    cmd()
        .args([
            "load",
            "--sink-db-config",
            file.path().to_str().unwrap(),
            "--input",
            input.path().to_str().unwrap(),
            "--view-definitions-dir",
            views.path().to_str().unwrap(),
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("substring"));
}

#[test]
fn test_zero_workers_exits_with_code_2() {
    let file = valid_config();
    let input = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args([
            "load",
            "--sink-db-config",
            file.path().to_str().unwrap(),
            "--input",
            input.path().to_str().unwrap(),
            "--workers",
            "0",
        ])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_log_format_exits_with_code_2() {
    cmd()
        .args([
            "--log-format",
            "xml",
            "health-check",
            "--sink-db-config",
            "sink.yaml",
        ])
        .assert()
        .code(2);
}

// =============================================================================
// Logging Tests
// =============================================================================

#[test]
fn test_load_logs_span_timing() {
    let file = valid_config();
    let input = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .env_remove("RUST_LOG")
        .args([
            "--log-format",
            "json",
            "load",
            "--sink-db-config",
            file.path().to_str().unwrap(),
            "--input",
            input.path().to_str().unwrap(),
        ])
        .assert()
        .stderr(predicate::str::contains("sink.load"))
        .stderr(predicate::str::contains("time.busy"));
}
