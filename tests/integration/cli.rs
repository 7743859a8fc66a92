//! Integration tests for the two binaries.
//!
//! These tests run the compiled binaries against a temporary data directory
//! and check exit codes and the files they leave behind.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CREDENTIAL_VARS: [&str; 2] = ["POSTCRON_FACEBOOK_APP_ID", "POSTCRON_FACEBOOK_APP_SECRET"];

fn command(bin: &str, data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin(bin).expect("binary should build");
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd.env("POSTCRON_DATA_DIR", data_dir)
        .env("POSTCRON_INTER_BATCH_DELAY_MS", "0")
        .env("POSTCRON_RETRY_BASE_DELAY_MS", "1")
        .env("POSTCRON_RETRY_MAX_DELAY_MS", "10")
        .env("RUST_LOG", "postcron=debug");
    cmd
}

fn status_lines(data_dir: &Path) -> Vec<serde_json::Value> {
    let content = fs::read_to_string(data_dir.join("_status").join("status.jsonl"))
        .expect("status log should exist");
    content
        .lines()
        .map(|line| serde_json::from_str(line).expect("status line should be JSON"))
        .collect()
}

#[test]
fn test_help_describes_binary() {
    let mut cmd = Command::cargo_bin("scheduled-tasks").expect("binary should build");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Publish due posts"));
}

#[test]
fn test_scheduled_tasks_with_empty_store_succeeds() {
    let temp_dir = TempDir::new().expect("temp dir");
    let data_dir = temp_dir.path().join("data");

    command("scheduled-tasks", &data_dir).assert().success();

    let records = status_lines(&data_dir);
    let names: Vec<_> = records
        .iter()
        .map(|r| r["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "publish_due_posts",
            "refresh_tokens",
            "account_health",
            "prune_status_history",
            "run"
        ]
    );
    // Missing credentials only fail the non-critical refresh step.
    assert_eq!(records[1]["status"], "failed");
    assert_eq!(records[1]["error_type"], "fatal");
    assert_eq!(records[4]["status"], "failed");
}

#[test]
fn test_default_log_filter_shows_binary_lines() {
    let temp_dir = TempDir::new().expect("temp dir");
    let data_dir = temp_dir.path().join("data");

    command("scheduled-tasks", &data_dir)
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stderr(predicate::str::contains("scheduled tasks starting"))
        .stderr(predicate::str::contains("scheduled tasks finished"));
}

#[test]
fn test_scheduled_tasks_publishes_due_post() {
    let temp_dir = TempDir::new().expect("temp dir");
    let data_dir = temp_dir.path().to_path_buf();
    fs::create_dir_all(data_dir.join("accounts")).expect("accounts dir");
    fs::create_dir_all(data_dir.join("posts")).expect("posts dir");
    fs::write(
        data_dir.join("accounts").join("u-1_linkedin.json"),
        r#"{"user_id": "u-1", "platform": "linkedin", "access_token": "tok"}"#,
    )
    .expect("account");
    fs::write(
        data_dir.join("posts").join("p-1.json"),
        r#"{
            "user_id": "u-1",
            "content": "Hello from cron",
            "platforms": ["linkedin"],
            "status": "scheduled",
            "scheduled_at": "2020-01-01T00:00:00Z"
        }"#,
    )
    .expect("post");

    command("scheduled-tasks", &data_dir).assert().success();

    let post: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(data_dir.join("posts").join("p-1.json")).expect("post"),
    )
    .expect("json");
    assert_eq!(post["status"], "published");
    assert!(post["platform_post_ids"]["linkedin"]
        .as_str()
        .unwrap_or_default()
        .starts_with("linkedin_"));
    assert!(data_dir
        .join("users")
        .join("u-1")
        .join("posts")
        .join("p-1.json")
        .exists());
    assert!(data_dir
        .join("account_health")
        .join("u-1_linkedin.json")
        .exists());
}

#[test]
fn test_scheduled_tasks_rejects_invalid_configuration() {
    let temp_dir = TempDir::new().expect("temp dir");

    command("scheduled-tasks", temp_dir.path())
        .env("POSTCRON_BATCH_SIZE", "0")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("POSTCRON_BATCH_SIZE"));
}

#[test]
fn test_scheduled_tasks_fails_when_store_cannot_open() {
    let temp_dir = TempDir::new().expect("temp dir");
    let not_a_dir = temp_dir.path().join("data");
    fs::write(&not_a_dir, "occupied").expect("file");

    command("scheduled-tasks", &not_a_dir)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed to open data store"));
}

#[test]
fn test_refresh_tokens_without_credentials_exits_1() {
    let temp_dir = TempDir::new().expect("temp dir");
    let data_dir = temp_dir.path().join("data");

    command("refresh-tokens", &data_dir)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("POSTCRON_FACEBOOK_APP_ID"));

    assert!(!data_dir.exists());
}

#[test]
fn test_refresh_tokens_with_nothing_to_refresh_records_report() {
    let temp_dir = TempDir::new().expect("temp dir");
    let data_dir = temp_dir.path().join("data");

    command("refresh-tokens", &data_dir)
        .env("POSTCRON_FACEBOOK_APP_ID", "app")
        .env("POSTCRON_FACEBOOK_APP_SECRET", "secret")
        .assert()
        .success();

    let records = status_lines(&data_dir);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["kind"], "report");
    assert_eq!(records[0]["name"], "token_refresh");
    assert_eq!(records[0]["status"], "success");
}
