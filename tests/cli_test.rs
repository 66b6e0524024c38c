// ABOUTME: End-to-end tests driving the dbsync-replicator binary
// ABOUTME: Uses a throwaway dbsync.toml pointing every store into a temp dir

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn write_config(dir: &Path, consumer: &str) -> PathBuf {
    let config = format!(
        r#"
[site]
id = "remote-1"

[queue]
path = "{queue}"
name = "dbsync.events"

[hash_store]
path = "{hashes}"

[replica]
path = "{replica}"

{consumer}

[[entities]]
name = "person"
table = "person"
timestamp_fields = ["birthdate"]
"#,
        queue = dir.join("queue.db").display(),
        hashes = dir.join("hashes.db").display(),
        replica = dir.join("replica.db").display(),
    );
    let path = dir.join("dbsync.toml");
    fs::write(&path, config).unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dbsync-replicator"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("DBSYNC_LOG")
        .output()
        .expect("failed to run dbsync-replicator")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn snapshot_file(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn hash_prints_content_hash() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let bob = snapshot_file(
        &dir,
        "bob.json",
        r#"{"name": "Bob ", "age": 30, "deletedDate": null}"#,
    );

    let output = run(&config, &["hash", "--entity", "person", "--file", bob.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(stdout(&output), "be7a2176247b92033d1fa71780ec92a5");

    let output = run(
        &config,
        &["hash", "--entity", "person", "--canonical", "--file", bob.to_str().unwrap()],
    );
    assert!(output.status.success());
    assert_eq!(stdout(&output), "30Bob");
}

#[test]
fn hash_rejects_unregistered_entity() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let file = snapshot_file(&dir, "x.json", r#"{"a": 1}"#);

    let output = run(&config, &["hash", "--entity", "invoice", "--file", file.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invoice"), "{stderr}");
}

#[test]
fn hash_file_prints_md5_of_bytes() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let file = snapshot_file(&dir, "attachment.txt", "hello attachment");

    let output = run(&config, &["hash-file", file.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "2e02e3a2eeb1c71383e6a37610616b75");
}

#[test]
fn publish_skips_unchanged_and_browse_shows_pending() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");
    let v1 = snapshot_file(&dir, "v1.json", r#"{"name": "Ann", "age": 41}"#);
    let v2 = snapshot_file(&dir, "v2.json", r#"{"name": "Ann ", "age": 41}"#);

    let publish = |file: &Path| {
        run(
            &config,
            &[
                "publish",
                "--entity",
                "person",
                "--id",
                "p-7",
                "--operation",
                "insert",
                "--file",
                file.to_str().unwrap(),
            ],
        )
    };

    let first = publish(&v1);
    assert!(first.status.success(), "{:?}", first);
    assert!(stdout(&first).starts_with("changed "));
    let second = publish(&v2);
    assert!(second.status.success());
    assert_eq!(stdout(&second), "unchanged");

    let deleted = run(&config, &["delete", "--entity", "person", "--id", "p-7"]);
    assert!(deleted.status.success());
    assert!(stdout(&deleted).starts_with("queued delete"));

    let browse = run(&config, &["browse"]);
    assert!(browse.status.success());
    let lines: Vec<serde_json::Value> = stdout(&browse)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"]["operation"], "INSERT");
    assert_eq!(lines[0]["event"]["sourceSite"], "remote-1");
    assert_eq!(lines[0]["event"]["globalIdentifier"], "p-7");
    assert_eq!(lines[0]["event"]["payload"]["name"], "Ann");
    assert_eq!(lines[1]["event"]["operation"], "DELETE");

    // browsing does not consume
    let again = run(&config, &["browse"]);
    assert_eq!(stdout(&again).lines().count(), 2);
}

#[test]
fn consume_without_operator_fails_fast() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    let output = run(&config, &["consume"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("No value set for consumer.operator_user"),
        "{stderr}"
    );
}

#[test]
fn consume_with_unknown_operator_fails_fast() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        r#"[consumer]
operator_user = "ghost"

[[consumer.operators]]
username = "admin"
uuid = "op-uuid"
"#,
    );

    let output = run(&config, &["consume"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No user found with username: ghost"), "{stderr}");
}

#[test]
fn invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("dbsync.toml");
    fs::write(&config, "[site]\nid = \"\"\n").unwrap();

    let output = run(&config, &["browse"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("site.id cannot be empty"), "{stderr}");
}
