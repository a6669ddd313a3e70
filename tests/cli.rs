//! End-to-end tests for the `capos` binary's offline commands.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/capos.sqlite"

[server]
bind = "127.0.0.1:7431"
base_url = "http://127.0.0.1:7431/"

[keygen]
exports_dir = "{root}/exports"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("capos.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_capos(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_capos"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run capos binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn init(config_path: &Path) {
    let (_, stderr, ok) = run_capos(config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, ok) = run_capos(&config, &["init"]);
    assert!(ok);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/capos.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    init(&config);
    init(&config);
}

#[test]
fn test_keygen_exports_batch() {
    let (tmp, config) = setup_test_env();
    init(&config);

    let (stdout, stderr, ok) = run_capos(&config, &["keygen", "--count", "7", "--channel", "xy"]);
    assert!(ok, "keygen failed: {}", stderr);
    assert!(stdout.contains("Created:  7 / 7"));

    let exports: Vec<_> = fs::read_dir(tmp.path().join("exports"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(exports.len(), 1);
    let name = exports[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("keys_XY-"), "{}", name);

    let content = fs::read_to_string(&exports[0]).unwrap();
    let keys: Vec<&str> = content.lines().collect();
    assert_eq!(keys.len(), 7);
    assert!(keys.iter().all(|k| k.starts_with("CAP-") && k.len() == 18));

    let (stdout, _, ok) = run_capos(&config, &["stats"]);
    assert!(ok);
    assert!(stdout.contains("Keys:        7"));
    assert!(stdout.contains("Unused:      7"));
    assert!(stdout.contains("XY-"));
}

#[test]
fn test_add_and_admin() {
    let (_tmp, config) = setup_test_env();
    init(&config);

    let (stdout, _, ok) = run_capos(
        &config,
        &["add", "CAP-TEST-0000-0001", "--owner", "alice", "--expires", "2030-01-01"],
    );
    assert!(ok);
    assert!(stdout.contains("Added CAP-TEST-0000-0001"));

    let (stdout, _, ok) = run_capos(&config, &["add", "CAP-TEST-0000-0001"]);
    assert!(ok);
    assert!(stdout.contains("already exists"));

    let (stdout, _, ok) = run_capos(&config, &["admin", "grant", "CAP-TEST-0000-0001"]);
    assert!(ok);
    assert!(stdout.contains("is now an admin"));

    let (stdout, _, ok) = run_capos(&config, &["stats"]);
    assert!(ok);
    assert!(stdout.contains("Admins:      1"));

    let (_, _, ok) = run_capos(&config, &["admin", "revoke", "CAP-TEST-0000-0001"]);
    assert!(ok);
    let (stdout, _, _) = run_capos(&config, &["stats"]);
    assert!(stdout.contains("Admins:      0"));
}

#[test]
fn test_admin_unknown_key_fails() {
    let (_tmp, config) = setup_test_env();
    init(&config);
    let (_, stderr, ok) = run_capos(&config, &["admin", "grant", "NOPE"]);
    assert!(!ok);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_add_rejects_bad_expiry() {
    let (_tmp, config) = setup_test_env();
    init(&config);
    let (_, stderr, ok) = run_capos(&config, &["add", "CAP-X", "--expires", "next tuesday"]);
    assert!(!ok);
    assert!(stderr.contains("invalid --expires"));
}

#[test]
fn test_admin_first_defaults_to_five() {
    let (_tmp, config) = setup_test_env();
    init(&config);
    run_capos(&config, &["keygen", "--count", "8"]);

    let (stdout, _, ok) = run_capos(&config, &["admin", "first"]);
    assert!(ok);
    assert!(stdout.contains("Granted admin to 5 key(s)"));
}

#[test]
fn test_import_legacy_users() {
    let (tmp, config) = setup_test_env();
    init(&config);

    let users = tmp.path().join("users.json");
    fs::write(
        &users,
        r#"{
            "CAP-OLD-1": {"owner": "alice", "connected": true, "expire": "2030-01-01", "notion_token": "tok"},
            "CAP-OLD-2": {"owner": "bob"},
            "CAP-BAD": 42
        }"#,
    )
    .unwrap();

    let (stdout, _, ok) = run_capos(&config, &["import", users.to_str().unwrap()]);
    assert!(ok);
    assert!(stdout.contains("Imported 2 record(s)"));
    assert!(stdout.contains("1 record(s) failed"));

    let (stdout, _, _) = run_capos(&config, &["stats"]);
    assert!(stdout.contains("Active:      2"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_capos(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}
