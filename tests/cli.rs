use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn shield_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_shield"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let media_dir = root.join("media");
    fs::create_dir_all(media_dir.join("music")).unwrap();
    fs::write(media_dir.join("Sunset Horizon.jpg"), vec![0xFFu8; 4096]).unwrap();
    fs::write(media_dir.join("music").join("Ambient Flow.mp3"), vec![0x49u8; 4096]).unwrap();
    fs::write(media_dir.join("notes.txt"), "not media").unwrap();

    let config_path = root.join("shield.toml");
    fs::write(
        &config_path,
        r#"[scan]
tick_interval_ms = 5
max_concurrent_scans = 2

[server]
bind = "127.0.0.1:0"
"#,
    )
    .unwrap();

    (tmp, config_path)
}

fn run_shield(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = shield_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run shield binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_check_config() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_shield(&config_path, &["check-config"]);
    assert!(success, "check-config failed: {}", stderr);
    assert!(stdout.contains("Configuration OK"));
    assert!(stdout.contains("provider: demo"));
    assert!(stdout.contains("tick: +5 every 5ms"));
}

#[test]
fn test_check_config_rejects_invalid() {
    let (tmp, _config_path) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[collaborators]\nprovider = \"sonar\"\n").unwrap();
    let (_stdout, stderr, success) = run_shield(&bad, &["check-config"]);
    assert!(!success);
    assert!(stderr.contains("Unknown collaborator provider"));
}

#[test]
fn test_scan_directory_prints_alert_table() {
    let (tmp, config_path) = setup_test_env();
    let media = tmp.path().join("media");
    let (stdout, stderr, success) = run_shield(
        &config_path,
        &["scan", media.to_str().unwrap(), "--progress", "off"],
    );
    assert!(success, "scan failed: {}", stderr);
    assert!(stdout.contains("SEVERITY"));
    assert!(stdout.contains("Urban Landscape #3"));
    assert!(stdout.contains("Ambient Waves - Unknown Artist"));
    assert!(!stdout.contains("notes.txt"));
    // 3 artwork matches + 2 music matches + header
    assert_eq!(stdout.lines().count(), 6);
}

#[test]
fn test_scan_json_output() {
    let (tmp, config_path) = setup_test_env();
    let track = tmp.path().join("media/music/Ambient Flow.mp3");
    let (stdout, stderr, success) = run_shield(
        &config_path,
        &["scan", track.to_str().unwrap(), "--progress", "off", "--json"],
    );
    assert!(success, "scan failed: {}", stderr);
    let alerts: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0]["match"]["score"], 82);
    assert_eq!(alerts[0]["severity"], "high");
    assert_eq!(alerts[1]["severity"], "medium");
}

#[test]
fn test_scan_json_progress_on_stderr() {
    let (tmp, config_path) = setup_test_env();
    let image = tmp.path().join("media/Sunset Horizon.jpg");
    let (_stdout, stderr, success) = run_shield(
        &config_path,
        &["scan", image.to_str().unwrap(), "--progress", "json", "--json"],
    );
    assert!(success, "scan failed: {}", stderr);
    let states: Vec<String> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter(|v| v["event"] == "transition")
        .map(|v| v["state"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        states,
        vec!["staged", "fingerprinting", "searching", "completed"]
    );
}

#[test]
fn test_scan_rejects_oversized_file() {
    let (tmp, config_path) = setup_test_env();
    let big = tmp.path().join("Portrait_Series.png");
    fs::write(&big, vec![0u8; 21 * 1024 * 1024]).unwrap();
    let (_stdout, stderr, success) = run_shield(
        &config_path,
        &["scan", big.to_str().unwrap(), "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("skip"));
    assert!(stderr.contains("exceeding"));
}

#[test]
fn test_scan_unknown_extension_needs_kind() {
    let (tmp, config_path) = setup_test_env();
    let odd = tmp.path().join("mix.bin");
    fs::write(&odd, vec![1u8; 128]).unwrap();

    let (_stdout, stderr, success) = run_shield(
        &config_path,
        &["scan", odd.to_str().unwrap(), "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("--kind"));
}
