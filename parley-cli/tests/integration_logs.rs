use serde_json::{json, Value};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn parley(config_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_parley"));
    cmd.arg("--config-dir").arg(config_dir);
    for key in [
        "SUPABASE_URL",
        "SUPABASE_ANON_KEY",
        "GEMINI_API_KEY",
        "NEXT_PUBLIC_SUPABASE_URL",
        "NEXT_PUBLIC_SUPABASE_ANON_KEY",
        "NEXT_PUBLIC_GEMINI_API_KEY",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn test_integration_logs() {
    let temp_dir = TempDir::new().unwrap();
    let log_dir = temp_dir.path().join("logs");
    std::fs::write(
        temp_dir.path().join("config.json"),
        json!({ "logging": { "dir": log_dir } }).to_string(),
    )
    .unwrap();

    let output = parley(temp_dir.path())
        .arg("status")
        .env("RUST_LOG", "debug")
        .env("LOG_FORMAT", "json")
        .output()
        .expect("Failed to run parley");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    println!("STDOUT:\n{}", stdout);
    println!("STDERR:\n{}", stderr);

    assert!(output.status.success());
    assert!(stdout.contains("parley status"));

    // Log lines never reach stdout
    assert!(!stdout.lines().any(|line| line.trim_start().starts_with('{')));

    let entries: Vec<Value> = stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|_| panic!("Non-JSON log line: {}", line))
        })
        .collect();
    assert!(entries
        .iter()
        .any(|entry| entry["fields"]["message"] == "Configuration loaded"));
    assert!(entries
        .iter()
        .any(|entry| entry["fields"]["message"] == "Showing status" && entry["level"] == "INFO"));

    let log_files: Vec<_> = std::fs::read_dir(&log_dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("parley.log"))
        .collect();
    assert!(!log_files.is_empty());
}

#[test]
fn test_default_level_keeps_stderr_quiet() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join("config.json"),
        json!({ "logging": { "dir": temp_dir.path().join("logs") } }).to_string(),
    )
    .unwrap();

    let output = parley(temp_dir.path())
        .arg("status")
        .env_remove("RUST_LOG")
        .env_remove("LOG_FORMAT")
        .output()
        .expect("Failed to run parley");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).trim().is_empty());
}
