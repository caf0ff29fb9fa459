use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_config(temp: &Path, cache_version: &str) -> PathBuf {
    let path = temp.join("config.yaml");
    let data_dir = temp.join("data");
    let contents = format!(
        "backend_url: https://backend.satchel.app\ncache_version: {cache_version}\ndata_dir: {}\nquota_bytes: 1048576\n",
        data_dir.display()
    );
    fs::write(&path, contents).expect("failed to write config");
    path
}

fn satchel() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("satchel"));
    cmd.env_remove("SATCHEL_CONFIG")
        .env_remove("SATCHEL_FORMAT")
        .env_remove("SATCHEL_DEBUG");
    cmd
}

#[test]
fn version_prints_crate_version() {
    satchel()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cache_path_uses_custom_config() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "v1");

    let assert = satchel()
        .arg("cache")
        .arg("path")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(stdout.contains("data"));
    assert!(stdout.trim().ends_with("data"));

    Ok(())
}

#[test]
fn cache_status_on_fresh_dir_is_empty() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "v1");

    satchel()
        .arg("cache")
        .arg("status")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:        0"));

    Ok(())
}

#[test]
fn cache_status_json_is_parseable() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "v1");

    let assert = satchel()
        .arg("cache")
        .arg("status")
        .arg("--config")
        .arg(&config_path)
        .arg("--format")
        .arg("json")
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout)?;
    assert_eq!(json["total_entries"], 0);
    assert_eq!(json["stores"], 0);

    Ok(())
}

#[test]
fn queue_list_on_fresh_dir_is_empty() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "v1");

    satchel()
        .arg("queue")
        .arg("list")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending mutations"));

    Ok(())
}

#[test]
fn queue_purge_on_empty_queue() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "v1");

    satchel()
        .arg("queue")
        .arg("purge")
        .arg("--yes")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("already empty"));

    Ok(())
}

#[test]
fn status_shows_backend_and_version() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "v42");

    let assert = satchel()
        .arg("status")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(stdout.contains("https://backend.satchel.app"));
    assert!(stdout.contains("v42"));
    assert!(stdout.contains("Pending mutations"));

    Ok(())
}

#[test]
fn status_json_reports_quota() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config_path = write_config(temp.path(), "v1");

    let assert = satchel()
        .arg("status")
        .arg("--config")
        .arg(&config_path)
        .arg("--format")
        .arg("json")
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout)?;
    assert_eq!(json["quota"]["quota_bytes"], 1048576);
    assert!(json["quota"]["used_bytes"].as_u64().is_some());

    Ok(())
}
