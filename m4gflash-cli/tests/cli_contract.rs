//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, std::path::Path, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("m4gflash");
    cmd.env_remove("M4GFLASH_PORT")
        .env_remove("M4GFLASH_CATALOG")
        .env_remove("RUST_LOG")
        .env("M4GFLASH_NON_INTERACTIVE", "true");
    cmd
}

fn write_manifest(dir: &Path) {
    fs::create_dir_all(dir.join("firmware")).expect("firmware dir should be created");
    fs::write(
        dir.join("firmware/manifest.json"),
        r#"{
            "defaultBaud": 460800,
            "packages": [
                {
                    "id": "blink",
                    "name": "Blink",
                    "chipFamily": "ESP32-S3",
                    "images": [
                        { "path": "firmware/boot.bin", "address": "0x0" },
                        { "path": "firmware/app.bin", "address": "0x10000" }
                    ]
                }
            ]
        }"#,
    )
    .expect("manifest should be written");
    fs::write(dir.join("firmware/boot.bin"), [0xE9u8; 16]).expect("boot image should be written");
    fs::write(dir.join("firmware/app.bin"), [0u8; 32]).expect("app image should be written");
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("m4gflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("m4gflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("m4gflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::contains("m4gflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_valid_json() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json", "--all"])
        .output()
        .expect("command should execute");

    // Enumeration can fail on hosts without serial support; only check the shape when it works
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value =
            serde_json::from_str(&stdout).expect("stdout should be a single JSON document");
        assert_eq!(parsed["ok"], true);
        assert!(parsed["data"]["ports"].is_array());
    }
}

#[test]
fn catalog_with_missing_manifest_warns_and_succeeds() {
    let dir = tempdir().expect("tempdir should be created");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--catalog", dir.path().to_str().unwrap(), "catalog"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("manifest"));
}

#[test]
fn catalog_json_lists_packages() {
    let dir = tempdir().expect("tempdir should be created");
    write_manifest(dir.path());

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args(["--catalog", dir.path().to_str().unwrap(), "catalog", "--json"])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["data"]["defaultBaud"], 460_800);
    assert_eq!(parsed["data"]["packages"][0]["id"], "blink");
    assert_eq!(parsed["data"]["packages"][0]["default"], true);
    assert!(parsed["data"]["warning"].is_null());
}

#[test]
fn plan_without_source_is_usage_error() {
    let mut cmd = cli_cmd();
    cmd.arg("plan")
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn plan_file_only_option_requires_file() {
    let mut cmd = cli_cmd();
    cmd.args(["plan", "--package", "blink", "--erase-all"])
        .assert()
        .code(2);
}

#[test]
fn plan_missing_file_fails_with_clean_stdout() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("missing.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["plan", "--file", missing.to_str().unwrap(), "--json"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn plan_invalid_address_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir.path().join("app.bin");
    fs::write(&file, [0u8; 8]).expect("binary should be written");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args([
            "plan",
            "--file",
            file.to_str().unwrap(),
            "--address",
            "0xZZ",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("address"));
}

#[test]
fn plan_file_json_is_valid_json_without_extra_lines() {
    let dir = tempdir().expect("tempdir should be created");
    let file = dir.path().join("app.bin");
    fs::write(&file, [0u8; 24]).expect("binary should be written");

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args([
            "plan",
            "--file",
            file.to_str().unwrap(),
            "--address",
            "0x10000",
            "--json",
        ])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert_eq!(parsed["data"]["totalBytes"], 24);
    assert_eq!(parsed["data"]["files"][0]["address"], "0x10000");
}

#[test]
fn plan_package_fetches_every_image() {
    let dir = tempdir().expect("tempdir should be created");
    write_manifest(dir.path());

    let mut cmd = cli_cmd();
    let output = cmd
        .current_dir(dir.path())
        .args([
            "--catalog",
            dir.path().to_str().unwrap(),
            "plan",
            "--package",
            "blink",
            "--json",
        ])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["data"]["files"].as_array().map(Vec::len), Some(2));
    assert_eq!(parsed["data"]["files"][1]["address"], "0x10000");
    assert_eq!(parsed["data"]["totalBytes"], 48);
}

#[test]
fn plan_unknown_package_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    write_manifest(dir.path());

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args([
            "--catalog",
            dir.path().to_str().unwrap(),
            "plan",
            "--package",
            "nope",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown package"));
}

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command")
        .assert()
        .code(2);
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.args(["list-ports", "--invalid-flag"])
        .assert()
        .code(2);
}

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("catalgo")
        .assert()
        .failure()
        .stderr(predicate::str::contains("catalog"));
}

#[test]
fn reclaim_missing_port_fails_without_prompting() {
    let mut cmd = cli_cmd();
    cmd.args(["--port", "/dev/m4gflash-does-not-exist", "reclaim"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}
