use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &std::path::Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("appstack.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

const VALID: &str = r#"
[app]
name = "demo"

[[service]]
name = "backend"
path = "backend"
command = "./server"
port = 3000

[[service]]
name = "frontend"
path = "frontend"
command = "node"
args = ["server.js"]
port = 3004
"#;

#[test]
fn validate_accepts_a_valid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), VALID);

    Command::cargo_bin("appstack")
        .unwrap()
        .args(["validate", "-f"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid (2 services)"));
}

#[test]
fn validate_rejects_duplicate_ports() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[app]
name = "demo"

[[service]]
name = "backend"
path = "backend"
command = "./server"
port = 3000

[[service]]
name = "frontend"
path = "frontend"
command = "node"
port = 3000
"#,
    );

    Command::cargo_bin("appstack")
        .unwrap()
        .args(["validate", "-f"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("port 3000"));
}

#[test]
fn missing_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("appstack")
        .unwrap()
        .current_dir(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no appstack.toml found"));
}

#[test]
fn doctor_reports_missing_working_directories() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), VALID);
    // Only the backend directory exists.
    std::fs::create_dir(dir.path().join("backend")).unwrap();

    Command::cargo_bin("appstack")
        .unwrap()
        .args(["doctor", "-f"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("[ok] backend"))
        .stdout(predicate::str::contains("working directory missing"));
}
