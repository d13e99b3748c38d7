use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_execute_init_creates_nodefetch_toml() {
    let dir = tempdir().unwrap();
    let dir_path = dir.path();

    let mut cmd = Command::cargo_bin("nodefetch").unwrap();
    cmd.current_dir(dir_path)
        .arg("init")
        .assert()
        .success();

    let toml_path = dir_path.join("nodefetch.toml");
    assert!(toml_path.exists());
    let content = fs::read_to_string(toml_path).unwrap();
    assert!(content.contains("[settings]"));
    assert!(content.contains("[[target]]"));
    assert!(content.contains("osmosisd"));
}

#[test]
fn test_execute_init_refuses_to_overwrite() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    fs::write(&config, "# mine").unwrap();

    Command::cargo_bin("nodefetch").unwrap()
        .current_dir(dir.path())
        .args(["--config", "custom.toml", "init"])
        .assert()
        .failure();
    assert_eq!(fs::read_to_string(&config).unwrap(), "# mine");

    Command::cargo_bin("nodefetch").unwrap()
        .current_dir(dir.path())
        .args(["--config", "custom.toml", "init", "--force"])
        .assert()
        .success();
    assert!(fs::read_to_string(&config).unwrap().contains("[[target]]"));
}

#[test]
fn test_execute_platform() {
    let output = Command::cargo_bin("nodefetch").unwrap()
        .arg("platform")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let output_str = String::from_utf8_lossy(&output);
    assert!(output_str.contains("os aliases"));
    assert!(output_str.contains("arch aliases"));
    assert!(output_str.contains('/'));
}

#[cfg(unix)]
#[test]
fn test_execute_find_reports_conventional_location() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let bin = dir.path().join("build").join("bin");
    fs::create_dir_all(&bin).unwrap();
    let exe = bin.join("mytarget");
    fs::write(&exe, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

    let output = Command::cargo_bin("nodefetch").unwrap()
        .env("GOBIN", dir.path().join("no-gobin"))
        .args(["find", dir.path().to_str().unwrap(), "mytarget"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let output_str = String::from_utf8_lossy(&output);
    assert!(output_str.contains("build/bin/mytarget"));
    assert!(output_str.contains("conventional location"));
}

#[test]
fn test_execute_status_without_installs() {
    let dir = tempdir().unwrap();
    let bin_dir = dir.path().join("bin");
    let config = format!(
        "[settings]\nbinary_dir = {:?}\n\n[[target]]\nname = \"gaia\"\nbinary = \"gaiad\"\nchain = \"cosmoshub\"\n",
        bin_dir.to_str().unwrap()
    );
    fs::write(dir.path().join("nodefetch.toml"), config).unwrap();

    let output = Command::cargo_bin("nodefetch").unwrap()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let output_str = String::from_utf8_lossy(&output);
    assert!(output_str.contains("gaia"));
    assert!(output_str.contains("not installed"));
}

#[test]
fn test_execute_status_shows_install_record() {
    use nodefetch::state::{InstallState, ResolvedBinary, STATE_FILE};
    use nodefetch::SourceType;

    let dir = tempdir().unwrap();
    let bin_dir = dir.path().join("bin");
    fs::create_dir_all(&bin_dir).unwrap();
    fs::write(bin_dir.join("gaiad"), "binary").unwrap();
    let mut state = InstallState::default();
    state.record("gaia", ResolvedBinary {
        path: bin_dir.join("gaiad"),
        version: Some("v15.0.0".to_string()),
        installed_at: chrono::Utc::now(),
        sha256: "abc123".to_string(),
        strategy: SourceType::Registry,
    });
    state.save(bin_dir.join(STATE_FILE)).unwrap();

    let config = format!(
        "[settings]\nbinary_dir = {:?}\n\n[[target]]\nname = \"gaia\"\nbinary = \"gaiad\"\nchain = \"cosmoshub\"\n",
        bin_dir.to_str().unwrap()
    );
    fs::write(dir.path().join("nodefetch.toml"), config).unwrap();

    let output = Command::cargo_bin("nodefetch").unwrap()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let output_str = String::from_utf8_lossy(&output);
    assert!(output_str.contains("   version: v15.0.0"));
    assert!(output_str.contains("\n   sha256: abc123\n"));
    assert!(!output_str.contains('#'));
}

#[test]
fn test_acquire_unknown_target_fails() {
    let dir = tempdir().unwrap();
    let config = format!(
        "[settings]\nbinary_dir = {:?}\n",
        dir.path().join("bin").to_str().unwrap()
    );
    fs::write(dir.path().join("nodefetch.toml"), config).unwrap();

    Command::cargo_bin("nodefetch").unwrap()
        .current_dir(dir.path())
        .args(["acquire", "--name", "missing"])
        .assert()
        .failure();
}
