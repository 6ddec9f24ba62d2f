use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn respawn() -> Command {
    let mut cmd = Command::cargo_bin("respawn").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("RESPAWN_LOG");
    cmd
}

#[test]
fn test_cli_version() {
    respawn()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("respawn"));
}

#[test]
fn test_cli_help() {
    respawn()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Keep a command running"))
        .stdout(predicate::str::contains("--min-uptime"));
}

#[test]
fn test_missing_command_fails() {
    respawn().args(["--max", "1"]).assert().failure();
}

#[test]
fn test_bad_env_flag_fails() {
    respawn()
        .args(["--env", "NOVALUE", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    respawn()
        .args(["--config"])
        .arg(temp_dir.path().join("nope.json"))
        .args(["--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[cfg(unix)]
#[test]
fn test_runs_until_restart_ceiling() {
    let output = respawn()
        .args(["--max", "3", "--", "sh", "-c", "echo run"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    assert_eq!(stdout.matches("run").count(), 3);
}

#[cfg(unix)]
#[test]
fn test_silent_suppresses_echo() {
    respawn()
        .args(["--max", "1", "--silent", "--", "sh", "-c", "echo quiet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("quiet").not());
}

#[cfg(unix)]
#[test]
fn test_env_and_cwd_reach_child() {
    let temp_dir = TempDir::new().unwrap();
    let expected = temp_dir.path().canonicalize().unwrap();
    respawn()
        .args(["--max", "1", "--env", "GREETING=hello", "--cwd"])
        .arg(temp_dir.path())
        .args(["--", "sh", "-c", "echo \"$GREETING $(pwd -P)\""])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("hello {}", expected.display())));
}

#[cfg(unix)]
#[test]
fn test_out_file_receives_output() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("out.log");
    let err = temp_dir.path().join("err.log");

    respawn()
        .args(["--max", "2", "--silent", "--out-file"])
        .arg(&out)
        .arg("--err-file")
        .arg(&err)
        .args(["--", "sh", "-c", "echo out; echo err >&2"])
        .assert()
        .success();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), "out\nout\n");
    assert_eq!(std::fs::read_to_string(&err).unwrap(), "err\nerr\n");
}

#[cfg(unix)]
#[test]
fn test_missing_script_exits_with_failure() {
    let temp_dir = TempDir::new().unwrap();
    respawn()
        .current_dir(&temp_dir)
        .args(["--", "node", "missing-script.js"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Target script does not exist: missing-script.js",
        ));
}

#[cfg(unix)]
#[test]
fn test_sigterm_stops_child_and_exits() {
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("respawn"))
        .args(["--", "sleep", "30"])
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(1000));
    let status = std::process::Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().unwrap() {
            break exit;
        }
        assert!(Instant::now() < deadline, "respawn did not exit after SIGTERM");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(exit.success());
}
