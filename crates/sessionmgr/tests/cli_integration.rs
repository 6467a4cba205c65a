//! CLI integration tests for the sessionmgr command-line interface.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the sessionmgr binary.
fn sessionmgr() -> Command {
    Command::cargo_bin("sessionmgr").unwrap()
}

/// Write a config that keeps logs inside `dir` and a script next to it.
fn fixture(dir: &Path, script: &str) -> (String, String) {
    let config = dir.join("sessionmgr.toml");
    fs::write(
        &config,
        format!(
            r#"
[session]
test_mode = true

[logging]
log_dir = "{}"

[[modules]]
handler = "notes"
action = "edit"
"#,
            dir.join("logs").display()
        ),
    )
    .unwrap();

    let script_path = dir.join("script.json");
    fs::write(&script_path, script).unwrap();
    (
        config.display().to_string(),
        script_path.display().to_string(),
    )
}

const START_SCRIPT: &str = r#"[
    {
        "story": "notes",
        "start": true,
        "commands": [
            {"type": "add_mod", "mod_name": ["root"], "intent": {"handler": "notes"}}
        ]
    }
]"#;

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    sessionmgr()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("stories"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    sessionmgr()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sessionmgr"));
}

#[test]
fn test_run_requires_script() {
    sessionmgr()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--script"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_script_json_output() {
    let dir = TempDir::new().unwrap();
    let (config, script) = fixture(dir.path(), START_SCRIPT);

    sessionmgr()
        .args(["--config", &config, "--json", "run", "--script", &script])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"ok\""))
        .stdout(predicate::str::contains("\"state\": \"running\""));
}

#[test]
fn test_run_reports_failed_batch() {
    let dir = TempDir::new().unwrap();
    let (config, script) = fixture(
        dir.path(),
        r#"[{"story": "s", "commands": [{"type": "remove_mod", "mod_name": ["ghost"]}]}]"#,
    );

    sessionmgr()
        .args(["--config", &config, "run", "--script", &script])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid_mod"));
}

#[test]
fn test_run_rejects_malformed_script() {
    let dir = TempDir::new().unwrap();
    let (config, script) = fixture(dir.path(), "{ not json");

    sessionmgr()
        .args(["--config", &config, "run", "--script", &script])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid script"));
}

#[test]
fn test_stories_lists_created_stories() {
    let dir = TempDir::new().unwrap();
    let (config, script) = fixture(dir.path(), START_SCRIPT);

    sessionmgr()
        .args(["--config", &config, "stories", "--script", &script])
        .assert()
        .success()
        .stdout(predicate::str::contains("notes"))
        .stdout(predicate::str::contains("running"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_prints_effective_config() {
    let dir = TempDir::new().unwrap();
    let (config, _) = fixture(dir.path(), START_SCRIPT);

    sessionmgr()
        .args(["--config", &config, "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[session]"))
        .stdout(predicate::str::contains("test_mode = true"))
        .stdout(predicate::str::contains("handler = \"notes\""));
}

#[test]
fn test_config_init_writes_loadable_file() {
    let dir = TempDir::new().unwrap();
    let (config, script) = fixture(dir.path(), START_SCRIPT);
    let written = dir.path().join("nested").join("written.toml");
    let written_arg = written.display().to_string();

    sessionmgr()
        .args(["--config", &config, "config", "init", "--path", &written_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    let contents = fs::read_to_string(&written).unwrap();
    assert!(contents.contains("test_mode = true"));

    // The written file drives a run on its own.
    sessionmgr()
        .args(["--config", &written_arg, "stories", "--script", &script])
        .assert()
        .success()
        .stdout(predicate::str::contains("notes"));
}

#[test]
fn test_config_init_keeps_existing_file() {
    let dir = TempDir::new().unwrap();
    let (config, _) = fixture(dir.path(), START_SCRIPT);
    let existing = dir.path().join("existing.toml");
    fs::write(&existing, "# keep me\n").unwrap();
    let existing_arg = existing.display().to_string();

    sessionmgr()
        .args(["--config", &config, "config", "init", "--path", &existing_arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
    assert_eq!(fs::read_to_string(&existing).unwrap(), "# keep me\n");

    sessionmgr()
        .args([
            "--config",
            &config,
            "config",
            "init",
            "--path",
            &existing_arg,
            "--force",
        ])
        .assert()
        .success();
    assert!(
        fs::read_to_string(&existing)
            .unwrap()
            .contains("test_mode = true")
    );
}
