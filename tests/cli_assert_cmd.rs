use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn stackguard(workdir: &TempDir) -> Result<Command> {
    let mut cmd = Command::cargo_bin("stackguard")?;
    cmd.current_dir(workdir.path())
        .env_remove("STACKGUARD_CONFIG_PATH")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

#[test]
fn persist_output_is_accepted_by_restore() -> Result<()> {
    let workdir = TempDir::new()?;

    let output = stackguard(&workdir)?
        .args(["persist", "MEDIA_ROOT", "NOT_SET_ANYWHERE"])
        .env("MEDIA_ROOT", "/srv/media library's $HOME")
        .env_remove("NOT_SET_ANYWHERE")
        .output()?;
    assert!(output.status.success());
    let snippet = String::from_utf8(output.stdout)?;
    assert_eq!(snippet.lines().count(), 1, "unbound names are skipped");
    assert!(snippet.contains("MEDIA_ROOT="));

    stackguard(&workdir)?
        .args(["restore", snippet.as_str()])
        .assert()
        .success()
        .stdout(snippet.clone());

    Ok(())
}

#[test]
fn persist_appends_to_prior_state_from_a_file() -> Result<()> {
    let workdir = TempDir::new()?;
    let first = stackguard(&workdir)?
        .args(["persist", "STACK_HOST"])
        .env("STACK_HOST", "media.local")
        .output()?;
    assert!(first.status.success());
    let prior = workdir.path().join("state.sh");
    fs::write(&prior, &first.stdout)?;

    let output = stackguard(&workdir)?
        .args(["persist", "--append-file", "state.sh", "STACK_PORT"])
        .env("STACK_PORT", "2222")
        .output()?;
    assert!(output.status.success());
    let combined = String::from_utf8(output.stdout)?;
    let names: Vec<_> = combined
        .lines()
        .map(|line| line.contains("STACK_HOST"))
        .collect();
    assert_eq!(names, [true, false], "prior clauses come first");

    Ok(())
}

#[test]
fn persist_without_names_re_emits_the_prior_state() -> Result<()> {
    let workdir = TempDir::new()?;
    let first = stackguard(&workdir)?
        .args(["persist", "STACK_HOST"])
        .env("STACK_HOST", "media.local")
        .output()?;
    let prior = String::from_utf8(first.stdout)?;

    stackguard(&workdir)?
        .args(["persist", "--append", prior.as_str()])
        .assert()
        .success()
        .stdout(prior.clone());

    Ok(())
}

#[test]
fn persist_reports_collisions() -> Result<()> {
    let workdir = TempDir::new()?;
    let first = stackguard(&workdir)?
        .args(["persist", "STACK_HOST"])
        .env("STACK_HOST", "media.local")
        .output()?;
    let prior = String::from_utf8(first.stdout)?;

    stackguard(&workdir)?
        .args(["persist", "--append", prior.as_str(), "STACK_HOST"])
        .env("STACK_HOST", "other.local")
        .assert()
        .code(5)
        .stderr(predicate::str::contains("STACK_HOST"));

    Ok(())
}

#[test]
fn persist_rejects_reserved_names_and_double_prior_state() -> Result<()> {
    let workdir = TempDir::new()?;
    fs::write(workdir.path().join("state.sh"), "")?;

    stackguard(&workdir)?
        .args(["persist", "__output"])
        .assert()
        .code(4);

    stackguard(&workdir)?
        .args(["persist", "--append", "", "--append-file", "state.sh", "HOME"])
        .assert()
        .code(6);

    Ok(())
}

#[cfg(unix)]
#[test]
fn exec_dry_run_prints_the_resolved_invocation() -> Result<()> {
    let workdir = TempDir::new()?;
    stackguard(&workdir)?
        .args(["exec", "--dry-run", "sh", "--", "-c", "exit 3"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^/\S*/sh -c 'exit 3'\n$")?);
    Ok(())
}

#[cfg(unix)]
#[test]
fn exec_propagates_the_child_exit_code() -> Result<()> {
    let workdir = TempDir::new()?;
    stackguard(&workdir)?
        .args(["exec", "sh", "--", "-c", "exit 3"])
        .assert()
        .code(3);
    Ok(())
}

#[cfg(unix)]
#[test]
fn exec_children_can_log_through_the_fifo() -> Result<()> {
    let workdir = TempDir::new()?;
    stackguard(&workdir)?
        .args([
            "exec",
            "sh",
            "--",
            "-c",
            r#"echo "via fifo" > "$STACKGUARD_LOG_FIFO""#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("via fifo"));
    Ok(())
}

#[test]
fn config_file_restricts_the_search_path() -> Result<()> {
    let workdir = TempDir::new()?;
    let empty_bin = workdir.path().join("bin");
    fs::create_dir(&empty_bin)?;
    fs::write(
        workdir.path().join("stackguard.toml"),
        format!("[guard]\nsearch_path = [{:?}]\n", empty_bin.display().to_string()),
    )?;

    stackguard(&workdir)?
        .args(["resolve", "sh"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not found"));
    Ok(())
}
