use assert_cmd::Command;
use predicates::prelude::*;

fn stackguard() -> Command {
    let mut cmd = Command::cargo_bin("stackguard").expect("stackguard binary should build");
    cmd.env_remove("STACKGUARD_CONFIG_PATH")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn stackguard_help_command_succeeds() {
    stackguard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("persist"));
}

#[cfg(unix)]
#[test]
fn resolve_prints_absolute_paths() {
    stackguard()
        .args(["resolve", "sh"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^sh\t/\S*/sh\n$").unwrap());
}

#[test]
fn resolve_rejects_shell_builtins() {
    stackguard()
        .args(["resolve", "sh", "echo"])
        .assert()
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::starts_with("stackguard: "))
        .stderr(predicate::str::contains("builtin"));
}

#[test]
fn resolve_rejects_invalid_identifiers() {
    stackguard()
        .args(["resolve", "--", "9lives"])
        .assert()
        .code(2);
}

#[test]
fn restore_rejects_arbitrary_code() {
    stackguard()
        .args(["restore", "rm -rf /tmp/nothing"])
        .assert()
        .code(5)
        .stdout(predicate::str::is_empty());
}

#[test]
fn resolve_without_names_warns_unless_quiet() {
    stackguard()
        .arg("resolve")
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("without any command names"));

    stackguard()
        .args(["resolve", "-q"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}
