use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_all_subcommands() {
    Command::cargo_bin("ensemble")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("analyze"));
}

#[test]
fn version_flag_reports_the_crate() {
    Command::cargo_bin("ensemble")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ensemble"));
}

#[test]
fn analyze_requires_a_query() {
    Command::cargo_bin("ensemble")
        .unwrap()
        .arg("analyze")
        .assert()
        .failure()
        .stderr(predicate::str::contains("QUERY"));
}

#[test]
fn unknown_subcommand_fails() {
    Command::cargo_bin("ensemble")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}
