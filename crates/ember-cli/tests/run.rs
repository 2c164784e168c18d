//! Process-level tests for the `ember` binary: exit codes and stdout/stderr
//! for running scripts.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn script(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn running_a_valid_script_prints_its_output_and_exits_zero() {
    let file = script("print 1 + 2;");
    Command::cargo_bin("ember")
        .unwrap()
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));
}

#[test]
fn a_syntax_error_exits_65_and_reports_on_stderr() {
    let file = script("var x = ;");
    Command::cargo_bin("ember")
        .unwrap()
        .arg(file.path())
        .assert()
        .code(65)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn a_type_mismatch_at_runtime_exits_70() {
    let file = script("1 + \"a\";");
    Command::cargo_bin("ember")
        .unwrap()
        .arg(file.path())
        .assert()
        .code(70);
}

#[test]
fn missing_script_file_exits_nonzero_without_panicking() {
    Command::cargo_bin("ember")
        .unwrap()
        .arg("no-such-script.ember")
        .assert()
        .failure();
}

#[test]
fn dump_prints_a_disassembly_header_instead_of_running_the_program() {
    let file = script("print 1 + 2;");
    Command::cargo_bin("ember")
        .unwrap()
        .arg(file.path())
        .arg("--dump")
        .assert()
        .success()
        .stdout(predicate::str::contains("== script =="))
        .stdout(predicate::str::contains("OP_PRINT"))
        // The dump never runs the chunk, so the printed "3" the program
        // would otherwise produce must not appear on its own line.
        .stdout(predicate::str::contains("\n3\n").not());
}
