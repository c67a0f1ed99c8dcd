use std::io::Write;
use std::process::{Command, Output, Stdio};

fn tama() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tama"))
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

fn script(source: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".scm").tempfile().expect("create temp file");
    file.write_all(source.as_bytes()).expect("write script");
    file
}

// --- running code ---

#[test]
fn eval_prints_the_result() {
    let out = tama().args(["-e", "(+ 1 2)"]).output().expect("failed to run tama");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "3");
}

#[test]
fn eval_of_undefined_prints_nothing() {
    let out = tama().args(["-e", "(if #f 1)"]).output().expect("failed to run tama");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "");
}

#[test]
fn runs_a_script_file() {
    let file = script("(define (sq x) (* x x))\n(display (sq 4))\n(newline)\n(sq 5)\n");
    let out = tama().arg(file.path()).output().expect("failed to run tama");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "16\n25\n");
}

#[test]
fn missing_file_fails() {
    let out = tama().arg("/definitely/not/here.scm").output().expect("failed to run tama");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("cannot read"), "stderr: {}", stderr(&out));
}

#[test]
fn repl_reads_forms_across_lines() {
    let mut child = tama()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run tama");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"(define a 2)\n(+ a\n   3)\n")
        .expect("write stdin");
    let out = child.wait_with_output().expect("wait for tama");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "2\n5\n");
}

// --- emitting bytecode ---

#[test]
fn emit_bytecode_listing() {
    let out = tama().args(["--emit", "bytecode", "-e", "(define x \"hi\")"]).output().expect("failed to run tama");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("LOADK"), "got: {}", text);
    assert!(text.contains("SETGLOBAL"), "got: {}", text);
}

#[test]
fn emit_json_listing() {
    let out = tama().args(["--emit", "json", "-e", "(lambda (a) a)"]).output().expect("failed to run tama");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("valid JSON");
    assert!(v["code"].is_array());
    assert_eq!(v["children"][0]["params"][0], "a");
}

#[test]
fn emit_does_not_run_the_program() {
    let out = tama().args(["--emit", "bytecode", "-e", "(display 1)"]).output().expect("failed to run tama");
    assert!(out.status.success());
    assert!(!stdout(&out).starts_with('1'));
}

// --- errors ---

#[test]
fn runtime_error_exits_with_one() {
    let out = tama().args(["-e", "(car 1)"]).output().expect("failed to run tama");
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[TAMA-R001]"), "stderr: {}", err);
    assert!(err.contains("car: expected a pair, got 1"), "stderr: {}", err);
}

#[test]
fn parse_error_shows_the_source_line() {
    let out = tama().args(["-e", "(define a\n  (b 1)"]).output().expect("failed to run tama");
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[TAMA-P002]"), "stderr: {}", err);
    assert!(err.contains("--> 1:1"), "stderr: {}", err);
    assert!(!err.contains("\x1b["), "no colour when stderr is not a terminal");
}

#[test]
fn json_errors() {
    let out = tama().args(["--json", "-e", "(undefined-thing)"]).output().expect("failed to run tama");
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_str(stderr(&out).trim()).expect("valid JSON");
    assert_eq!(v["code"], "TAMA-R003");
    assert_eq!(v["phase"], "runtime");
    assert_eq!(v["message"], "unbound variable: undefined-thing");
}

#[test]
fn stack_size_flag_limits_recursion() {
    let out = tama()
        .args(["--stack-size", "64", "-e", "(define (f n) (+ 1 (f n))) (f 1)"])
        .output()
        .expect("failed to run tama");
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("TAMA-R005"), "stderr: {}", err);
    assert!(err.contains("--stack-size"), "stderr: {}", err);
}

#[test]
fn max_depth_flag_limits_recursion() {
    let out = tama()
        .args(["--max-depth", "8", "-e", "(define (f n) (+ 1 (f n))) (f 1)"])
        .output()
        .expect("failed to run tama");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("TAMA-R006"), "stderr: {}", stderr(&out));
}
