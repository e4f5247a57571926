//! Integration tests for the captive CLI.
//!
//! Every test wraps a standard Unix tool (`cat`, `tr`, `sh`) so that the
//! whole path from argv to child process to stdout is exercised.

use std::io::Read;

use assert_cmd::Command;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::MultiGzDecoder;
use predicates::prelude::*;
use tempfile::tempdir;

/// Get a command for the captive binary.
fn captive() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("captive").unwrap()
}

fn encode_documents(documents: &[&str]) -> String {
    documents
        .iter()
        .map(|doc| format!("{}\n", STANDARD.encode(doc)))
        .collect()
}

fn decode_documents(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| String::from_utf8(STANDARD.decode(line).unwrap()).unwrap())
        .collect()
}

fn sorted_lines(output: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8_lossy(output)
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays() {
    captive()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("wrap-doc"))
        .stdout(predicate::str::contains("wrap-fold"))
        .stdout(predicate::str::contains("wrap-cache"))
        .stdout(predicate::str::contains("wrap-pool"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_version_displays() {
    captive()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("captive"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_command_is_usage_error() {
    captive()
        .arg("wrap-doc")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("COMMAND"));
}

// ============================================================================
// wrap-doc Tests
// ============================================================================

#[test]
fn test_wrap_doc_identity_round_trip() {
    let input = encode_documents(&["first line\nsecond line\n", "no trailing newline", "", "\n\n"]);

    captive()
        .args(["wrap-doc", "cat"])
        .write_stdin(input.clone())
        .assert()
        .success()
        .stdout(input);
}

#[test]
fn test_wrap_doc_transforms_lines() {
    let input = encode_documents(&["hello\nworld\n", "again"]);

    let output = captive()
        .args(["wrap-doc", "tr", "a-z", "A-Z"])
        .write_stdin(input)
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(
        decode_documents(&output.stdout),
        vec!["HELLO\nWORLD\n".to_string(), "AGAIN".to_string()]
    );
}

#[test]
fn test_wrap_doc_launch_failure() {
    captive()
        .args(["wrap-doc", "/nonexistent/binary"])
        .write_stdin(encode_documents(&["x\n"]))
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to launch"));
}

#[test]
fn test_wrap_doc_invalid_base64() {
    captive()
        .args(["wrap-doc", "cat"])
        .write_stdin("not base64!\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("malformed input at unit 1"));
}

#[test]
fn test_wrap_doc_under_production() {
    captive()
        .args(["wrap-doc", "head", "-n", "1"])
        .write_stdin(encode_documents(&["a\n", "b\nc\n"]))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("stopped producing"));
}

#[test]
fn test_wrap_doc_over_production() {
    captive()
        .args(["wrap-doc", "sh", "-c", "cat; echo extra"])
        .write_stdin(encode_documents(&["a\n"]))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("more output than it was given"));
}

#[test]
fn test_child_exit_status_is_propagated() {
    let input = encode_documents(&["a\n"]);

    captive()
        .args(["wrap-doc", "sh", "-c", "cat; exit 7"])
        .write_stdin(input.clone())
        .assert()
        .code(7)
        .stdout(input);
}

#[test]
fn test_child_killed_by_signal() {
    captive()
        .args(["wrap-doc", "sh", "-c", "cat; kill -9 $$"])
        .write_stdin(encode_documents(&["a\n"]))
        .assert()
        .code(128 + 9);
}

// ============================================================================
// wrap-fold Tests
// ============================================================================

#[test]
fn test_wrap_fold_restores_lines() {
    let input = "the quick brown fox, jumps over the lazy dog.\n\
                 /usr/local/share/some/long/path/name\n\
                 unbreakablewordthatislongerthanthewidth\n\
                 \n";

    captive()
        .args(["wrap-fold", "-w", "8", "cat"])
        .write_stdin(input)
        .assert()
        .success()
        .stdout(input);
}

#[test]
fn test_wrap_fold_child_sees_short_lines() {
    // The child answers with each piece's length; -s keeps the spaces out of the pieces.
    let output = captive()
        .args([
            "wrap-fold",
            "-w",
            "6",
            "-s",
            "sh",
            "-c",
            "while IFS= read -r l; do echo \"${#l}\"; done",
        ])
        .write_stdin("aaaa bbbb cccc\n")
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "4 4 4\n");
}

#[test]
fn test_wrap_fold_strip_delimiters_restores_lines() {
    // Delimiters withheld from the child come back in the output.
    let input = "one two, three: four-five six.seven\nab cd\n";

    captive()
        .args(["wrap-fold", "-s", "-w", "5", "--", "cat"])
        .write_stdin(input)
        .assert()
        .success()
        .stdout(input);
}

#[test]
fn test_wrap_fold_help_describes_strip() {
    captive()
        .args(["wrap-fold", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Do not pass the delimiters"));
}

#[test]
fn test_wrap_fold_rejects_zero_width() {
    captive()
        .args(["wrap-fold", "-w", "0", "cat"])
        .write_stdin("x\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("width"));
}

// ============================================================================
// wrap-cache Tests
// ============================================================================

#[test]
fn test_wrap_cache_calls_child_once_per_key() {
    let dir = tempdir().unwrap();
    let calls = dir.path().join("calls");
    let script = format!(
        "while IFS= read -r l; do echo x >> '{}'; echo \"$l!\"; done",
        calls.display()
    );

    captive()
        .args(["wrap-cache", "sh", "-c", &script])
        .write_stdin("a\nb\na\nc\na\n")
        .assert()
        .success()
        .stdout("a!\nb!\na!\nc!\na!\n");

    let recorded = std::fs::read_to_string(&calls).unwrap();
    assert_eq!(recorded.lines().count(), 3);
}

#[test]
fn test_wrap_cache_by_key_field() {
    // Lines sharing the first field share an answer, even if the rest differs.
    captive()
        .args(["wrap-cache", "-k", "1", "-t", ",", "tr", "a-z", "A-Z"])
        .write_stdin("k1,one\nk2,two\nk1,other\n")
        .assert()
        .success()
        .stdout("K1,ONE\nK2,TWO\nK1,ONE\n");
}

// ============================================================================
// wrap-pool Tests
// ============================================================================

#[test]
fn test_wrap_pool_lines_from_stdin() {
    let input: String = (0..500).map(|i| format!("line {i}\n")).collect();

    let output = captive()
        .args(["wrap-pool", "-j", "3", "--framing", "lines", "--", "cat"])
        .write_stdin(input.clone())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(sorted_lines(&output.stdout), sorted_lines(input.as_bytes()));
}

#[test]
fn test_wrap_pool_files_with_compression() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    std::fs::write(&first, "a\nb\n").unwrap();
    std::fs::write(&second, "c\n").unwrap();

    let output = captive()
        .args(["wrap-pool", "-j", "2", "-z", "--framing", "lines", "-i"])
        .arg(&first)
        .arg(&second)
        .args(["--", "tr", "a-z", "A-Z"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let mut text = String::new();
    MultiGzDecoder::new(output.stdout.as_slice())
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(sorted_lines(text.as_bytes()), vec!["A", "B", "C"]);
}

#[test]
fn test_wrap_pool_warc_records() {
    let record = |body: &str| {
        format!(
            "WARC/1.0\r\nContent-Length: {}\r\n\r\n{}\r\n\r\n",
            body.len(),
            body
        )
    };
    let input = format!("{}{}", record("one"), record("two\nlines"));

    let output = captive()
        .args(["wrap-pool", "-j", "1", "--", "cat"])
        .write_stdin(input.clone())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), input);
}

#[test]
fn test_wrap_pool_child_failure() {
    captive()
        .args(["wrap-pool", "-j", "2", "--framing", "lines", "--", "sh", "-c", "cat; exit 3"])
        .write_stdin("a\nb\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("exited with code 3"));
}

#[test]
fn test_wrap_pool_missing_input_file() {
    captive()
        .args(["wrap-pool", "-i", "/nonexistent/input.warc", "--", "cat"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to open"));
}

// ============================================================================
// Completions Tests
// ============================================================================

#[test]
fn test_completions_bash() {
    captive()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_captive()"));
}

#[test]
fn test_completions_zsh() {
    captive()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef captive"));
}

// ============================================================================
// Global Options Tests
// ============================================================================

#[test]
fn test_quiet_by_default() {
    captive()
        .args(["wrap-doc", "cat"])
        .env_remove("RUST_LOG")
        .env_remove("CAPTIVE_LOG")
        .write_stdin(encode_documents(&["a\n"]))
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_verbose_logs_completion() {
    captive()
        .args(["-v", "--log-format", "compact", "wrap-doc", "cat"])
        .write_stdin(encode_documents(&["a\n"]))
        .assert()
        .success()
        .stderr(predicate::str::contains("Pipeline finished"));
}

#[test]
fn test_unwritable_log_file_is_reported() {
    let dir = tempdir().unwrap();
    let not_a_dir = dir.path().join("plain");
    std::fs::write(&not_a_dir, "").unwrap();

    captive()
        .arg("--log-file")
        .arg(not_a_dir.join("captive.log"))
        .args(["wrap-doc", "cat"])
        .write_stdin(encode_documents(&["a\n"]))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to open log file"))
        .stderr(predicate::str::contains("panicked").not());
}

#[test]
fn test_verbose_conflicts_with_quiet() {
    captive()
        .args(["-v", "-q", "wrap-doc", "cat"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
