use std::io::Write;
use std::process::{Command, Stdio};

fn expected_with_newline(expected: &str) -> String {
    format!("{}\n", expected.trim_end_matches('\n'))
}

#[test]
fn cli_reads_file_path() {
    let output = Command::new(env!("CARGO_BIN_EXE_page_dom"))
        .arg(".update-components-actor__title .t-bold")
        .arg("tests/fixtures/html/feed-items.html")
        .output()
        .expect("run CLI");

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let expected = include_str!("fixtures/expected/feed-items.txt");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        expected_with_newline(expected),
    );
}

#[test]
fn cli_reads_stdin_when_no_file() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_page_dom"))
        .arg("h1.break-words + div.text-body-medium")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");

    let html = include_str!("fixtures/html/profile-headline.html");
    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(html.as_bytes())
        .expect("write stdin");

    let output = child.wait_with_output().expect("read CLI output");
    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let expected = include_str!("fixtures/expected/profile-headline.txt");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        expected_with_newline(expected),
    );
}

#[test]
fn cli_rejects_invalid_selector() {
    let output = Command::new(env!("CARGO_BIN_EXE_page_dom"))
        .arg("a[")
        .arg("tests/fixtures/html/feed-items.html")
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid selector"), "stderr: {stderr}");
}
