use std::io::Write;
use std::process::{Command, Output, Stdio};

const BIN: &str = env!("CARGO_BIN_EXE_pipesh");

fn session(input: &str) -> Output {
	session_bytes(input.as_bytes())
}

fn session_bytes(input: &[u8]) -> Output {
	let mut child = Command::new(BIN)
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.env_remove("RUST_LOG")
		.spawn()
		.unwrap();
	child.stdin.take().unwrap().write_all(input).unwrap();
	child.wait_with_output().unwrap()
}

fn text(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn prompt_and_pipeline() {
	let output = session("echo hello | tr a-z A-Z\n");
	let stdout = text(&output.stdout);
	assert!(stdout.starts_with("pipesh> "));
	assert!(stdout.contains("HELLO\n"));
	assert_eq!(output.status.code(), Some(0));
}

#[test]
fn exit_builtin_sets_status() {
	let output = session("exit 3\necho unreachable\n");
	assert_eq!(output.status.code(), Some(3));
	assert!(!text(&output.stdout).contains("unreachable"));
}

#[test]
fn parse_errors_do_not_end_the_session() {
	let output = session("ls >\na | | b\necho still here\n");
	let stderr = text(&output.stderr);
	assert!(stderr.contains("pipesh: syntax error: no file specified after '>'"));
	assert!(stderr.contains("pipesh: syntax error: empty pipeline stage"));
	assert!(text(&output.stdout).contains("still here\n"));
	assert_eq!(output.status.code(), Some(0));
}

#[test]
fn unknown_program_reports_and_continues() {
	let output = session("no-such-program-pipesh\n");
	assert!(text(&output.stderr).contains("pipesh: no-such-program-pipesh: command not found"));
	assert_eq!(output.status.code(), Some(127));
}

#[test]
fn cd_changes_directory_for_later_commands() {
	let dir = tempfile::tempdir().unwrap();
	let canonical = dir.path().canonicalize().unwrap();
	let output = session(&format!("cd {}\npwd\n", canonical.display()));
	assert!(text(&output.stdout).contains(&format!("{}\n", canonical.display())));
}

#[test]
fn single_command_mode() {
	let output = Command::new(BIN).args(["-c", "true | false"]).output().unwrap();
	assert_eq!(output.status.code(), Some(1));

	let output = Command::new(BIN).args(["-c", "cat |"]).output().unwrap();
	assert_eq!(output.status.code(), Some(255));
}

#[test]
fn stage_limit_is_configurable() {
	let output = Command::new(BIN).args(["--max-stages", "1", "-c", "true | true"]).output().unwrap();
	assert!(text(&output.stderr).contains("too many pipeline stages (max 1)"));
	assert_eq!(output.status.code(), Some(255));
}

#[test]
fn invalid_utf8_line_does_not_end_the_session() {
	let output = session_bytes(b"echo \xff\necho still-here\n");
	assert!(text(&output.stdout).contains("still-here\n"));
	assert_eq!(output.status.code(), Some(0));
}

#[test]
fn failed_redirect_prints_one_line() {
	let output = Command::new(BIN).args(["-c", "cat < /nonexistent/pipesh-input"]).env_remove("RUST_LOG").output().unwrap();
	let stderr = text(&output.stderr);
	assert_eq!(stderr.lines().count(), 1, "stderr was {:?}", stderr);
	assert!(stderr.starts_with("pipesh: /nonexistent/pipesh-input: "));
	assert_eq!(output.status.code(), Some(1));
}

#[test]
fn earlier_stage_failure_is_quiet() {
	let output = Command::new(BIN).args(["-c", "false | true"]).env_remove("RUST_LOG").output().unwrap();
	assert_eq!(text(&output.stderr), "");
	assert_eq!(output.status.code(), Some(0));
}

#[test]
fn unstartable_line_keeps_previous_status() {
	let output = session("false\nls >\nexit\n");
	assert_eq!(output.status.code(), Some(1));

	let output = session("false\na | | b\n");
	assert_eq!(output.status.code(), Some(1));
}
