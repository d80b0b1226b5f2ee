use std::io::{self, BufRead, Write};
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pipesh::{eval, tokenize, Limits, State, MAX_ARGUMENTS, MAX_STAGES, UNSTARTABLE};

#[derive(Parser, Debug)]
#[command(name = "pipesh", version, about = "A small shell for pipelines and redirections")]
struct Args {
	/// Run a single command line and exit with its status
	#[arg(short = 'c', value_name = "COMMAND")]
	command: Option<String>,

	/// Maximum number of stages in one pipeline
	#[arg(long, default_value_t = MAX_STAGES)]
	max_stages: usize,

	/// Maximum number of arguments per stage
	#[arg(long, default_value_t = MAX_ARGUMENTS)]
	max_arguments: usize,

	#[arg(long, default_value = "pipesh> ")]
	prompt: String,
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.init();
}

/// Runs one line and returns its raw status. A line that never started leaves
/// `last_status` untouched, so `exit` and EOF report the last real command.
fn run_line(state: &mut State, line: &str) -> Option<i32> {
	let tokens = tokenize(line);
	if tokens.is_empty() {
		return None;
	}
	let limits = state.limits;
	let status = eval(tokens, &limits, state);
	if status != UNSTARTABLE {
		state.last_status = status;
	}
	Some(status)
}

fn main() {
	init_tracing();
	let args = Args::parse();
	let mut state = State::new(Limits { max_stages: args.max_stages, max_arguments: args.max_arguments });

	if let Some(ref line) = args.command {
		// An unstartable line exits with 255, the low byte of UNSTARTABLE.
		let status = run_line(&mut state, line).unwrap_or(0);
		process::exit(state.exit_request.unwrap_or(status));
	}

	let mut stdout = io::stdout();
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		let _ = stdout.write_all(args.prompt.as_bytes());
		let _ = stdout.flush();
		let mut line: Vec<u8> = vec![];
		match stdin_locked.read_until(b'\n', &mut line) {
			Ok(0) => break,
			Ok(_) => {},
			Err(e) => {
				eprintln!("pipesh: {}", e);
				break;
			},
		}
		run_line(&mut state, &String::from_utf8_lossy(&line));
		if let Some(code) = state.exit_request {
			process::exit(code);
		}
	}
	let _ = stdout.write_all(b"\n");
	process::exit(state.last_status);
}
