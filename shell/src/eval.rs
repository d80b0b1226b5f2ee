use std::ffi::{CString, NulError};
use std::fmt;
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{self, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, info};

use crate::builtin::BuiltinDispatch;
use crate::job::{ExitStatus, Job};
use crate::parser::{self, Limits};
use crate::redirect::{self, StdioGuard};
use crate::types::*;

/// Returned by `eval` when a command line never got as far as running.
/// No child can report it, since real exit codes are 0..=255.
pub const UNSTARTABLE: i32 = -1;

const EXIT_REDIRECT_FAILED: i32 = 1;
const EXIT_CANNOT_EXECUTE: i32 = 126;
const EXIT_NOT_FOUND: i32 = 127;

/// Failures that abort a pipeline before (or while) its children are forked.
#[derive(Debug, Error)]
pub enum SetupError {
	#[error("empty pipeline")]
	EmptyPipeline,
	#[error("stage {index} has no command")]
	EmptyStage { index: usize },
	#[error("argument contains a NUL byte: {0}")]
	Nul(#[from] NulError),
	#[error("pipe: {0}")]
	Pipe(#[source] Errno),
	#[error("fork: {0}")]
	Fork(#[source] Errno),
	#[error("{path}: {source}")]
	Redirect { path: String, #[source] source: Errno },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StageOutcome {
	/// Handled in-process by the builtin dispatcher; nothing was forked.
	Builtin(i32),
	/// The redirection file of a lone stage could not be opened in the shell
	/// itself, so no child was forked for it (`forked()` is 0, status 1).
	/// Inside a multi-stage pipeline the child opens the file instead and
	/// reports the same failure through its exit status.
	RedirectFailed,
	Process { pid: Pid, status: ExitStatus },
}

impl StageOutcome {
	pub fn status(&self) -> ExitStatus {
		match *self {
			StageOutcome::Builtin(code) => ExitStatus::Exited(code),
			StageOutcome::RedirectFailed => ExitStatus::Exited(EXIT_REDIRECT_FAILED),
			StageOutcome::Process { status, .. } => status,
		}
	}
}

/// Everything observed while running one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
	outcomes: Vec<StageOutcome>,
	forked: usize,
	waits: usize,
}

impl Execution {
	fn in_process(outcome: StageOutcome) -> Execution {
		Execution { outcomes: vec![outcome], forked: 0, waits: 0 }
	}

	fn from_job(job: &Job) -> Execution {
		let outcomes = job.processes().iter()
			.map(|p| StageOutcome::Process {
				pid: p.pid,
				status: p.status.unwrap_or(ExitStatus::WaitFailed(Errno::ECHILD)),
			})
			.collect();
		Execution { outcomes, forked: job.forked(), waits: job.waits() }
	}

	/// The pipeline's official status: that of its last stage.
	pub fn status(&self) -> ExitStatus {
		self.outcomes.last().map_or(ExitStatus::Exited(0), StageOutcome::status)
	}

	pub fn code(&self) -> i32 {
		self.status().code()
	}

	pub fn statuses(&self) -> Vec<ExitStatus> {
		self.outcomes.iter().map(StageOutcome::status).collect()
	}

	pub fn outcomes(&self) -> &[StageOutcome] {
		&self.outcomes
	}

	pub fn forked(&self) -> usize {
		self.forked
	}

	pub fn waits(&self) -> usize {
		self.waits
	}
}

/// One unidirectional pipe per adjacent pair of stages.
struct Pipes(Vec<(OwnedFd, OwnedFd)>);

impl Pipes {
	fn create(count: usize) -> Result<Pipes, SetupError> {
		let pipes = (0 .. count).map(|_| unistd::pipe()).collect::<nix::Result<Vec<_>>>();
		pipes.map(Pipes).map_err(SetupError::Pipe)
	}

	fn reader(&self, i: usize) -> RawFd {
		self.0[i].0.as_raw_fd()
	}

	fn writer(&self, i: usize) -> RawFd {
		self.0[i].1.as_raw_fd()
	}
}

fn child_fail(what: &str, why: &dyn fmt::Display, code: i32) -> ! {
	let msg = format!("pipesh: {}: {}\n", what, why);
	// SAFETY: plain write(2) and _exit(2) on the child's own descriptors; the
	// Rust stderr lock may be held by a thread that does not exist post-fork.
	unsafe {
		libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const libc::c_void, msg.len());
		libc::_exit(code)
	}
}

fn to_argv(stage: &Stage) -> Result<Vec<CString>, NulError> {
	stage.arguments.iter().map(|a| CString::new(a.as_bytes())).collect()
}

fn exec_command(argv: &[CString], arguments: &[String], builtins: Option<&mut dyn BuiltinDispatch>) -> ! {
	if let Some(builtins) = builtins {
		if let Some(code) = builtins.dispatch(arguments) {
			let _ = io::stdout().flush();
			// SAFETY: terminates this child without running the parent's destructors.
			unsafe { libc::_exit(code) }
		}
	}
	// SAFETY: restores the default disposition; no handler code is installed.
	let _ = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) };
	let err = match unistd::execvp(argv[0].as_c_str(), argv) {
		Ok(never) => match never {},
		Err(e) => e,
	};
	if err == Errno::ENOENT {
		child_fail(&arguments[0], &"command not found", EXIT_NOT_FOUND)
	} else {
		child_fail(&arguments[0], &err.desc(), EXIT_CANNOT_EXECUTE)
	}
}

fn bind_input(stage: &Stage) {
	if let Some(ref path) = stage.input_path {
		let file = redirect::open_input(path).unwrap_or_else(|e| child_fail(path, &e, EXIT_REDIRECT_FAILED));
		if let Err(e) = redirect::bind(file, libc::STDIN_FILENO) {
			child_fail(path, &e, EXIT_REDIRECT_FAILED);
		}
	}
}

fn bind_output(stage: &Stage) {
	if let Some(ref path) = stage.output_path {
		let file = redirect::open_output(path).unwrap_or_else(|e| child_fail(path, &e, EXIT_REDIRECT_FAILED));
		if let Err(e) = redirect::bind(file, libc::STDOUT_FILENO) {
			child_fail(path, &e, EXIT_REDIRECT_FAILED);
		}
	}
}

fn run_stage(index: usize, last: usize, stage: &Stage, argv: &[CString], pipes: Pipes,
             builtins: &mut dyn BuiltinDispatch) -> ! {
	if index > 0 {
		if let Err(e) = redirect::bind_fd(pipes.reader(index - 1), libc::STDIN_FILENO) {
			child_fail("dup2 stdin", &e, EXIT_REDIRECT_FAILED);
		}
	} else {
		bind_input(stage);
	}
	if index < last {
		if let Err(e) = redirect::bind_fd(pipes.writer(index), libc::STDOUT_FILENO) {
			child_fail("dup2 stdout", &e, EXIT_REDIRECT_FAILED);
		}
	} else {
		bind_output(stage);
	}
	// Every inherited pipe end goes; only the copies on 0 and 1 stay open.
	drop(pipes);
	exec_command(argv, &stage.arguments, Some(builtins))
}

fn redirect_in_parent(guard: &mut StdioGuard, path: &str, target: RawFd, opened: io::Result<std::fs::File>)
                      -> Result<bool, SetupError> {
	let file = match opened {
		Ok(file) => file,
		Err(e) => {
			eprintln!("pipesh: {}: {}", path, e);
			debug!(path, error = %e, "cannot open redirection target");
			return Ok(false);
		},
	};
	guard.redirect(target, file).map_err(|source| SetupError::Redirect { path: path.to_owned(), source })?;
	Ok(true)
}

fn execute_single(stage: &Stage, builtins: &mut dyn BuiltinDispatch) -> Result<Execution, SetupError> {
	if let Some(code) = builtins.dispatch(&stage.arguments) {
		debug!(command = %stage.arguments[0], code, "builtin handled in-process");
		return Ok(Execution::in_process(StageOutcome::Builtin(code)));
	}
	let argv = to_argv(stage)?;

	let mut guard = StdioGuard::new();
	if let Some(ref path) = stage.input_path {
		if !redirect_in_parent(&mut guard, path, libc::STDIN_FILENO, redirect::open_input(path))? {
			return Ok(Execution::in_process(StageOutcome::RedirectFailed));
		}
	}
	if let Some(ref path) = stage.output_path {
		if !redirect_in_parent(&mut guard, path, libc::STDOUT_FILENO, redirect::open_output(path))? {
			return Ok(Execution::in_process(StageOutcome::RedirectFailed));
		}
	}

	let mut job = Job::with_capacity(1);
	match job.push_fork().map_err(SetupError::Fork)? {
		ForkResult::Parent { .. } => {},
		ForkResult::Child => exec_command(&argv, &stage.arguments, None),
	}
	job.wait();
	drop(guard);
	Ok(Execution::from_job(&job))
}

fn execute_pipeline(pipeline: &Pipeline, builtins: &mut dyn BuiltinDispatch) -> Result<Execution, SetupError> {
	let stages = &pipeline.stages;
	let last = stages.len() - 1;
	let argvs = stages.iter().map(to_argv).collect::<Result<Vec<_>, _>>()?;

	for (i, stage) in stages.iter().enumerate() {
		if (i > 0 && stage.input_path.is_some()) || (i < last && stage.output_path.is_some()) {
			debug!(stage = i, "redirection on a piped end is ignored");
		}
	}

	let pipes = Pipes::create(last)?;
	debug!(count = last, "pipes created");

	let mut job = Job::with_capacity(stages.len());
	for (i, stage) in stages.iter().enumerate() {
		match job.push_fork() {
			Ok(ForkResult::Parent { .. }) => {},
			Ok(ForkResult::Child) => run_stage(i, last, stage, &argvs[i], pipes, builtins),
			Err(e) => {
				debug!(stage = i, error = %e, "fork failed, reaping started stages");
				drop(pipes);
				job.wait();
				return Err(SetupError::Fork(e));
			},
		}
	}
	drop(pipes);
	job.wait();

	let execution = Execution::from_job(&job);
	for (i, status) in execution.statuses()[.. last].iter().enumerate() {
		if !status.success() {
			info!(stage = i, code = status.code(), command = %stages[i].arguments[0], "pipeline stage failed");
		}
	}
	Ok(execution)
}

/// Runs every stage of `pipeline` and waits for all of them.
///
/// A lone stage may be a builtin, in which case nothing is forked and no
/// redirection is applied. Otherwise one child is forked per stage.
pub fn execute<B>(pipeline: &Pipeline, builtins: &mut B) -> Result<Execution, SetupError>
where
	B: BuiltinDispatch,
{
	if pipeline.stages.is_empty() {
		return Err(SetupError::EmptyPipeline);
	}
	if let Some(index) = pipeline.stages.iter().position(|s| s.arguments.is_empty()) {
		return Err(SetupError::EmptyStage { index });
	}
	if pipeline.stages.iter().any(|s| s.background) {
		debug!("background flag is not supported, running in the foreground");
	}
	let _ = io::stdout().flush();

	if pipeline.stages.len() == 1 {
		execute_single(&pipeline.stages[0], builtins)
	} else {
		execute_pipeline(pipeline, builtins)
	}
}

/// Parses and runs one tokenized command line, returning its exit status.
///
/// Parse and setup failures print a single diagnostic and yield `UNSTARTABLE`.
pub fn eval<I, S, B>(tokens: I, limits: &Limits, builtins: &mut B) -> i32
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
	B: BuiltinDispatch,
{
	let pipeline = match parser::parse(tokens, limits) {
		Ok(pipeline) => pipeline,
		Err(e) => {
			eprintln!("pipesh: {}", e);
			return UNSTARTABLE;
		},
	};
	match execute(&pipeline, builtins) {
		Ok(execution) => execution.code(),
		Err(e) => {
			eprintln!("pipesh: {}", e);
			UNSTARTABLE
		},
	}
}
