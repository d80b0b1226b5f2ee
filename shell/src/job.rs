use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use tracing::debug;

/// How a child (or an in-process builtin) finished.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExitStatus {
	Exited(i32),
	Signaled(Signal),
	/// `waitpid` itself failed; the child's real status is unknown.
	WaitFailed(Errno),
}

impl ExitStatus {
	/// Shell convention: exit code as is, 128 + signal number for signal deaths.
	pub fn code(self) -> i32 {
		match self {
			ExitStatus::Exited(code) => code,
			ExitStatus::Signaled(signal) => 128 + signal as i32,
			ExitStatus::WaitFailed(_) => 1,
		}
	}

	pub fn success(self) -> bool {
		self.code() == 0
	}
}

trait WaitStatusExt {
	fn exit_status(self) -> Option<ExitStatus>;
}

impl WaitStatusExt for WaitStatus {
	fn exit_status(self) -> Option<ExitStatus> {
		match self {
			WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
			WaitStatus::Signaled(_, signal, _) => Some(ExitStatus::Signaled(signal)),
			_ => None,
		}
	}
}

/// Blocks until `pid` terminates. Interrupted waits are retried.
pub fn wait_for(pid: Pid) -> ExitStatus {
	loop {
		match wait::waitpid(pid, None) {
			Ok(status) => {
				if let Some(s) = status.exit_status() {
					return s;
				}
			},
			Err(Errno::EINTR) => continue,
			Err(e) => return ExitStatus::WaitFailed(e),
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Process {
	pub pid: Pid,
	pub status: Option<ExitStatus>,
}

/// The children forked for one pipeline, in stage order.
#[derive(Debug, Default)]
pub struct Job {
	processes: Vec<Process>,
	waits: usize,
}

impl Job {
	pub fn with_capacity(size_hint: usize) -> Job {
		Job { processes: Vec::with_capacity(size_hint), waits: 0 }
	}

	/// Forks once. The parent side records the new child.
	///
	/// The child branch must end in `exec` or `_exit` without returning into
	/// the caller's control flow.
	pub fn push_fork(&mut self) -> nix::Result<ForkResult> {
		// SAFETY: the orchestrating process is single threaded while forking and
		// every child branch only rebinds descriptors before exec or `_exit`.
		let r = unsafe { unistd::fork() }?;
		if let ForkResult::Parent { child } = r {
			debug!(pid = child.as_raw(), stage = self.processes.len(), "forked");
			self.processes.push(Process { pid: child, status: None });
		}
		Ok(r)
	}

	/// Reaps every child that has not been waited for yet, in fork order.
	pub fn wait(&mut self) {
		for process in self.processes.iter_mut().filter(|p| p.status.is_none()) {
			let status = wait_for(process.pid);
			debug!(pid = process.pid.as_raw(), code = status.code(), "reaped");
			process.status = Some(status);
			self.waits += 1;
		}
	}

	pub fn processes(&self) -> &[Process] {
		&self.processes
	}

	pub fn forked(&self) -> usize {
		self.processes.len()
	}

	pub fn waits(&self) -> usize {
		self.waits
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_codes() {
		assert_eq!(ExitStatus::Exited(0).code(), 0);
		assert_eq!(ExitStatus::Exited(42).code(), 42);
		assert_eq!(ExitStatus::Signaled(Signal::SIGKILL).code(), 137);
		assert_eq!(ExitStatus::WaitFailed(Errno::ECHILD).code(), 1);
		assert!(ExitStatus::Exited(0).success());
		assert!(!ExitStatus::Signaled(Signal::SIGTERM).success());
	}

	#[test]
	fn reaps_exit_code() {
		let mut job = Job::with_capacity(1);
		match job.push_fork().unwrap() {
			ForkResult::Child => unsafe { libc::_exit(3) },
			ForkResult::Parent { .. } => {},
		}
		job.wait();
		assert_eq!(job.forked(), 1);
		assert_eq!(job.waits(), 1);
		assert_eq!(job.processes()[0].status, Some(ExitStatus::Exited(3)));
	}

	#[test]
	fn reaps_signal_death() {
		let mut job = Job::with_capacity(1);
		match job.push_fork().unwrap() {
			ForkResult::Child => unsafe {
				libc::raise(libc::SIGKILL);
				libc::_exit(0)
			},
			ForkResult::Parent { .. } => {},
		}
		job.wait();
		assert_eq!(job.processes()[0].status, Some(ExitStatus::Signaled(Signal::SIGKILL)));
	}

	#[test]
	fn wait_is_not_repeated() {
		let mut job = Job::with_capacity(2);
		for code in 0..2 {
			if let ForkResult::Child = job.push_fork().unwrap() {
				unsafe { libc::_exit(code) }
			}
		}
		job.wait();
		job.wait();
		assert_eq!(job.waits(), 2);
		let codes: Vec<i32> = job.processes().iter().map(|p| p.status.unwrap().code()).collect();
		assert_eq!(codes, vec![0, 1]);
	}

	#[test]
	fn waiting_for_a_stranger_fails() {
		assert_eq!(wait_for(Pid::from_raw(i32::MAX)), ExitStatus::WaitFailed(Errno::ECHILD));
	}
}
