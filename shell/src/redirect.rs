use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::{self, FcntlArg};
use nix::unistd;
use tracing::warn;

pub const OUTPUT_MODE: u32 = 0o644;

// Backups live above the descriptors a child could plausibly care about.
const BACKUP_FLOOR: RawFd = 10;

pub fn open_input(path: &str) -> io::Result<File> {
	OpenOptions::new().read(true).open(path)
}

pub fn open_output(path: &str) -> io::Result<File> {
	OpenOptions::new().write(true).create(true).truncate(true).mode(OUTPUT_MODE).open(path)
}

/// Moves `file` onto `target`, closing the original descriptor.
pub fn bind(file: File, target: RawFd) -> nix::Result<()> {
	let fd = file.into_raw_fd();
	if fd == target {
		return Ok(());
	}
	let bound = bind_fd(fd, target);
	let _ = unistd::close(fd);
	bound
}

pub fn bind_fd(fd: RawFd, target: RawFd) -> nix::Result<()> {
	unistd::dup2(fd, target).map(drop)
}

fn flush_if_stdout(target: RawFd) {
	if target == libc::STDOUT_FILENO {
		let _ = io::stdout().flush();
	}
}

/// Temporarily rebinds descriptors of the calling process.
///
/// Each redirected descriptor is first copied aside (close-on-exec, so forked
/// programs never inherit the copy) and put back when the guard is dropped.
#[derive(Debug, Default)]
pub struct StdioGuard {
	saved: Vec<(RawFd, OwnedFd)>,
}

impl StdioGuard {
	pub fn new() -> StdioGuard {
		StdioGuard { saved: vec![] }
	}

	pub fn redirect(&mut self, target: RawFd, file: File) -> nix::Result<()> {
		flush_if_stdout(target);
		let backup = fcntl::fcntl(target, FcntlArg::F_DUPFD_CLOEXEC(BACKUP_FLOOR))?;
		// SAFETY: `backup` was just returned by F_DUPFD_CLOEXEC and is owned by nobody else.
		let backup = unsafe { OwnedFd::from_raw_fd(backup) };
		self.saved.push((target, backup));
		bind(file, target)
	}
}

impl Drop for StdioGuard {
	fn drop(&mut self) {
		while let Some((target, backup)) = self.saved.pop() {
			flush_if_stdout(target);
			if let Err(e) = bind_fd(backup.as_raw_fd(), target) {
				warn!(fd = target, error = %e, "failed to restore descriptor");
			}
		}
	}
}
