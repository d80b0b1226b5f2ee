use std::env;
use std::io::{self, Write};

use crate::global;

/// Hook the executor consults once per stage before forking.
///
/// `None` means "not a builtin, run a program"; `Some(status)` means the
/// command was handled in the current process.
pub trait BuiltinDispatch {
	fn dispatch(&mut self, arguments: &[String]) -> Option<i32>;
}

impl<F> BuiltinDispatch for F where F: FnMut(&[String]) -> Option<i32> {
	fn dispatch(&mut self, arguments: &[String]) -> Option<i32> {
		self(arguments)
	}
}

/// A dispatcher that knows no builtins at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBuiltins;

impl BuiltinDispatch for NoBuiltins {
	fn dispatch(&mut self, _: &[String]) -> Option<i32> {
		None
	}
}

type Builtin = fn(&mut global::State, &[String]) -> i32;

pub fn builtin_cd(_: &mut global::State, arguments: &[String]) -> i32 {
	let target = match arguments.get(1) {
		Some(dir) => dir.clone(),
		None => match env::var("HOME") {
			Ok(home) => home,
			Err(_) => {
				eprintln!("cd: HOME environment variable not set");
				return 1;
			},
		},
	};
	match env::set_current_dir(&target) {
		Ok(()) => 0,
		Err(e) => {
			eprintln!("cd: {}: {}", target, e);
			1
		},
	}
}

pub fn builtin_exit(state: &mut global::State, arguments: &[String]) -> i32 {
	let code = match arguments.get(1) {
		None => state.last_status,
		Some(arg) => match arg.parse::<i32>() {
			Ok(code) => code,
			Err(_) => {
				eprintln!("exit: {}: numeric argument required", arg);
				2
			},
		},
	};
	state.exit_request = Some(code);
	code
}

const HELP: &str = "Built-in commands:
  cd [directory]  change the working directory
  exit [code]     leave the shell
  help            show this message
  jobs            job control (not supported)
";

pub fn builtin_help(_: &mut global::State, _: &[String]) -> i32 {
	let mut stdout = io::stdout();
	let _ = stdout.write_all(HELP.as_bytes());
	let _ = stdout.flush();
	0
}

pub fn builtin_jobs(_: &mut global::State, _: &[String]) -> i32 {
	let _ = writeln!(io::stdout(), "job control is not supported");
	0
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"cd" => Some(builtin_cd),
		"exit" => Some(builtin_exit),
		"help" => Some(builtin_help),
		"jobs" => Some(builtin_jobs),
		_ => None,
	}
}

impl BuiltinDispatch for global::State {
	fn dispatch(&mut self, arguments: &[String]) -> Option<i32> {
		let builtin = match_builtin(arguments.first()?)?;
		Some(builtin(self, arguments))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(words: &[&str]) -> Vec<String> {
		words.iter().map(|w| w.to_string()).collect()
	}

	#[test]
	fn unknown_commands_fall_through() {
		let mut state = global::State::default();
		assert_eq!(state.dispatch(&args(&["ls", "-l"])), None);
		assert_eq!(state.dispatch(&[]), None);
	}

	#[test]
	fn exit_records_request() {
		let mut state = global::State::default();
		assert_eq!(state.dispatch(&args(&["exit", "4"])), Some(4));
		assert_eq!(state.exit_request, Some(4));

		let mut state = global::State { last_status: 9, ..global::State::default() };
		assert_eq!(state.dispatch(&args(&["exit"])), Some(9));
		assert_eq!(state.exit_request, Some(9));
	}

	#[test]
	fn exit_rejects_garbage() {
		let mut state = global::State::default();
		assert_eq!(state.dispatch(&args(&["exit", "soon"])), Some(2));
		assert_eq!(state.exit_request, Some(2));
	}

	#[test]
	fn cd_into_missing_directory_fails() {
		let before = env::current_dir().unwrap();
		let mut state = global::State::default();
		assert_eq!(state.dispatch(&args(&["cd", "/definitely/not/a/directory"])), Some(1));
		assert_eq!(env::current_dir().unwrap(), before);
	}

	#[test]
	fn closures_are_dispatchers() {
		let mut calls = 0;
		let mut only_true = |arguments: &[String]| {
			calls += 1;
			if arguments[0] == "true" { Some(0) } else { None }
		};
		assert_eq!(only_true.dispatch(&args(&["true"])), Some(0));
		assert_eq!(only_true.dispatch(&args(&["false"])), None);
		assert_eq!(calls, 2);
		assert_eq!(NoBuiltins.dispatch(&args(&["cd"])), None);
	}
}
