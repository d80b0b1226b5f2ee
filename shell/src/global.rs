use crate::parser::Limits;

/// Interpreter state shared between the read loop and the builtins.
#[derive(Debug, Default)]
pub struct State {
	pub limits: Limits,
	pub last_status: i32,
	/// Set by `exit`; the read loop stops once this is present.
	pub exit_request: Option<i32>,
}

impl State {
	pub fn new(limits: Limits) -> State {
		State { limits, last_status: 0, exit_request: None }
	}
}
