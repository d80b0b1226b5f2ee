//! Process orchestration for a small line-oriented shell.
//!
//! A tokenized command line is parsed into a [`Pipeline`] of [`Stage`]s, which
//! [`execute`] turns into one child process per stage, wired together with
//! pipes and optional file redirection.

pub mod builtin;
pub mod eval;
pub mod global;
pub mod job;
pub mod parser;
pub mod redirect;
pub mod types;

pub use builtin::{BuiltinDispatch, NoBuiltins};
pub use eval::{eval, execute, Execution, SetupError, StageOutcome, UNSTARTABLE};
pub use global::State;
pub use job::ExitStatus;
pub use parser::{parse, tokenize, Limits, ParseError, MAX_ARGUMENTS, MAX_STAGES};
pub use types::{Pipeline, Stage};
