use std::mem;

use thiserror::Error;

use crate::types::*;

pub const MAX_STAGES: usize = 10;
pub const MAX_ARGUMENTS: usize = 64;

const PIPE: &str = "|";
const INPUT: &str = "<";
const OUTPUT: &str = ">";
const BACKGROUND: &str = "&";

/// Upper bounds enforced while parsing. Exceeding one is an error, never a truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
	pub max_stages: usize,
	pub max_arguments: usize,
}

impl Default for Limits {
	fn default() -> Limits {
		Limits { max_stages: MAX_STAGES, max_arguments: MAX_ARGUMENTS }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
	#[error("empty command")]
	EmptyCommand,
	#[error("syntax error: empty pipeline stage")]
	EmptyStage,
	#[error("syntax error: no file specified after '{operator}'")]
	MissingRedirectTarget { operator: char },
	#[error("too many pipeline stages (max {limit})")]
	TooManyStages { limit: usize },
	#[error("too many arguments (max {limit})")]
	TooManyArguments { limit: usize },
}

type ParseResult<T> = Result<T, ParseError>;

fn is_control(token: &str) -> bool {
	matches!(token, PIPE | INPUT | OUTPUT | BACKGROUND)
}

/// Splits a raw line on blanks. Quoting is not recognised.
pub fn tokenize(line: &str) -> Vec<String> {
	line.split_whitespace().map(str::to_owned).collect()
}

struct Parser<'l, I> {
	tokens: I,
	limits: &'l Limits,
}

impl<'l, I> Parser<'l, I> where I: Iterator<Item = String> {
	fn read_target(&mut self, operator: char) -> ParseResult<String> {
		match self.tokens.next() {
			Some(target) if !is_control(&target) => Ok(target),
			_ => Err(ParseError::MissingRedirectTarget { operator }),
		}
	}

	fn push_argument(&self, stage: &mut Stage, argument: String) -> ParseResult<()> {
		if stage.arguments.len() >= self.limits.max_arguments {
			return Err(ParseError::TooManyArguments { limit: self.limits.max_arguments });
		}
		stage.arguments.push(argument);
		Ok(())
	}

	fn push_stage(&self, stages: &mut Vec<Stage>, stage: Stage) -> ParseResult<()> {
		if stage.arguments.is_empty() {
			return Err(ParseError::EmptyStage);
		}
		if stages.len() >= self.limits.max_stages {
			return Err(ParseError::TooManyStages { limit: self.limits.max_stages });
		}
		stages.push(stage);
		Ok(())
	}

	fn parse_pipeline(&mut self) -> ParseResult<Pipeline> {
		let mut stages: Vec<Stage> = vec![];
		let mut stage = Stage::default();
		let mut is_empty = true;

		while let Some(token) = self.tokens.next() {
			is_empty = false;
			match token.as_str() {
				PIPE => {
					let done = mem::take(&mut stage);
					self.push_stage(&mut stages, done)?;
				},
				INPUT => { stage.input_path = Some(self.read_target('<')?); },
				OUTPUT => { stage.output_path = Some(self.read_target('>')?); },
				BACKGROUND => { stage.background = true; },
				_ => self.push_argument(&mut stage, token)?,
			}
		}

		if is_empty {
			return Err(ParseError::EmptyCommand);
		}
		self.push_stage(&mut stages, stage)?;
		Ok(Pipeline { stages })
	}
}

/// Builds a `Pipeline` from already split tokens. The result owns every string.
pub fn parse<I, S>(tokens: I, limits: &Limits) -> ParseResult<Pipeline>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut parser = Parser { tokens: tokens.into_iter().map(<S as Into<String>>::into), limits };
	parser.parse_pipeline()
}
