/// One program invocation inside a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
	pub arguments: Vec<String>,
	pub input_path: Option<String>,
	pub output_path: Option<String>,
	/// Parsed but never acted on by the executor.
	pub background: bool,
}

impl Stage {
	pub fn new<I, S>(arguments: I) -> Stage where I: IntoIterator<Item = S>, S: Into<String> {
		Stage { arguments: arguments.into_iter().map(Into::into).collect(), ..Stage::default() }
	}
}

/// A parsed command line: an ordered, non-empty chain of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
	pub stages: Vec<Stage>,
}

impl Pipeline {
	pub fn len(&self) -> usize {
		self.stages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stages.is_empty()
	}
}
