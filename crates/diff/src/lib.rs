//! Unified diff rendering for strings and JSON documents.
//!
//! The renderer is deliberately unaware of Kubernetes: it takes two texts (or
//! two documents that it serializes to YAML first) and produces a unified diff
//! with caller-supplied file names. An empty result means "no difference".

use nu_ansi_term::{Color, Style};
use serde_json::Value;
use similar::TextDiff;
use thiserror::Error;

/// Number of context lines used when the caller asks for the default (`0`).
pub const DEFAULT_CONTEXT: usize = 3;

/// Errors that can occur while rendering a diff.
#[derive(Debug, Error)]
pub enum RenderError {
	#[error("serializing document to YAML")]
	Yaml(#[from] serde_yaml_with_quirks::Error),
}

/// Rendering options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
	/// Context lines around each change.
	///
	/// Negative means no context at all, `0` selects [`DEFAULT_CONTEXT`].
	pub context: i32,
	/// Paint the output with ANSI colors.
	pub colorize: bool,
	/// Name shown in the `---` header.
	pub left_name: String,
	/// Name shown in the `+++` header.
	pub right_name: String,
}

impl Options {
	/// Same options with different header names.
	pub fn with_names(&self, left_name: impl Into<String>, right_name: impl Into<String>) -> Self {
		Self {
			left_name: left_name.into(),
			right_name: right_name.into(),
			..self.clone()
		}
	}

	fn context_radius(&self) -> usize {
		match self.context {
			c if c < 0 => 0,
			0 => DEFAULT_CONTEXT,
			c => c as usize,
		}
	}
}

/// Diff two strings line by line.
#[allow(clippy::unnecessary_wraps)]
pub fn strings(left: &str, right: &str, opts: &Options) -> Result<String, RenderError> {
	if left == right {
		return Ok(String::new());
	}

	let text = TextDiff::from_lines(left, right)
		.unified_diff()
		.context_radius(opts.context_radius())
		.missing_newline_hint(false)
		.header(&opts.left_name, &opts.right_name)
		.to_string();

	if opts.colorize {
		Ok(colorize(&text))
	} else {
		Ok(text)
	}
}

/// Diff two documents by rendering them as YAML with sorted keys.
pub fn objects(left: &Value, right: &Value, opts: &Options) -> Result<String, RenderError> {
	let left = to_yaml(left)?;
	let right = to_yaml(right)?;
	strings(&left, &right, opts)
}

/// Serialize a document to YAML with keys in a stable order.
pub fn to_yaml(value: &Value) -> Result<String, RenderError> {
	let sorted = sort_keys(value.clone());
	let out = serde_yaml_with_quirks::to_string(&sorted)?;
	let out = out.strip_prefix("---\n").unwrap_or(&out);
	if out.ends_with('\n') {
		Ok(out.to_string())
	} else {
		Ok(format!("{out}\n"))
	}
}

/// Recursively rebuild objects with lexicographically ordered keys.
fn sort_keys(value: Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<(String, Value)> = map.into_iter().collect();
			entries.sort_by(|(a, _), (b, _)| a.cmp(b));
			Value::Object(
				entries
					.into_iter()
					.map(|(k, v)| (k, sort_keys(v)))
					.collect(),
			)
		}
		Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
		other => other,
	}
}

fn colorize(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for line in text.lines() {
		let painted = if line.starts_with("---") || line.starts_with("+++") {
			Style::new().bold().paint(line).to_string()
		} else if line.starts_with("@@") {
			Color::Cyan.paint(line).to_string()
		} else if line.starts_with('-') {
			Color::Red.paint(line).to_string()
		} else if line.starts_with('+') {
			Color::Green.paint(line).to_string()
		} else {
			line.to_string()
		};
		out.push_str(&painted);
		out.push('\n');
	}
	out
}
