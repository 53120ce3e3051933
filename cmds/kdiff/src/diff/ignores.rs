use serde_json::{Map, Value};

use crate::model::{annotations, labels, set_annotations, set_labels};

/// Labels and annotations left out of every comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffIgnores {
	pub all_labels: bool,
	pub all_annotations: bool,
	pub label_names: Vec<String>,
	pub annotation_names: Vec<String>,
}

impl DiffIgnores {
	fn has_label_rules(&self) -> bool {
		self.all_labels || !self.label_names.is_empty()
	}

	fn has_annotation_rules(&self) -> bool {
		self.all_annotations || !self.annotation_names.is_empty()
	}

	/// Strip ignored labels and annotations from a document in place.
	///
	/// A category with rules always ends up with a map, possibly empty, so that
	/// both sides of a comparison have the same shape. Applying twice is the
	/// same as applying once.
	pub fn preprocess(&self, doc: &mut Value) {
		if self.has_label_rules() {
			let kept = strip(labels(doc), self.all_labels, &self.label_names);
			set_labels(doc, kept);
		}
		if self.has_annotation_rules() {
			let kept = strip(
				annotations(doc),
				self.all_annotations,
				&self.annotation_names,
			);
			set_annotations(doc, kept);
		}
	}
}

fn strip(current: Option<&Map<String, Value>>, all: bool, names: &[String]) -> Map<String, Value> {
	if all {
		return Map::new();
	}
	let mut kept = current.cloned().unwrap_or_default();
	for name in names {
		kept.remove(name);
	}
	kept
}
