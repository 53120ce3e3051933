use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_yaml_with_quirks as serde_yaml;

/// Thread-safe collector of per-object outcomes.
///
/// Every recording method holds the lock only for the append or increment.
/// The collected lists are only reachable through [`DiffStats::done`].
#[derive(Debug, Default)]
pub struct DiffStats {
	inner: Mutex<DiffReport>,
}

impl DiffStats {
	pub fn new() -> Self {
		Self::default()
	}

	fn with<R>(&self, f: impl FnOnce(&mut DiffReport) -> R) -> R {
		let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
		f(&mut guard)
	}

	pub fn added(&self, name: impl Into<String>) {
		let name = name.into();
		self.with(|r| r.additions.push(name));
	}

	pub fn changed(&self, name: impl Into<String>) {
		let name = name.into();
		self.with(|r| r.changes.push(name));
	}

	pub fn deleted(&self, name: impl Into<String>) {
		let name = name.into();
		self.with(|r| r.deletions.push(name));
	}

	pub fn same(&self) {
		self.with(|r| r.same += 1);
	}

	pub fn error(&self, name: impl Into<String>) {
		let name = name.into();
		self.with(|r| r.errors.push(name));
	}

	/// Finalize into a report with sorted additions, changes and errors.
	///
	/// Deletions keep the order they were recorded in. The collector is left
	/// empty.
	pub fn done(&self) -> DiffReport {
		let mut report = self.with(std::mem::take);
		report.additions.sort();
		report.changes.sort();
		report.errors.sort();
		report
	}
}

/// Final outcome of a diff run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub additions: Vec<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub changes: Vec<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub deletions: Vec<String>,
	#[serde(skip_serializing_if = "is_zero")]
	pub same: usize,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &usize) -> bool {
	*n == 0
}

impl DiffReport {
	/// Number of objects that would change: added, changed or deleted.
	pub fn differences(&self) -> usize {
		self.additions.len() + self.changes.len() + self.deletions.len()
	}

	/// Render the `---` separated `stats:` summary block.
	pub fn summary(&self) -> Result<String, serde_yaml::Error> {
		#[derive(Serialize)]
		struct Summary<'a> {
			stats: &'a DiffReport,
		}
		let yaml = serde_yaml::to_string(&Summary { stats: self })?;
		let body = yaml.strip_prefix("---\n").unwrap_or(&yaml);
		let mut out = format!("---\n{body}");
		if !out.ends_with('\n') {
			out.push('\n');
		}
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[test]
	fn test_done_sorts_everything_but_deletions() {
		let stats = DiffStats::new();
		stats.added("b");
		stats.added("a");
		stats.changed("z");
		stats.changed("y");
		stats.error("2");
		stats.error("1");
		stats.deleted("second");
		stats.deleted("first");
		stats.same();
		stats.same();

		let report = stats.done();
		assert_eq!(report.additions, vec!["a", "b"]);
		assert_eq!(report.changes, vec!["y", "z"]);
		assert_eq!(report.errors, vec!["1", "2"]);
		assert_eq!(report.deletions, vec!["second", "first"]);
		assert_eq!(report.same, 2);
		assert_eq!(report.differences(), 6);
	}

	#[test]
	fn test_concurrent_recording() {
		let stats = Arc::new(DiffStats::new());
		let handles: Vec<_> = (0..8)
			.map(|i| {
				let stats = stats.clone();
				std::thread::spawn(move || {
					for j in 0..100 {
						stats.added(format!("{i}-{j}"));
						stats.same();
					}
				})
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}
		let report = stats.done();
		assert_eq!(report.additions.len(), 800);
		assert_eq!(report.same, 800);
	}

	#[test]
	fn test_summary_omits_empty() {
		let report = DiffReport {
			additions: vec!["configmaps a".to_string()],
			same: 1,
			..DiffReport::default()
		};
		let summary = report.summary().unwrap();
		assert!(summary.starts_with("---\nstats:\n"), "{summary}");
		assert!(summary.contains("additions:"), "{summary}");
		assert!(summary.contains("same: 1"), "{summary}");
		assert!(!summary.contains("changes"), "{summary}");
		assert!(!summary.contains("errors"), "{summary}");
	}

	#[test]
	fn test_summary_of_empty_report() {
		let summary = DiffReport::default().summary().unwrap();
		assert!(summary.starts_with("---\nstats:"), "{summary}");
	}
}
