//! Component and kind filters selecting which objects take part in a diff.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
	#[error("cannot include as well as exclude {0}s, specify one or the other")]
	IncludeAndExclude(&'static str),
}

/// Include-or-exclude list of names.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct NameFilter {
	includes: Vec<String>,
	excludes: Vec<String>,
	case_insensitive: bool,
}

impl NameFilter {
	fn new(
		what: &'static str,
		includes: Vec<String>,
		excludes: Vec<String>,
		case_insensitive: bool,
	) -> Result<Self, FilterError> {
		if !includes.is_empty() && !excludes.is_empty() {
			return Err(FilterError::IncludeAndExclude(what));
		}
		Ok(Self {
			includes,
			excludes,
			case_insensitive,
		})
	}

	fn has_filters(&self) -> bool {
		!self.includes.is_empty() || !self.excludes.is_empty()
	}

	fn eq(&self, a: &str, b: &str) -> bool {
		if self.case_insensitive {
			a.eq_ignore_ascii_case(b)
		} else {
			a == b
		}
	}

	fn matches(&self, name: &str) -> bool {
		if !self.includes.is_empty() {
			return self.includes.iter().any(|i| self.eq(i, name));
		}
		!self.excludes.iter().any(|e| self.eq(e, name))
	}
}

/// Filter on the component an object belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentFilter(NameFilter);

impl ComponentFilter {
	pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Result<Self, FilterError> {
		NameFilter::new("component", includes, excludes, false).map(Self)
	}

	pub fn has_filters(&self) -> bool {
		self.0.has_filters()
	}

	/// Objects without a component only pass an unfiltered filter.
	pub fn matches(&self, component: Option<&str>) -> bool {
		match component {
			Some(c) => self.0.matches(c),
			None => !self.has_filters(),
		}
	}
}

/// Filter on object kinds, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindFilter(NameFilter);

impl KindFilter {
	pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Result<Self, FilterError> {
		NameFilter::new("kind", includes, excludes, true).map(Self)
	}

	pub fn has_filters(&self) -> bool {
		self.0.has_filters()
	}

	pub fn matches(&self, kind: &str) -> bool {
		self.0.matches(kind)
	}
}
