//! Component loader.
//!
//! Every `*.yaml`, `*.yml` or `*.json` file below the components directory is
//! a component, named by its path relative to that directory without the
//! extension. Files may hold several documents and `kind: List` wrappers.

use std::{
	fs,
	path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use serde_yaml_with_quirks as serde_yaml;
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::{
	model::{set_ownership, LocalObject, ModelError},
	spec::{App, EnvironmentSpec},
};

#[derive(Debug, Error)]
pub enum LoadError {
	#[error("walking components directory {path}")]
	Walk {
		path: PathBuf,
		#[source]
		source: walkdir::Error,
	},

	#[error("reading {path}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("parsing YAML in {path}")]
	Yaml {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("parsing JSON in {path}")]
	Json {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("{path}: items of a List must be an array")]
	InvalidList { path: PathBuf },

	#[error("{path}: invalid object")]
	Object {
		path: PathBuf,
		#[source]
		source: ModelError,
	},
}

/// A component file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
	pub name: String,
	pub path: PathBuf,
}

const EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// List component files below `dir`, sorted by path.
pub fn discover(dir: &Path) -> Result<Vec<Component>, LoadError> {
	let mut components = Vec::new();
	for entry in WalkDir::new(dir).sort_by_file_name() {
		let entry = entry.map_err(|source| LoadError::Walk {
			path: dir.to_path_buf(),
			source,
		})?;
		if !entry.file_type().is_file() {
			continue;
		}
		let path = entry.path();
		let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
			continue;
		};
		if !EXTENSIONS.contains(&ext) {
			continue;
		}
		let Ok(relative) = path.strip_prefix(dir) else {
			continue;
		};
		let name = relative
			.with_extension("")
			.components()
			.map(|c| c.as_os_str().to_string_lossy())
			.collect::<Vec<_>>()
			.join("/");
		components.push(Component {
			name,
			path: path.to_path_buf(),
		});
	}
	Ok(components)
}

/// Load every object of an environment.
///
/// Components excluded for the environment are skipped. Objects are stamped
/// with the ownership labels and annotation before being returned.
#[instrument(skip(app, env), fields(app = app.name()))]
pub fn load(
	app: &App,
	env_name: &str,
	env: &EnvironmentSpec,
	dir: &Path,
) -> Result<Vec<LocalObject>, LoadError> {
	let mut objects = Vec::new();
	for component in discover(dir)? {
		if !app.includes_component(env, &component.name) {
			debug!(component = %component.name, "component excluded for environment");
			continue;
		}
		for mut doc in read_documents(&component.path)? {
			set_ownership(&mut doc, app.name(), env_name, &component.name);
			let object = LocalObject::new(&component.name, env_name, doc).map_err(|source| {
				LoadError::Object {
					path: component.path.clone(),
					source,
				}
			})?;
			objects.push(object);
		}
	}
	debug!(count = objects.len(), "loaded objects");
	Ok(objects)
}

/// Parse all non-null documents of a file, flattening lists.
pub fn read_documents(path: &Path) -> Result<Vec<Value>, LoadError> {
	let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
		path: path.to_path_buf(),
		source,
	})?;

	let mut raw = Vec::new();
	if path.extension().is_some_and(|e| e == "json") {
		let value: Value = serde_json::from_str(&content).map_err(|source| LoadError::Json {
			path: path.to_path_buf(),
			source,
		})?;
		raw.push(value);
	} else {
		for document in serde_yaml::Deserializer::from_str(&content) {
			let value = Value::deserialize(document).map_err(|source| LoadError::Yaml {
				path: path.to_path_buf(),
				source,
			})?;
			raw.push(value);
		}
	}

	let mut out = Vec::new();
	for value in raw {
		flatten(path, value, &mut out)?;
	}
	Ok(out)
}

fn flatten(path: &Path, value: Value, out: &mut Vec<Value>) -> Result<(), LoadError> {
	if value.is_null() {
		return Ok(());
	}
	let is_list = value
		.get("kind")
		.and_then(Value::as_str)
		.is_some_and(|k| k == "List");
	if !is_list {
		out.push(value);
		return Ok(());
	}
	match value.get("items") {
		None | Some(Value::Null) => Ok(()),
		Some(Value::Array(items)) => {
			for item in items.clone() {
				flatten(path, item, out)?;
			}
			Ok(())
		}
		Some(_) => Err(LoadError::InvalidList {
			path: path.to_path_buf(),
		}),
	}
}
