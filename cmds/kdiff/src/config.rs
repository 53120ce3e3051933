//! Application config file support.
//!
//! kdiff looks for a `kdiff.yaml` file starting at the given directory and
//! walking up to the filesystem root. The directory holding the file is the
//! application root; component paths are resolved against it.

use std::{
	fs,
	path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

use crate::{
	model::BASELINE,
	spec::{App, APP_API_VERSION, APP_KIND},
};

/// The name of the config file kdiff looks for
pub const CONFIG_FILE_NAME: &str = "kdiff.yaml";

/// A loaded application together with the directory it was found in.
#[derive(Debug, Clone)]
pub struct LoadedApp {
	pub root: PathBuf,
	pub app: App,
}

impl LoadedApp {
	/// Absolute path of the components directory.
	pub fn components_dir(&self) -> PathBuf {
		self.root.join(&self.app.spec.components_dir)
	}
}

/// Load the app config by searching from the given directory upward
pub fn load_from_directory(start_dir: &Path) -> Result<LoadedApp> {
	let Some(config_path) = find_config_file(start_dir) else {
		bail!(
			"no {CONFIG_FILE_NAME} found in {} or any parent directory",
			start_dir.display()
		);
	};
	let app = load_from_file(&config_path)?;
	let root = config_path
		.parent()
		.map_or_else(|| PathBuf::from("."), Path::to_path_buf);
	Ok(LoadedApp { root, app })
}

/// Load the app config from a specific file path
pub fn load_from_file(path: &Path) -> Result<App> {
	let content = fs::read_to_string(path)
		.with_context(|| format!("failed to read config file: {}", path.display()))?;
	let app: App = serde_yaml_with_quirks::from_str(&content)
		.with_context(|| format!("failed to parse config file: {}", path.display()))?;
	validate(&app).with_context(|| format!("invalid config file: {}", path.display()))?;
	Ok(app)
}

fn validate(app: &App) -> Result<()> {
	if app.api_version != APP_API_VERSION {
		bail!(
			"unsupported apiVersion {:?}, expected {APP_API_VERSION:?}",
			app.api_version
		);
	}
	if app.kind != APP_KIND {
		bail!("unsupported kind {:?}, expected {APP_KIND:?}", app.kind);
	}
	if app.metadata.name.is_empty() {
		bail!("metadata.name must be set");
	}
	if app.spec.environments.contains_key(BASELINE) {
		bail!("environment name {BASELINE:?} is reserved for the baseline");
	}
	Ok(())
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let mut current = start_dir.to_path_buf();

	// Canonicalize if possible to handle relative paths
	if let Ok(canonical) = current.canonicalize() {
		current = canonical;
	}

	loop {
		let config_path = current.join(CONFIG_FILE_NAME);
		if config_path.exists() {
			return Some(config_path);
		}
		match current.parent() {
			Some(parent) if parent != current => current = parent.to_path_buf(),
			_ => return None,
		}
	}
}
