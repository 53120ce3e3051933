use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `apiVersion` accepted in `kdiff.yaml`.
pub const APP_API_VERSION: &str = "kdiff.io/v1alpha1";

/// `kind` accepted in `kdiff.yaml`.
pub const APP_KIND: &str = "App";

/// App represents a kdiff application (kdiff.io/v1alpha1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
	pub api_version: String,
	pub kind: String,
	pub metadata: Metadata,
	pub spec: AppSpec,
}

impl App {
	pub fn name(&self) -> &str {
		&self.metadata.name
	}

	pub fn environment(&self, name: &str) -> Option<&EnvironmentSpec> {
		self.spec.environments.get(name)
	}

	/// Whether a component is part of the given environment.
	///
	/// Environment excludes win over everything, environment includes re-enable
	/// components excluded at the app level.
	pub fn includes_component(&self, env: &EnvironmentSpec, component: &str) -> bool {
		if env.excludes.iter().any(|c| c == component) {
			return false;
		}
		if env.includes.iter().any(|c| c == component) {
			return true;
		}
		!self.spec.excludes.iter().any(|c| c == component)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
	/// Directory holding component files, relative to the app root.
	#[serde(default = "default_components_dir")]
	pub components_dir: String,

	/// Components excluded from every environment unless re-included.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub excludes: Vec<String>,

	#[serde(default)]
	pub environments: BTreeMap<String, EnvironmentSpec>,
}

impl Default for AppSpec {
	fn default() -> Self {
		Self {
			components_dir: default_components_dir(),
			excludes: Vec::new(),
			environments: BTreeMap::new(),
		}
	}
}

/// Cluster binding and component selection for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub api_server: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub context_names: Option<Vec<String>>,

	#[serde(default = "default_namespace")]
	pub default_namespace: String,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub includes: Vec<String>,

	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub excludes: Vec<String>,
}

impl Default for EnvironmentSpec {
	fn default() -> Self {
		Self {
			api_server: None,
			context_names: None,
			default_namespace: default_namespace(),
			includes: Vec::new(),
			excludes: Vec::new(),
		}
	}
}

fn default_components_dir() -> String {
	"components".to_string()
}

fn default_namespace() -> String {
	"default".to_string()
}
