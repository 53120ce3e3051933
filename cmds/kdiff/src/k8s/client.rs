//! Kubernetes cluster connection management.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use crate::spec::EnvironmentSpec;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error(
		"environment has no cluster binding: set exactly one of apiServer or contextNames \
		 in kdiff.yaml"
	)]
	IncompleteSpec,

	#[error("environment sets both apiServer and contextNames, specify only one")]
	AmbiguousSpec,

	#[error("contextNames is empty")]
	EmptyContextNames,

	#[error(
		"no cluster that matches the apiServer `{0}` was found. Please check your $KUBECONFIG"
	)]
	ClusterNotFound(String),

	#[error("no context using cluster `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFoundForCluster(String),

	#[error("no context named `{0:?}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(Vec<String>),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// A connection to the cluster an environment is bound to.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Human-readable identifier for the cluster (context name or API server URL).
	cluster_identifier: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("cluster_identifier", &self.cluster_identifier)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect to the cluster of an environment.
	///
	/// Exactly one of `apiServer` or `contextNames` must be set:
	/// - `apiServer`: searches kubeconfig for a cluster with matching server URL,
	///   then finds and uses a context that references that cluster
	/// - `contextNames`: uses the first matching context name from kubeconfig
	#[instrument(skip_all)]
	pub async fn from_environment(env: &EnvironmentSpec) -> Result<Self, ConnectionError> {
		let kubeconfig = Kubeconfig::read()?;
		Self::from_environment_with_kubeconfig(env, kubeconfig).await
	}

	/// Connect using the environment and a provided kubeconfig.
	#[instrument(skip_all)]
	pub async fn from_environment_with_kubeconfig(
		env: &EnvironmentSpec,
		kubeconfig: Kubeconfig,
	) -> Result<Self, ConnectionError> {
		let (context_name, cluster_identifier) = match (&env.api_server, &env.context_names) {
			(Some(_), Some(_)) => return Err(ConnectionError::AmbiguousSpec),
			(None, None) => return Err(ConnectionError::IncompleteSpec),
			(Some(api_server), None) => {
				let context_name = find_context_for_api_server(&kubeconfig, api_server)?;
				tracing::debug!(
					context = %context_name,
					api_server = %api_server,
					"found context for apiServer"
				);
				let identifier = format!("{}  (context:{})", api_server, context_name);
				(context_name, identifier)
			}
			(None, Some(context_names)) => {
				if context_names.is_empty() {
					return Err(ConnectionError::EmptyContextNames);
				}
				let context_name = find_first_matching_context(&kubeconfig, context_names)?;
				tracing::debug!(context = %context_name, "using context from contextNames");
				let identifier = format!("context:{}", context_name);
				(context_name, identifier)
			}
		};

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(context_name),
				..Default::default()
			},
		)
		.await?;
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;

		// Also verifies the cluster is reachable before any diffing starts
		let server_version = client.apiserver_version().await?;
		tracing::debug!(
			cluster = %cluster_identifier,
			version = %server_version.git_version,
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			cluster_identifier,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Get the server version.
	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Get the cluster identifier (context name or API server URL).
	pub fn cluster_identifier(&self) -> &str {
		&self.cluster_identifier
	}
}

/// Find a kubeconfig context that uses a cluster with the given API server URL.
fn find_context_for_api_server(
	kubeconfig: &Kubeconfig,
	api_server: &str,
) -> Result<String, ConnectionError> {
	let matching_cluster = kubeconfig
		.clusters
		.iter()
		.find(|c| {
			c.cluster
				.as_ref()
				.is_some_and(|cluster| cluster.server.as_deref() == Some(api_server))
		})
		.ok_or_else(|| ConnectionError::ClusterNotFound(api_server.to_string()))?;

	let cluster_name = &matching_cluster.name;

	let matching_context = kubeconfig
		.contexts
		.iter()
		.find(|c| {
			c.context
				.as_ref()
				.is_some_and(|ctx| ctx.cluster.as_str() == cluster_name)
		})
		.ok_or_else(|| ConnectionError::ContextNotFoundForCluster(cluster_name.clone()))?;

	Ok(matching_context.name.clone())
}

/// Find the first context from the list that exists in kubeconfig.
fn find_first_matching_context(
	kubeconfig: &Kubeconfig,
	context_names: &[String],
) -> Result<String, ConnectionError> {
	context_names
		.iter()
		.find(|name| kubeconfig.contexts.iter().any(|c| &c.name == *name))
		.cloned()
		.ok_or_else(|| ConnectionError::ContextNotFound(context_names.to_vec()))
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;

	#[tokio::test]
	async fn test_connect_no_cluster_specified_errors() {
		let result = ClusterConnection::from_environment_with_kubeconfig(
			&EnvironmentSpec::default(),
			Kubeconfig::default(),
		)
		.await;
		assert_matches!(result, Err(ConnectionError::IncompleteSpec));
	}

	#[tokio::test]
	async fn test_connect_both_bindings_errors() {
		let env = EnvironmentSpec {
			api_server: Some("https://dev:6443".to_string()),
			context_names: Some(vec!["dev".to_string()]),
			..EnvironmentSpec::default()
		};
		let result =
			ClusterConnection::from_environment_with_kubeconfig(&env, Kubeconfig::default())
				.await;
		assert_matches!(result, Err(ConnectionError::AmbiguousSpec));
	}

	#[tokio::test]
	async fn test_connect_empty_context_names_errors() {
		let env = EnvironmentSpec {
			context_names: Some(vec![]),
			..EnvironmentSpec::default()
		};
		let result =
			ClusterConnection::from_environment_with_kubeconfig(&env, Kubeconfig::default())
				.await;
		assert_matches!(result, Err(ConnectionError::EmptyContextNames));
	}

	#[tokio::test]
	async fn test_connect_context_not_found() {
		let env = EnvironmentSpec {
			context_names: Some(vec!["nonexistent".to_string()]),
			..EnvironmentSpec::default()
		};
		let result =
			ClusterConnection::from_environment_with_kubeconfig(&env, Kubeconfig::default())
				.await;
		assert_matches!(
			result,
			Err(ConnectionError::ContextNotFound(contexts)) if contexts == vec!["nonexistent"]
		);
	}

	#[tokio::test]
	async fn test_connect_api_server_not_found() {
		let env = EnvironmentSpec {
			api_server: Some("https://unknown:6443".to_string()),
			..EnvironmentSpec::default()
		};
		let result =
			ClusterConnection::from_environment_with_kubeconfig(&env, Kubeconfig::default())
				.await;
		assert_matches!(
			result,
			Err(ConnectionError::ClusterNotFound(server)) if server == "https://unknown:6443"
		);
	}
}
