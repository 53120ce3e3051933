//! Kubernetes API resource discovery and caching.
//!
//! Discovery results are cached by GroupVersionKind so that lookups for
//! namespacing, plural names and listable types never hit the network again.

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use kube::{
	core::GroupVersionKind,
	discovery::{oneshot::pinned_kind, verbs, ApiCapabilities, ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::instrument;

use super::ResourceScope;
use crate::model::{K8sMeta, ObjectKey};

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),

	#[error("discovery task panicked")]
	TaskPanicked(#[source] tokio::task::JoinError),

	#[error("failed to discover resource {api_version}/{kind}")]
	ResourceDiscovery {
		api_version: String,
		kind: String,
		#[source]
		source: kube::Error,
	},
}

/// Discovered API resource with scope and capabilities.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
	/// API capabilities (verbs, subresources, etc.)
	pub capabilities: ApiCapabilities,
}

impl DiscoveredResource {
	pub fn new(api_resource: ApiResource, capabilities: ApiCapabilities) -> Self {
		let scope = match capabilities.scope {
			Scope::Namespaced => ResourceScope::Namespaced,
			Scope::Cluster => ResourceScope::ClusterWide,
		};
		Self {
			api_resource,
			scope,
			capabilities,
		}
	}

	pub fn is_listable(&self) -> bool {
		self.capabilities.supports_operation(verbs::LIST)
	}
}

/// Cached API resource discovery results.
#[derive(Debug, Clone, Default)]
pub struct ApiResourceCache {
	resources: HashMap<GroupVersionKind, DiscoveredResource>,
	/// Preferred version of each group and kind, in discovery order.
	preferred: Vec<GroupVersionKind>,
}

impl ApiResourceCache {
	/// Maximum concurrent discovery requests for lazy fallback.
	const MAX_CONCURRENT_DISCOVERIES: usize = 8;

	/// Build the cache by querying the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API calls.
	/// Falls back to lazy discovery of only the specified keys for older clusters,
	/// unless `need_full_discovery` is true (listing extra objects needs every type).
	#[instrument(skip(client, required_keys), fields(key_count = required_keys.len(), need_full = need_full_discovery))]
	pub async fn build(
		client: &Client,
		required_keys: HashSet<GroupVersionKind>,
		need_full_discovery: bool,
	) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(&discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				if need_full_discovery {
					Self::build_full(client).await
				} else {
					Self::build_lazy(client, required_keys).await
				}
			}
		}
	}

	/// Build cache using full discovery (N+2 API calls).
	#[instrument(skip(client))]
	async fn build_full(client: &Client) -> Result<Self, DiscoveryError> {
		let discovery = Discovery::new(client.clone())
			.run()
			.await
			.map_err(DiscoveryError::FullDiscovery)?;
		Ok(Self::from_discovery(&discovery))
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		// Versions come in preference order, so the first version seen for a
		// group and kind is the one to list with
		Self::from_resources(discovery.groups().flat_map(|group| {
			group
				.versions()
				.flat_map(|ver| group.versioned_resources(ver))
				.collect::<Vec<_>>()
		}))
	}

	/// Build a cache from resources in preference order.
	pub fn from_resources(
		resources: impl IntoIterator<Item = (ApiResource, ApiCapabilities)>,
	) -> Self {
		let mut cache = Self::default();
		let mut seen_kinds = HashSet::new();
		for (ar, caps) in resources {
			let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
			if seen_kinds.insert((ar.group.clone(), ar.kind.clone())) {
				cache.preferred.push(gvk.clone());
			}
			cache.resources.insert(gvk, DiscoveredResource::new(ar, caps));
		}
		cache
	}

	/// Build cache lazily by discovering only the specified resource keys.
	#[instrument(skip(client, keys), fields(key_count = keys.len()))]
	async fn build_lazy(
		client: &Client,
		keys: HashSet<GroupVersionKind>,
	) -> Result<Self, DiscoveryError> {
		let semaphore = Arc::new(Semaphore::new(Self::MAX_CONCURRENT_DISCOVERIES));
		let mut join_set = JoinSet::new();

		for gvk in keys {
			let client = client.clone();
			let sem = semaphore.clone();

			join_set.spawn(async move {
				// The semaphore is never closed, a failed acquire just runs unbounded
				let _permit = sem.acquire_owned().await.ok();
				tracing::debug!(
					api_version = %gvk.api_version(),
					kind = %gvk.kind,
					"discovering resource"
				);
				match pinned_kind(&client, &gvk).await {
					Ok(found) => Ok(found),
					Err(e) => Err((gvk, e)),
				}
			});
		}

		let mut found = Vec::new();
		let mut errors = Vec::new();
		while let Some(result) = join_set.join_next().await {
			match result.map_err(DiscoveryError::TaskPanicked)? {
				Ok(resource) => found.push(resource),
				Err((gvk, e)) => {
					tracing::warn!(
						api_version = %gvk.api_version(),
						kind = %gvk.kind,
						error = %e,
						"failed to discover resource"
					);
					errors.push((gvk, e));
				}
			}
		}

		if found.is_empty() && !errors.is_empty() {
			let (gvk, e) = errors.remove(0);
			return Err(DiscoveryError::ResourceDiscovery {
				api_version: gvk.api_version(),
				kind: gvk.kind,
				source: e,
			});
		}

		// Keep a stable order for the preferred list
		found.sort_by(|(a, _), (b, _)| {
			(&a.group, &a.kind, &a.version).cmp(&(&b.group, &b.kind, &b.version))
		});
		Ok(Self::from_resources(found))
	}

	/// Look up a resource by its GroupVersionKind.
	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&DiscoveredResource> {
		self.resources.get(gvk)
	}

	/// Listable resources, one per group and kind, in preferred version.
	pub fn listable(&self) -> impl Iterator<Item = &DiscoveredResource> {
		self.preferred
			.iter()
			.filter_map(|gvk| self.resources.get(gvk))
			.filter(|d| d.is_listable())
	}

	/// Namespacing of a key's type, `None` when the cluster does not serve it.
	pub fn is_namespaced(&self, key: &ObjectKey) -> Option<bool> {
		self.lookup(&key.gvk())
			.map(|d| d.scope == ResourceScope::Namespaced)
	}

	/// Name used for an object in diff headers and log lines.
	///
	/// Format: `<plural> <name>[ -n <namespace>][ (source <component>)]`.
	/// Types the cluster does not serve fall back to the lowercased kind.
	pub fn display_name(&self, meta: &dyn K8sMeta) -> String {
		let key = meta.key();
		let plural = self.lookup(&key.gvk()).map_or_else(
			|| key.kind.to_lowercase(),
			|d| d.api_resource.plural.clone(),
		);
		let mut out = format!("{} {}", plural, key.name);
		if let Some(ns) = &key.namespace {
			out.push_str(" -n ");
			out.push_str(ns);
		}
		if let Some(component) = meta.component() {
			out.push_str(" (source ");
			out.push_str(component);
			out.push(')');
		}
		out
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::model::RemoteObject;

	pub(crate) fn resource(
		group: &str,
		version: &str,
		kind: &str,
		plural: &str,
		scope: Scope,
	) -> (ApiResource, ApiCapabilities) {
		let gvk = GroupVersionKind::gvk(group, version, kind);
		(
			ApiResource::from_gvk_with_plural(&gvk, plural),
			ApiCapabilities {
				scope,
				subresources: vec![],
				operations: vec![verbs::GET.to_string(), verbs::LIST.to_string()],
			},
		)
	}

	pub(crate) fn test_cache() -> ApiResourceCache {
		ApiResourceCache::from_resources(vec![
			resource("", "v1", "ConfigMap", "configmaps", Scope::Namespaced),
			resource("", "v1", "Secret", "secrets", Scope::Namespaced),
			resource("", "v1", "Namespace", "namespaces", Scope::Cluster),
			resource("apps", "v1", "Deployment", "deployments", Scope::Namespaced),
			resource("autoscaling", "v2", "HorizontalPodAutoscaler", "horizontalpodautoscalers", Scope::Namespaced),
			resource("autoscaling", "v1", "HorizontalPodAutoscaler", "horizontalpodautoscalers", Scope::Namespaced),
		])
	}

	fn key(group: &str, version: &str, kind: &str, namespace: Option<&str>, name: &str) -> ObjectKey {
		ObjectKey {
			group: group.to_string(),
			version: version.to_string(),
			kind: kind.to_string(),
			namespace: namespace.map(str::to_string),
			name: name.to_string(),
		}
	}

	#[test]
	fn test_is_namespaced() {
		let cache = test_cache();
		assert_eq!(cache.is_namespaced(&key("", "v1", "ConfigMap", None, "x")), Some(true));
		assert_eq!(cache.is_namespaced(&key("", "v1", "Namespace", None, "x")), Some(false));
		assert_eq!(cache.is_namespaced(&key("example.com", "v1", "Widget", None, "x")), None);
	}

	#[test]
	fn test_listable_uses_preferred_version() {
		let cache = test_cache();
		let hpas: Vec<_> = cache
			.listable()
			.filter(|d| d.api_resource.kind == "HorizontalPodAutoscaler")
			.map(|d| d.api_resource.version.clone())
			.collect();
		assert_eq!(hpas, vec!["v2"]);
		assert_eq!(cache.listable().count(), 5);
	}

	#[test]
	fn test_listable_skips_unlistable() {
		let (ar, mut caps) = resource("", "v1", "Binding", "bindings", Scope::Namespaced);
		caps.operations = vec![verbs::CREATE.to_string()];
		let cache = ApiResourceCache::from_resources(vec![(ar, caps)]);
		assert_eq!(cache.listable().count(), 0);
	}

	#[test]
	fn test_display_name() {
		let cache = test_cache();
		let ob = RemoteObject {
			key: key("apps", "v1", "Deployment", Some("web"), "app"),
			component: Some("frontend".to_string()),
		};
		assert_eq!(
			cache.display_name(&ob),
			"deployments app -n web (source frontend)"
		);

		let ob = RemoteObject {
			key: key("example.com", "v1", "Widget", None, "w"),
			component: None,
		};
		assert_eq!(cache.display_name(&ob), "widget w");
	}
}
