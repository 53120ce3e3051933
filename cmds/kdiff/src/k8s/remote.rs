//! Remote client: the view of the cluster the diff engine works against.

use std::{
	collections::{BTreeSet, HashSet},
	sync::Arc,
};

use async_trait::async_trait;
use kube::{
	api::{Api, DynamicObject, ListParams},
	discovery::ApiResource,
	Client,
};
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, instrument};

use super::{
	client::ClusterConnection,
	discovery::{ApiResourceCache, DiscoveryError},
	pristine::{self, PristineSource},
	ResourceScope,
};
use crate::{
	filter::{ComponentFilter, KindFilter},
	model::{
		K8sMeta, LocalObject, ObjectKey, RemoteObject, ANNOTATION_COMPONENT, LABEL_APPLICATION,
		LABEL_ENVIRONMENT,
	},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by a remote client.
#[derive(Debug, Error)]
pub enum RemoteError {
	#[error("fetching {key}")]
	Get {
		key: ObjectKey,
		#[source]
		source: BoxError,
	},

	#[error("listing {kind} objects")]
	List {
		kind: String,
		#[source]
		source: BoxError,
	},

	#[error("unknown resource type: {api_version}/{kind}")]
	UnknownResource { api_version: String, kind: String },

	#[error("converting {key} to JSON")]
	Json {
		key: ObjectKey,
		#[source]
		source: serde_json::Error,
	},

	#[error("list task panicked")]
	TaskPanicked(#[source] tokio::task::JoinError),
}

/// Namespaces and scopes a listing of extra objects has to cover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListScope {
	pub namespaces: BTreeSet<String>,
	/// Whether cluster-scoped types are listed at all.
	pub cluster_objects: bool,
}

impl ListScope {
	/// Scope touched by a set of objects, always including the default namespace.
	pub fn for_objects(
		objects: &[LocalObject],
		default_namespace: &str,
		is_namespaced: impl Fn(&ObjectKey) -> bool,
	) -> Self {
		let mut scope = Self::default();
		scope.namespaces.insert(default_namespace.to_string());
		for ob in objects {
			let key = ob.key();
			if is_namespaced(key) {
				let ns = key.namespace.as_deref().unwrap_or(default_namespace);
				scope.namespaces.insert(ns.to_string());
			} else {
				scope.cluster_objects = true;
			}
		}
		scope
	}
}

/// Everything needed to list the objects an environment owns in the cluster.
#[derive(Debug, Clone)]
pub struct ListQuery {
	pub application: String,
	pub environment: String,
	pub scope: ListScope,
	pub kind_filter: KindFilter,
	pub component_filter: ComponentFilter,
}

impl ListQuery {
	pub fn label_selector(&self) -> String {
		format!(
			"{LABEL_APPLICATION}={},{LABEL_ENVIRONMENT}={}",
			self.application, self.environment
		)
	}

	/// Whether a listed object passes the kind and component filters.
	pub fn matches(&self, ob: &RemoteObject) -> bool {
		self.kind_filter.matches(&ob.key.kind) && self.component_filter.matches(ob.component())
	}
}

/// Operations the diff engine needs from the cluster.
#[async_trait]
pub trait RemoteClient: Send + Sync {
	/// Fetch the live document for a key, `None` when it does not exist.
	async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, RemoteError>;

	/// List objects owned by an application environment, sorted by identity.
	async fn list_objects(&self, query: &ListQuery) -> Result<Vec<RemoteObject>, RemoteError>;

	/// Comparison baseline for a live document and where it came from.
	fn pristine_version(&self, live: &Value) -> (Value, PristineSource) {
		pristine::select(live)
	}

	fn display_name(&self, meta: &dyn K8sMeta) -> String;

	fn is_namespaced(&self, key: &ObjectKey) -> Result<bool, RemoteError>;
}

/// [`RemoteClient`] backed by a real cluster.
#[derive(Clone)]
pub struct KubeRemote {
	client: Client,
	cache: Arc<ApiResourceCache>,
	default_namespace: String,
	parallel: usize,
}

impl KubeRemote {
	/// Discover the cluster's API resources and build a client.
	///
	/// `objects` bounds lazy discovery on clusters without aggregated
	/// discovery; `with_list` forces full discovery since listing extra objects
	/// has to know every type.
	#[instrument(skip(connection, objects), fields(object_count = objects.len()))]
	pub async fn new(
		connection: &ClusterConnection,
		default_namespace: &str,
		objects: &[LocalObject],
		with_list: bool,
		parallel: usize,
	) -> Result<Self, DiscoveryError> {
		let required = objects.iter().map(|o| o.key().gvk()).collect();
		let cache = ApiResourceCache::build(connection.client(), required, with_list).await?;
		Ok(Self {
			client: connection.client().clone(),
			cache: Arc::new(cache),
			default_namespace: default_namespace.to_string(),
			parallel: parallel.max(1),
		})
	}

	fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
		match namespace {
			Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
			None => Api::all_with(self.client.clone(), ar),
		}
	}
}

#[async_trait]
impl RemoteClient for KubeRemote {
	#[instrument(skip(self), fields(object = %key))]
	async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, RemoteError> {
		let Some(discovered) = self.cache.lookup(&key.gvk()) else {
			debug!(api_version = %key.api_version(), "type not served by cluster, object is absent");
			return Ok(None);
		};
		let namespace = match discovered.scope {
			ResourceScope::Namespaced => {
				Some(key.namespace.as_deref().unwrap_or(&self.default_namespace))
			}
			ResourceScope::ClusterWide => None,
		};
		let api = self.dynamic_api(&discovered.api_resource, namespace);

		let found = api
			.get_opt(&key.name)
			.await
			.map_err(|e| RemoteError::Get {
				key: key.clone(),
				source: Box::new(e),
			})?;
		let Some(obj) = found else {
			return Ok(None);
		};

		let mut doc = serde_json::to_value(&obj).map_err(|source| RemoteError::Json {
			key: key.clone(),
			source,
		})?;
		ensure_type_meta(&mut doc, &discovered.api_resource);
		Ok(Some(doc))
	}

	#[instrument(skip_all, fields(app = %query.application, env = %query.environment))]
	async fn list_objects(&self, query: &ListQuery) -> Result<Vec<RemoteObject>, RemoteError> {
		let selector = query.label_selector();
		let semaphore = Arc::new(Semaphore::new(self.parallel));
		let mut join_set = JoinSet::new();

		for discovered in self.cache.listable() {
			let ar = &discovered.api_resource;
			if !query.kind_filter.matches(&ar.kind) {
				continue;
			}
			let namespaces: Vec<Option<String>> = match discovered.scope {
				ResourceScope::Namespaced => {
					query.scope.namespaces.iter().cloned().map(Some).collect()
				}
				ResourceScope::ClusterWide if query.scope.cluster_objects => vec![None],
				ResourceScope::ClusterWide => vec![],
			};
			for ns in namespaces {
				let api = self.dynamic_api(ar, ns.as_deref());
				let ar = ar.clone();
				let sem = semaphore.clone();
				let params = ListParams::default().labels(&selector);
				join_set.spawn(async move {
					// The semaphore is never closed, a failed acquire just runs unbounded
					let _permit = sem.acquire_owned().await.ok();
					list_type(api, ar, params).await
				});
			}
		}

		let mut seen = HashSet::new();
		let mut objects = Vec::new();
		while let Some(result) = join_set.join_next().await {
			for ob in result.map_err(RemoteError::TaskPanicked)?? {
				if query.matches(&ob) && seen.insert(ob.key.id()) {
					objects.push(ob);
				}
			}
		}
		objects.sort_by_cached_key(|o| o.key.id());
		debug!(count = objects.len(), "listed objects");
		Ok(objects)
	}

	fn display_name(&self, meta: &dyn K8sMeta) -> String {
		self.cache.display_name(meta)
	}

	fn is_namespaced(&self, key: &ObjectKey) -> Result<bool, RemoteError> {
		self.cache
			.is_namespaced(key)
			.ok_or_else(|| RemoteError::UnknownResource {
				api_version: key.api_version(),
				kind: key.kind.clone(),
			})
	}
}

/// List one type in one namespace (or cluster-wide).
///
/// Types the caller may not list, or that vanished since discovery, are
/// skipped rather than failing the whole listing.
#[instrument(skip_all, fields(kind = %ar.kind))]
async fn list_type(
	api: Api<DynamicObject>,
	ar: ApiResource,
	params: ListParams,
) -> Result<Vec<RemoteObject>, RemoteError> {
	let list = match api.list(&params).await {
		Ok(list) => list,
		Err(kube::Error::Api(ref err)) if matches!(err.code, 403 | 404 | 405) => {
			debug!(code = err.code, "skipping resource type");
			return Ok(Vec::new());
		}
		Err(e) => {
			return Err(RemoteError::List {
				kind: ar.kind.clone(),
				source: Box::new(e),
			})
		}
	};
	Ok(list
		.items
		.into_iter()
		.filter_map(|obj| remote_object(&ar, obj))
		.collect())
}

/// Identity of a listed object.
///
/// List items usually lack `apiVersion` and `kind`, so those come from the
/// resource that was listed.
fn remote_object(ar: &ApiResource, obj: DynamicObject) -> Option<RemoteObject> {
	let name = obj.metadata.name?;
	let component = obj
		.metadata
		.annotations
		.as_ref()
		.and_then(|a| a.get(ANNOTATION_COMPONENT))
		.cloned();
	Some(RemoteObject {
		key: ObjectKey {
			group: ar.group.clone(),
			version: ar.version.clone(),
			kind: ar.kind.clone(),
			namespace: obj.metadata.namespace,
			name,
		},
		component,
	})
}

fn ensure_type_meta(doc: &mut Value, ar: &ApiResource) {
	if let Some(obj) = doc.as_object_mut() {
		obj.entry("apiVersion")
			.or_insert_with(|| Value::String(ar.api_version.clone()));
		obj.entry("kind")
			.or_insert_with(|| Value::String(ar.kind.clone()));
	}
}
