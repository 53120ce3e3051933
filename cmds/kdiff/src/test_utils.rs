//! Test doubles for the diff engine.
//!
//! Compiled for unit tests and, through the `test-utils` feature, for the
//! integration tests in `tests/`.

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	io::{self, Write},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
	k8s::{
		discovery::ApiResourceCache,
		remote::{ListQuery, RemoteClient, RemoteError},
	},
	model::{labels, K8sMeta, ObjectId, ObjectKey, RemoteObject, LABEL_APPLICATION, LABEL_ENVIRONMENT},
};

/// In-memory writer that can be inspected after being handed out.
#[derive(Debug, Default, Clone)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
	pub fn contents(&self) -> String {
		String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
	}
}

impl Write for SharedBuffer {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

/// A cluster held in memory.
///
/// Every kind is namespaced unless registered with
/// [`MemoryRemote::cluster_scoped`]. Display names use the lowercased kind.
#[derive(Default)]
pub struct MemoryRemote {
	objects: BTreeMap<ObjectId, Value>,
	failing_gets: HashSet<String>,
	panicking_gets: HashSet<String>,
	latency: HashMap<String, Duration>,
	cluster_kinds: HashSet<String>,
	fail_list: bool,
	gets: AtomicUsize,
	lists: AtomicUsize,
}

impl MemoryRemote {
	pub fn with_object(mut self, doc: Value) -> Self {
		let key = ObjectKey::from_document(&doc).unwrap();
		self.objects.insert(key.id(), doc);
		self
	}

	/// Make every `get` of an object with this name fail.
	pub fn fail_get(mut self, name: &str) -> Self {
		self.failing_gets.insert(name.to_string());
		self
	}

	/// Make every `get` of an object with this name panic.
	pub fn panic_on_get(mut self, name: &str) -> Self {
		self.panicking_gets.insert(name.to_string());
		self
	}

	/// Delay every `get` of an object with this name.
	pub fn slow(mut self, name: &str, latency: Duration) -> Self {
		self.latency.insert(name.to_string(), latency);
		self
	}

	pub fn fail_list(mut self) -> Self {
		self.fail_list = true;
		self
	}

	pub fn cluster_scoped(mut self, kind: &str) -> Self {
		self.cluster_kinds.insert(kind.to_string());
		self
	}

	pub fn get_calls(&self) -> usize {
		self.gets.load(Ordering::SeqCst)
	}

	pub fn list_calls(&self) -> usize {
		self.lists.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl RemoteClient for MemoryRemote {
	async fn get(&self, key: &ObjectKey) -> Result<Option<Value>, RemoteError> {
		self.gets.fetch_add(1, Ordering::SeqCst);
		match self.latency.get(&key.name) {
			Some(latency) => tokio::time::sleep(*latency).await,
			None => tokio::task::yield_now().await,
		}
		if self.panicking_gets.contains(&key.name) {
			panic!("get of {key} panicked");
		}
		if self.failing_gets.contains(&key.name) {
			return Err(RemoteError::Get {
				key: key.clone(),
				source: "connection refused".into(),
			});
		}
		Ok(self.objects.get(&key.id()).cloned())
	}

	async fn list_objects(&self, query: &ListQuery) -> Result<Vec<RemoteObject>, RemoteError> {
		self.lists.fetch_add(1, Ordering::SeqCst);
		if self.fail_list {
			return Err(RemoteError::List {
				kind: "ConfigMap".to_string(),
				source: "forbidden".into(),
			});
		}
		let owned = |doc: &Value| {
			let l = labels(doc);
			let get = |name: &str| l.and_then(|l| l.get(name)).and_then(Value::as_str);
			get(LABEL_APPLICATION) == Some(query.application.as_str())
				&& get(LABEL_ENVIRONMENT) == Some(query.environment.as_str())
		};
		Ok(self
			.objects
			.values()
			.filter(|doc| owned(doc))
			.map(|doc| RemoteObject::from_document(doc).unwrap())
			.filter(|ob| match &ob.key.namespace {
				Some(ns) => query.scope.namespaces.contains(ns),
				None => query.scope.cluster_objects,
			})
			.filter(|ob| query.matches(ob))
			.collect())
	}

	fn display_name(&self, meta: &dyn K8sMeta) -> String {
		ApiResourceCache::default().display_name(meta)
	}

	fn is_namespaced(&self, key: &ObjectKey) -> Result<bool, RemoteError> {
		Ok(!self.cluster_kinds.contains(&key.kind))
	}
}
