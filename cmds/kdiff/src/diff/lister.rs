//! Discovery of live objects that no longer exist locally.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, instrument, Instrument};

use crate::{
	k8s::remote::{ListQuery, RemoteClient, RemoteError},
	model::{K8sMeta, LocalObject, RemoteObject},
};

#[derive(Debug, Error)]
pub enum ListError {
	#[error("listing extra objects")]
	Remote(#[source] RemoteError),

	#[error("listing task panicked")]
	TaskPanicked(#[source] JoinError),
}

/// Two-phase listing: started before the per-object diffs, collected after.
#[async_trait]
pub trait Lister: Send {
	/// Begin listing. `known` are the identities that exist locally.
	fn start(&mut self, known: &[LocalObject], query: ListQuery);

	/// Objects found in the cluster but not in `known`, ordered by identity.
	async fn results(&mut self) -> Result<Vec<RemoteObject>, ListError>;
}

/// Lister used when deletions are not reported.
#[derive(Debug, Default)]
pub struct StubLister;

#[async_trait]
impl Lister for StubLister {
	fn start(&mut self, _known: &[LocalObject], _query: ListQuery) {}

	async fn results(&mut self) -> Result<Vec<RemoteObject>, ListError> {
		Ok(Vec::new())
	}
}

/// Lists in a background task so that the listing overlaps the diffs.
pub struct RemoteLister {
	remote: Arc<dyn RemoteClient>,
	task: Option<JoinHandle<Result<Vec<RemoteObject>, ListError>>>,
}

impl RemoteLister {
	pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
		Self { remote, task: None }
	}
}

#[async_trait]
impl Lister for RemoteLister {
	#[instrument(skip_all, fields(known = known.len()))]
	fn start(&mut self, known: &[LocalObject], query: ListQuery) {
		let known: HashSet<_> = known.iter().map(|o| o.key().id()).collect();
		let remote = self.remote.clone();
		let task = async move {
			let listed = remote
				.list_objects(&query)
				.await
				.map_err(ListError::Remote)?;
			let mut extra: Vec<_> = listed
				.into_iter()
				.filter(|o| !known.contains(&o.key.id()))
				.collect();
			extra.sort_by_cached_key(|o| o.key.id());
			debug!(count = extra.len(), "found extra objects");
			Ok(extra)
		};
		self.task = Some(tokio::spawn(task.in_current_span()));
	}

	async fn results(&mut self) -> Result<Vec<RemoteObject>, ListError> {
		match self.task.take() {
			Some(task) => task.await.map_err(ListError::TaskPanicked)?,
			None => Ok(Vec::new()),
		}
	}
}

impl Drop for RemoteLister {
	fn drop(&mut self) {
		if let Some(task) = &self.task {
			task.abort();
		}
	}
}
