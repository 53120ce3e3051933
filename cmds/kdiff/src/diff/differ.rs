//! Per-object reconciliation against the live cluster.

use std::{io, sync::Arc};

use bon::Builder;
use kdiff_render::{Options, RenderError};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, error, instrument};

use super::{
	ignores::DiffIgnores,
	output::LockWriter,
	stats::{DiffReport, DiffStats},
};
use crate::{
	k8s::remote::{RemoteClient, RemoteError},
	model::{hide_sensitive_info, K8sMeta, LocalObject, ModelError, RemoteObject},
};

const MISSING_ON_SERVER: &str = "\nobject doesn't exist on the server";
const MISSING_LOCALLY: &str = "\nobject doesn't exist locally";

#[derive(Debug, Error)]
pub enum DiffError {
	#[error("fetching live object for {name}")]
	Fetch {
		name: String,
		#[source]
		source: RemoteError,
	},

	#[error("hiding sensitive data of {name}")]
	Redact {
		name: String,
		#[source]
		source: ModelError,
	},

	#[error("rendering diff for {name}")]
	Render {
		name: String,
		#[source]
		source: RenderError,
	},

	#[error("writing diff output")]
	Write(#[from] io::Error),

	#[error("diff task panicked")]
	TaskPanicked(#[source] JoinError),
}

/// Header names for the live and desired side of an object.
fn names(name: &str) -> (String, String) {
	(format!("live {name}"), format!("config {name}"))
}

/// Compares objects with their live counterparts, records one outcome per
/// object and writes one block of output per difference.
#[derive(Builder)]
pub struct Differ {
	remote: Arc<dyn RemoteClient>,
	writer: Arc<LockWriter>,
	options: Options,
	#[builder(default)]
	stats: DiffStats,
	#[builder(default)]
	ignores: DiffIgnores,
	#[builder(default)]
	show_secrets: bool,
	#[builder(default)]
	verbose: u8,
}

impl Differ {
	/// Reconcile one local object.
	///
	/// Fetch, redaction and render failures are logged and recorded as errors
	/// before being returned, so the caller only has to decide whether the run
	/// as a whole failed.
	#[instrument(skip_all, fields(object = %ob.key()))]
	pub async fn diff(&self, ob: &LocalObject) -> Result<(), DiffError> {
		let name = self.remote.display_name(ob);
		let (left_name, right_name) = names(&name);

		let live = match self.remote.get(ob.key()).await {
			Ok(live) => live,
			Err(source) => return Err(self.failed(DiffError::Fetch { name, source })),
		};

		let Some(live) = live else {
			let opts = self.options.with_names(left_name, right_name);
			let text = match kdiff_render::strings("", MISSING_ON_SERVER, &opts) {
				Ok(text) => text,
				Err(source) => return Err(self.failed(DiffError::Render { name, source })),
			};
			self.stats.added(name);
			return self.emit(&text);
		};

		let (pristine, source) = self.remote.pristine_version(&live);
		debug!(%source, "selected comparison baseline");
		let left_name = format!("{left_name} (source: {source})");

		let (mut left, mut right) = match self.redact(pristine, ob.to_document()) {
			Ok(pair) => pair,
			Err(source) => return Err(self.failed(DiffError::Redact { name, source })),
		};
		self.ignores.preprocess(&mut left);
		self.ignores.preprocess(&mut right);

		let opts = self.options.with_names(left_name, right_name);
		let text = match kdiff_render::objects(&left, &right, &opts) {
			Ok(text) => text,
			Err(source) => return Err(self.failed(DiffError::Render { name, source })),
		};

		if text.is_empty() {
			self.stats.same();
			if self.verbose > 0 {
				self.writer.write_block(&format!("{name} unchanged\n"))?;
			}
			return Ok(());
		}
		self.stats.changed(name);
		self.emit(&text)
	}

	/// Report a live object with no local counterpart.
	#[instrument(skip_all, fields(object = %ob.key()))]
	pub fn deleted(&self, ob: &RemoteObject) -> Result<(), DiffError> {
		let name = self.remote.display_name(ob);
		let (left_name, right_name) = names(&name);
		let opts = self.options.with_names(left_name, right_name);
		let text = match kdiff_render::strings(MISSING_LOCALLY, "", &opts) {
			Ok(text) => text,
			Err(source) => return Err(self.failed(DiffError::Render { name, source })),
		};
		self.stats.deleted(name);
		self.emit(&text)
	}

	/// Finalize the outcomes recorded so far.
	pub fn finish(&self) -> DiffReport {
		self.stats.done()
	}

	pub(crate) fn writer(&self) -> &LockWriter {
		&self.writer
	}

	/// Record an object whose reconcile task panicked.
	pub fn panicked(&self, name: String, err: JoinError) -> DiffError {
		error!(object = %name, error = %err, "diff task panicked");
		self.stats.error(name);
		DiffError::TaskPanicked(err)
	}

	fn redact(&self, live: Value, local: Value) -> Result<(Value, Value), ModelError> {
		if self.show_secrets {
			return Ok((live, local));
		}
		Ok((hide_sensitive_info(&live)?, hide_sensitive_info(&local)?))
	}

	fn failed(&self, err: DiffError) -> DiffError {
		let name = match &err {
			DiffError::Fetch { name, .. }
			| DiffError::Redact { name, .. }
			| DiffError::Render { name, .. } => name.clone(),
			DiffError::Write(_) | DiffError::TaskPanicked(_) => return err,
		};
		error!(object = %name, error = %err, cause = %source_of(&err), "diff failed");
		self.stats.error(name);
		err
	}

	fn emit(&self, text: &str) -> Result<(), DiffError> {
		self.writer.write_block(&format!("{text}\n"))?;
		Ok(())
	}
}

fn source_of(err: &DiffError) -> String {
	std::error::Error::source(err).map_or_else(String::new, ToString::to_string)
}
