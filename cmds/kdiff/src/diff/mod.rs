//! The diff engine: compares local objects with the cluster and reports the
//! differences.
//!
//! [`diff_objects`] wires the parts together:
//!
//! 1. a [`Lister`] starts looking for live objects without a local
//!    counterpart,
//! 2. the local objects are sorted in dependency order and handed to a
//!    [`Differ`] with bounded parallelism,
//! 3. extra objects found by the lister are reported as deletions,
//! 4. a `stats:` summary is printed and the run outcome derived.

pub mod differ;
pub mod ignores;
pub mod lister;
pub mod output;
pub mod parallel;
pub mod stats;

use std::{io::Write, sync::Arc};

use bon::Builder;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub use self::{
	differ::{DiffError, Differ},
	ignores::DiffIgnores,
	lister::{ListError, Lister, RemoteLister, StubLister},
	output::LockWriter,
	stats::{DiffReport, DiffStats},
};
use self::parallel::run_in_parallel;
use crate::{
	filter::{ComponentFilter, KindFilter},
	k8s::remote::{ListQuery, ListScope, RemoteClient},
	model::{K8sMeta, LocalObject, ObjectKey},
	objsort,
};

/// Settings of one diff run.
#[derive(Debug, Clone, Builder)]
pub struct DiffOptions {
	#[builder(into)]
	pub application: String,
	#[builder(into)]
	pub environment: String,
	#[builder(into)]
	pub default_namespace: String,
	/// Context lines around changes, `0` for none.
	#[builder(default = kdiff_render::DEFAULT_CONTEXT)]
	pub context_lines: usize,
	#[builder(default)]
	pub colorize: bool,
	#[builder(default = 5)]
	pub parallel: usize,
	#[builder(default)]
	pub show_secrets: bool,
	/// Report live objects that no longer exist locally.
	#[builder(default = true)]
	pub show_deletes: bool,
	#[builder(default)]
	pub ignores: DiffIgnores,
	#[builder(default)]
	pub verbose: u8,
	#[builder(default)]
	pub kind_filter: KindFilter,
	#[builder(default)]
	pub component_filter: ComponentFilter,
}

impl DiffOptions {
	/// Options for the renderer.
	///
	/// The renderer treats a context of `0` as "use the default", so "no
	/// context" is passed as `-1`.
	pub fn render_options(&self) -> kdiff_render::Options {
		let context = match self.context_lines {
			0 => -1,
			n => i32::try_from(n).unwrap_or(i32::MAX),
		};
		kdiff_render::Options {
			context,
			colorize: self.colorize,
			..kdiff_render::Options::default()
		}
	}
}

#[derive(Debug, Error)]
pub enum DiffRunError {
	#[error(transparent)]
	Dispatch(DiffError),

	#[error(transparent)]
	List(ListError),

	#[error("reporting deleted objects")]
	Deleted(#[source] DiffError),

	#[error("printing summary")]
	Summary(#[source] SummaryError),

	#[error("{0} object(s) different")]
	Different(usize),
}

#[derive(Debug, Error)]
pub enum SummaryError {
	#[error(transparent)]
	Yaml(#[from] serde_yaml_with_quirks::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Report of a run together with the error that decides its exit status.
///
/// The report is complete even when the run failed.
#[derive(Debug)]
pub struct DiffOutcome {
	pub report: DiffReport,
	pub error: Option<DiffRunError>,
}

impl DiffOutcome {
	pub fn into_result(self) -> Result<DiffReport, DiffRunError> {
		match self.error {
			Some(e) => Err(e),
			None => Ok(self.report),
		}
	}
}

fn assume_namespaced(remote: &dyn RemoteClient, key: &ObjectKey) -> bool {
	remote.is_namespaced(key).unwrap_or_else(|e| {
		debug!(object = %key, error = %e, "namespacing unknown, assuming namespaced");
		true
	})
}

/// Put an object in the namespace the cluster will report it under: the
/// default one for namespaced kinds that declare none, no namespace at all
/// for cluster-scoped kinds.
fn normalize_namespace(
	ob: LocalObject,
	remote: &dyn RemoteClient,
	default_namespace: &str,
) -> LocalObject {
	if assume_namespaced(remote, ob.key()) {
		ob.with_default_namespace(default_namespace)
	} else {
		ob.without_namespace()
	}
}

/// Diff `selected` against the cluster and print the results to `out`.
///
/// `known` is every object of the environment, filtered or not: only live
/// objects outside of it are reported as deleted. Namespaces of both are
/// normalized before any identity is compared.
#[instrument(
	skip_all,
	fields(app = %opts.application, env = %opts.environment, objects = selected.len())
)]
pub async fn diff_objects(
	remote: Arc<dyn RemoteClient>,
	known: &[LocalObject],
	selected: Vec<LocalObject>,
	opts: &DiffOptions,
	out: impl Write + Send + 'static,
) -> DiffOutcome {
	let normalize = |ob: LocalObject| normalize_namespace(ob, &*remote, &opts.default_namespace);
	let known: Vec<_> = known.iter().cloned().map(&normalize).collect();
	let mut selected: Vec<_> = selected.into_iter().map(&normalize).collect();

	let mut lister: Box<dyn Lister> = if opts.show_deletes {
		Box::new(RemoteLister::new(remote.clone()))
	} else {
		Box::new(StubLister)
	};
	let scope = ListScope::for_objects(&known, &opts.default_namespace, |k| {
		assume_namespaced(&*remote, k)
	});
	lister.start(
		&known,
		ListQuery {
			application: opts.application.clone(),
			environment: opts.environment.clone(),
			scope,
			kind_filter: opts.kind_filter.clone(),
			component_filter: opts.component_filter.clone(),
		},
	);

	objsort::sort(&mut selected, |k| assume_namespaced(&*remote, k));

	let differ = Arc::new(
		Differ::builder()
			.remote(remote.clone())
			.writer(Arc::new(LockWriter::new(out)))
			.options(opts.render_options())
			.ignores(opts.ignores.clone())
			.show_secrets(opts.show_secrets)
			.verbose(opts.verbose)
			.build(),
	);

	let names: Vec<_> = selected.iter().map(|ob| remote.display_name(ob)).collect();
	let d = differ.clone();
	let dispatched = run_in_parallel(
		selected,
		opts.parallel,
		move |ob: LocalObject| {
			let d = d.clone();
			async move { d.diff(&ob).await }
		},
		|index, err| {
			let name = names.get(index).cloned().unwrap_or_default();
			differ.panicked(name, err)
		},
	)
	.await;

	let mut list_error = None;
	let mut deleted_error = None;
	if dispatched.is_ok() {
		match lister.results().await {
			Ok(extra) => {
				for ob in &extra {
					if let Err(e) = differ.deleted(ob) {
						deleted_error.get_or_insert(e);
					}
				}
			}
			Err(e) => list_error = Some(e),
		}
	}

	let report = differ.finish();
	let summary = report
		.summary()
		.map_err(SummaryError::from)
		.and_then(|s| {
			differ
				.writer()
				.write_block(&s)
				.map_err(SummaryError::from)
		});
	info!(
		additions = report.additions.len(),
		changes = report.changes.len(),
		deletions = report.deletions.len(),
		same = report.same,
		errors = report.errors.len(),
		"diff finished"
	);

	let error = if let Err(e) = dispatched {
		Some(DiffRunError::Dispatch(e))
	} else if let Some(e) = list_error {
		Some(DiffRunError::List(e))
	} else if let Some(e) = deleted_error {
		Some(DiffRunError::Deleted(e))
	} else if let Err(e) = summary {
		Some(DiffRunError::Summary(e))
	} else if report.differences() > 0 {
		Some(DiffRunError::Different(report.differences()))
	} else {
		None
	};
	DiffOutcome { report, error }
}
