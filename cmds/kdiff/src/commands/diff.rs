//! Diff command handler.
//!
//! Loads the environment's objects, connects to its cluster and prints the
//! differences between the two.

use std::{
	io::{IsTerminal, Write},
	path::PathBuf,
	sync::Arc,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, ValueEnum};
use tracing::{info, instrument};

use super::util::{create_tokio_runtime, UsageError};
use crate::{
	components,
	config::{self, LoadedApp},
	diff::{diff_objects, DiffIgnores, DiffOptions},
	filter::{ComponentFilter, KindFilter},
	k8s::{
		client::ClusterConnection,
		remote::{KubeRemote, RemoteClient},
	},
	model::{K8sMeta, LocalObject, BASELINE},
	spec::EnvironmentSpec,
};

/// When to paint the diff output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
	/// Color when stdout is a terminal.
	#[default]
	Auto,
	Always,
	Never,
}

impl ColorMode {
	pub fn should_colorize(self) -> bool {
		match self {
			ColorMode::Auto => std::io::stdout().is_terminal(),
			ColorMode::Always => true,
			ColorMode::Never => false,
		}
	}
}

#[derive(Args, Debug)]
pub struct DiffArgs {
	/// Environment to compare with its cluster
	pub environment: String,

	/// Directory to start searching for kdiff.yaml from
	#[arg(long, default_value = ".")]
	pub root: PathBuf,

	/// Lines of context around changes, 0 for none
	#[arg(long, visible_alias = "context", default_value_t = kdiff_render::DEFAULT_CONTEXT)]
	pub context_lines: usize,

	/// Number of objects compared at the same time
	#[arg(long, default_value_t = 5)]
	pub parallel: usize,

	/// Show secret values instead of their fingerprints
	#[arg(short = 'S', long)]
	pub show_secrets: bool,

	/// Report objects that exist in the cluster but no longer locally
	#[arg(long, default_value_t = true, action = ArgAction::Set)]
	pub show_deletes: bool,

	/// Leave all labels out of the comparison
	#[arg(long)]
	pub ignore_all_labels: bool,

	/// Leave a label out of the comparison
	#[arg(long = "ignore-label", value_name = "NAME")]
	pub ignore_labels: Vec<String>,

	/// Leave all annotations out of the comparison
	#[arg(long)]
	pub ignore_all_annotations: bool,

	/// Leave an annotation out of the comparison
	#[arg(long = "ignore-annotation", value_name = "NAME")]
	pub ignore_annotations: Vec<String>,

	/// Only diff objects of these components
	#[arg(short = 'c', long = "component", value_name = "NAME")]
	pub components: Vec<String>,

	/// Skip objects of these components
	#[arg(short = 'C', long = "exclude-component", value_name = "NAME")]
	pub exclude_components: Vec<String>,

	/// Only diff objects of these kinds
	#[arg(short = 'k', long = "kind", value_name = "KIND")]
	pub kinds: Vec<String>,

	/// Skip objects of these kinds
	#[arg(short = 'K', long = "exclude-kind", value_name = "KIND")]
	pub exclude_kinds: Vec<String>,

	/// Controls color in diff output
	#[arg(long, default_value = "auto", value_enum)]
	pub color: ColorMode,
}

/// Everything decided before talking to the cluster.
#[derive(Debug)]
pub struct DiffPlan {
	pub environment: EnvironmentSpec,
	pub options: DiffOptions,
	/// Every object of the environment.
	pub objects: Vec<LocalObject>,
}

impl DiffPlan {
	/// Objects passing the component and kind filters.
	pub fn selected(&self, objects: &[LocalObject]) -> Vec<LocalObject> {
		objects
			.iter()
			.filter(|o| {
				self.options.component_filter.matches(o.component())
					&& self.options.kind_filter.matches(&o.key().kind)
			})
			.cloned()
			.collect()
	}
}

/// Run the diff command.
pub fn run<W: Write + Send + 'static>(args: DiffArgs, verbose: u8, writer: W) -> Result<()> {
	let plan = prepare(&args, verbose)?;
	let runtime = create_tokio_runtime()?;
	runtime.block_on(diff_environment(plan, writer))
}

/// Validate arguments, read `kdiff.yaml` and load the environment's objects.
pub fn prepare(args: &DiffArgs, verbose: u8) -> Result<DiffPlan> {
	if args.environment == BASELINE {
		return Err(
			UsageError::new("cannot diff the baseline environment, use a real environment").into(),
		);
	}
	let component_filter =
		ComponentFilter::new(args.components.clone(), args.exclude_components.clone())
			.map_err(|e| UsageError::new(e.to_string()))?;
	let kind_filter = KindFilter::new(args.kinds.clone(), args.exclude_kinds.clone())
		.map_err(|e| UsageError::new(e.to_string()))?;

	let loaded = config::load_from_directory(&args.root)?;
	let environment = find_environment(&loaded, &args.environment)?.clone();

	let objects = components::load(
		&loaded.app,
		&args.environment,
		&environment,
		&loaded.components_dir(),
	)
	.with_context(|| format!("loading components of environment {}", args.environment))?;

	let options = DiffOptions::builder()
		.application(loaded.app.name())
		.environment(&args.environment)
		.default_namespace(&environment.default_namespace)
		.context_lines(args.context_lines)
		.colorize(args.color.should_colorize())
		.parallel(args.parallel)
		.show_secrets(args.show_secrets)
		.show_deletes(args.show_deletes)
		.ignores(DiffIgnores {
			all_labels: args.ignore_all_labels,
			all_annotations: args.ignore_all_annotations,
			label_names: args.ignore_labels.clone(),
			annotation_names: args.ignore_annotations.clone(),
		})
		.verbose(verbose)
		.kind_filter(kind_filter)
		.component_filter(component_filter)
		.build();

	Ok(DiffPlan {
		environment,
		options,
		objects,
	})
}

fn find_environment<'a>(loaded: &'a LoadedApp, name: &str) -> Result<&'a EnvironmentSpec, UsageError> {
	loaded.app.environment(name).ok_or_else(|| {
		let known: Vec<_> = loaded.app.spec.environments.keys().map(String::as_str).collect();
		UsageError::new(format!(
			"invalid environment {name:?}, known environments: {}",
			known.join(", ")
		))
	})
}

#[instrument(skip_all, fields(env = %plan.options.environment))]
async fn diff_environment<W: Write + Send + 'static>(plan: DiffPlan, writer: W) -> Result<()> {
	let connection = ClusterConnection::from_environment(&plan.environment)
		.await
		.with_context(|| format!("connecting to cluster of {}", plan.options.environment))?;
	info!(cluster = %connection.cluster_identifier(), "connected");

	let remote = KubeRemote::new(
		&connection,
		&plan.options.default_namespace,
		&plan.objects,
		plan.options.show_deletes,
		plan.options.parallel,
	)
	.await
	.context("discovering cluster resources")?;

	let selected = plan.selected(&plan.objects);
	let remote: Arc<dyn RemoteClient> = Arc::new(remote);
	diff_objects(remote, &plan.objects, selected, &plan.options, writer)
		.await
		.into_result()?;
	Ok(())
}
