//! End-to-end tests for the diff engine against an in-memory cluster.
//!
//! These go through `diff_objects` exactly as the `diff` command does, with
//! the cluster replaced by [`MemoryRemote`].

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use kdiff::{
	diff::{diff_objects, DiffError, DiffIgnores, DiffOptions, DiffOutcome, DiffRunError},
	model::{set_ownership, LocalObject},
	test_utils::{MemoryRemote, SharedBuffer},
};
use serde_json::{json, Value};

const APP: &str = "shop";
const ENV: &str = "dev";
const NAMESPACE: &str = "shop-dev";

fn owned(mut doc: Value, component: &str) -> Value {
	set_ownership(&mut doc, APP, ENV, component);
	doc
}

fn config_map(name: &str, data: Value) -> Value {
	owned(
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": name, "namespace": NAMESPACE},
			"data": data,
		}),
		"config",
	)
}

fn deployment(name: &str, replicas: u32) -> Value {
	owned(
		json!({
			"apiVersion": "apps/v1",
			"kind": "Deployment",
			"metadata": {"name": name, "namespace": NAMESPACE},
			"spec": {
				"replicas": replicas,
				"selector": {"matchLabels": {"app": name}},
				"template": {
					"metadata": {"labels": {"app": name}},
					"spec": {"containers": [{"name": name, "image": "nginx:1.27"}]},
				},
			},
		}),
		"web",
	)
}

fn local(doc: Value) -> LocalObject {
	let component = doc["metadata"]["annotations"]["kdiff.io/component"]
		.as_str()
		.unwrap()
		.to_string();
	LocalObject::new(component, ENV, doc).unwrap()
}

fn options() -> DiffOptions {
	DiffOptions::builder()
		.application(APP)
		.environment(ENV)
		.default_namespace(NAMESPACE)
		.build()
}

async fn run(cluster: MemoryRemote, objects: Vec<LocalObject>, opts: &DiffOptions) -> (DiffOutcome, String) {
	let out = SharedBuffer::default();
	let outcome = diff_objects(Arc::new(cluster), &objects, objects.clone(), opts, out.clone()).await;
	(outcome, out.contents())
}

#[tokio::test]
async fn test_missing_object_is_added() {
	let objects = vec![local(config_map("app-config", json!({"mode": "fast"})))];

	let (outcome, out) = run(MemoryRemote::default(), objects, &options()).await;

	assert_eq!(
		outcome.report.additions,
		vec!["configmap app-config -n shop-dev (source config)"]
	);
	assert_matches!(outcome.error, Some(DiffRunError::Different(1)));
	assert!(out.contains("--- live configmap app-config -n shop-dev (source config)\n"), "{out}");
	assert!(out.contains("+object doesn't exist on the server\n"), "{out}");
	// The live side is empty.
	assert!(!out.lines().any(|l| l.starts_with('-') && !l.starts_with("---")), "{out}");
}

#[tokio::test]
async fn test_identical_object_is_unchanged() {
	let doc = deployment("app", 2);
	let cluster = MemoryRemote::default().with_object(doc.clone());

	let (outcome, out) = run(cluster, vec![local(doc)], &options()).await;

	let report = outcome.into_result().unwrap();
	assert_eq!(report.same, 1);
	assert_eq!(report.differences(), 0);
	assert!(report.errors.is_empty());
	assert!(out.starts_with("---\nstats:\n"), "{out}");
}

#[tokio::test]
async fn test_extra_object_is_deleted() {
	let old_secret = owned(
		json!({
			"apiVersion": "v1",
			"kind": "Secret",
			"metadata": {"name": "old-creds", "namespace": NAMESPACE},
			"data": {"password": "aHVudGVyMg=="},
		}),
		"config",
	);
	let doc = config_map("app-config", json!({}));
	let cluster = MemoryRemote::default()
		.with_object(doc.clone())
		.with_object(old_secret);

	let (outcome, out) = run(cluster, vec![local(doc)], &options()).await;

	assert_eq!(
		outcome.report.deletions,
		vec!["secret old-creds -n shop-dev (source config)"]
	);
	assert_matches!(outcome.error, Some(DiffRunError::Different(1)));
	assert!(out.contains("-object doesn't exist locally\n"), "{out}");
	assert!(!out.contains("aHVudGVyMg=="), "{out}");
	assert!(out.contains("deletions:\n"), "{out}");
}

#[tokio::test]
async fn test_fetch_error_does_not_stop_siblings() {
	let cluster = MemoryRemote::default()
		.with_object(deployment("app", 2))
		.fail_get("app");
	let objects = vec![
		local(deployment("app", 3)),
		local(config_map("app-config", json!({}))),
	];

	let (outcome, out) = run(cluster, objects, &options()).await;

	assert_eq!(
		outcome.report.errors,
		vec!["deployment app -n shop-dev (source web)"]
	);
	assert_eq!(
		outcome.report.additions,
		vec!["configmap app-config -n shop-dev (source config)"]
	);
	assert_matches!(
		outcome.error,
		Some(DiffRunError::Dispatch(DiffError::Fetch { .. }))
	);
	assert!(out.contains("errors:\n"), "{out}");
}

#[tokio::test]
async fn test_ignore_all_labels() {
	let live = || {
		let mut doc = deployment("app", 2);
		doc["metadata"]["labels"]["deployed-by"] = json!("ci-1234");
		MemoryRemote::default().with_object(doc)
	};

	let mut opts = options();
	opts.ignores = DiffIgnores {
		all_labels: true,
		..DiffIgnores::default()
	};
	let (outcome, _) = run(live(), vec![local(deployment("app", 2))], &opts).await;
	assert_eq!(outcome.into_result().unwrap().same, 1);

	let (outcome, _) = run(live(), vec![local(deployment("app", 2))], &options()).await;
	assert_eq!(
		outcome.report.changes,
		vec!["deployment app -n shop-dev (source web)"]
	);
}

#[tokio::test]
async fn test_zero_context_lines_shows_no_context() {
	let live = config_map("app-config", json!({"a": "one", "b": "two", "c": "three"}));
	let desired = config_map("app-config", json!({"a": "one", "b": "TWO", "c": "three"}));

	let mut opts = options();
	opts.context_lines = 0;
	let (_, out) = run(
		MemoryRemote::default().with_object(live.clone()),
		vec![local(desired.clone())],
		&opts,
	)
	.await;
	let diff = out.split("---\nstats:").next().unwrap();
	let context: Vec<_> = diff.lines().filter(|l| l.starts_with(' ')).collect();
	assert!(context.is_empty(), "{out}");
	assert!(out.contains("-  b: two\n"), "{out}");
	assert!(out.contains("+  b: TWO\n"), "{out}");

	let (_, out) = run(
		MemoryRemote::default().with_object(live),
		vec![local(desired)],
		&options(),
	)
	.await;
	assert!(out.lines().any(|l| l == "   a: one"), "{out}");
}

#[tokio::test]
async fn test_outcomes_do_not_depend_on_parallelism() {
	let mut objects = Vec::new();
	for i in 0..24 {
		let name = format!("cm-{i:02}");
		objects.push(local(config_map(&name, json!({"value": format!("v{i}")}))));
	}
	let cluster = || {
		let mut cluster = MemoryRemote::default();
		for (i, ob) in objects.iter().enumerate() {
			let name = format!("cm-{i:02}");
			cluster = match i % 4 {
				// added
				0 => cluster,
				// unchanged
				1 => cluster.with_object(ob.to_document()),
				// changed
				2 => cluster.with_object(config_map(&name, json!({"value": "stale"}))),
				// failing
				_ => cluster.fail_get(&name),
			};
			cluster = cluster.slow(&name, Duration::from_millis((i * 7 % 5) as u64));
		}
		cluster.with_object(config_map("leftover", json!({})))
	};

	let mut sequential = options();
	sequential.parallel = 1;
	let mut parallel = options();
	parallel.parallel = 8;

	let (one, _) = run(cluster(), objects.clone(), &sequential).await;
	let (many, _) = run(cluster(), objects.clone(), &parallel).await;

	assert_eq!(one.report, many.report);
	let r = &one.report;
	assert_eq!(r.additions.len() + r.changes.len() + r.same + r.errors.len(), objects.len());
	assert_eq!(r.additions.len(), 6);
	assert_eq!(r.changes.len(), 6);
	assert_eq!(r.same, 6);
	assert_eq!(r.errors.len(), 6);
	// Dispatch failed, so the lister's results were never reported.
	assert!(r.deletions.is_empty());
	let mut sorted = r.changes.clone();
	sorted.sort();
	assert_eq!(r.changes, sorted);
}

#[tokio::test]
async fn test_cluster_scoped_object_is_not_reported_twice() {
	let role = |namespace: Option<&str>| {
		let mut doc = json!({
			"apiVersion": "rbac.authorization.k8s.io/v1",
			"kind": "ClusterRole",
			"metadata": {"name": "shop-reader"},
			"rules": [{"apiGroups": [""], "resources": ["configmaps"], "verbs": ["get"]}],
		});
		if let Some(ns) = namespace {
			doc["metadata"]["namespace"] = json!(ns);
		}
		owned(doc, "rbac")
	};
	let cluster = MemoryRemote::default()
		.cluster_scoped("ClusterRole")
		.with_object(role(None));

	let (outcome, out) = run(cluster, vec![local(role(Some(NAMESPACE)))], &options()).await;

	let report = outcome.into_result().unwrap();
	assert_eq!(report.same, 1);
	assert!(report.deletions.is_empty(), "{out}");
}

#[tokio::test]
async fn test_verbose_prints_unchanged_line() {
	let doc = config_map("app-config", json!({"a": "one"}));
	let mut opts = options();
	opts.verbose = 1;

	let (_, out) = run(
		MemoryRemote::default().with_object(doc.clone()),
		vec![local(doc)],
		&opts,
	)
	.await;

	assert!(
		out.starts_with("configmap app-config -n shop-dev (source config) unchanged\n---\nstats:\n"),
		"{out}"
	);
}
