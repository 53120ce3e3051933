//! Dependency ordering of objects.
//!
//! Objects are ordered so that anything another object may depend on
//! (namespaces, CRDs, RBAC, config) comes first, and admission webhooks come
//! last so they cannot block the objects they would validate.

use crate::model::{K8sMeta, ObjectKey};

/// Kinds in the order they should be processed.
const KIND_ORDER: &[&str] = &[
	"Namespace",
	"CustomResourceDefinition",
	"StorageClass",
	"ServiceAccount",
	"PodSecurityPolicy",
	"Role",
	"ClusterRole",
	"RoleBinding",
	"ClusterRoleBinding",
	"ConfigMap",
	"Secret",
	"PersistentVolume",
	"PersistentVolumeClaim",
	"LimitRange",
	"ResourceQuota",
	"Service",
	"DaemonSet",
	"Pod",
	"ReplicationController",
	"ReplicaSet",
	"Deployment",
	"HorizontalPodAutoscaler",
	"StatefulSet",
	"Job",
	"CronJob",
	"Ingress",
	"APIService",
];

const LAST_KINDS: &[&str] = &[
	"MutatingWebhookConfiguration",
	"ValidatingWebhookConfiguration",
];

fn rank(key: &ObjectKey, is_namespaced: &impl Fn(&ObjectKey) -> bool) -> usize {
	if let Some(pos) = KIND_ORDER.iter().position(|k| *k == key.kind) {
		return pos;
	}
	if let Some(pos) = LAST_KINDS.iter().position(|k| *k == key.kind) {
		return KIND_ORDER.len() + 2 + pos;
	}
	if is_namespaced(key) {
		KIND_ORDER.len() + 1
	} else {
		KIND_ORDER.len()
	}
}

/// Sort objects in dependency order.
///
/// The order is total and stable: ties on kind rank are broken by group,
/// kind, namespace and name. Namespacing of kinds missing from the rank table
/// comes from `is_namespaced`.
pub fn sort<T: K8sMeta>(objects: &mut [T], is_namespaced: impl Fn(&ObjectKey) -> bool) {
	objects.sort_by_cached_key(|o| {
		let key = o.key();
		(
			rank(key, &is_namespaced),
			key.group.clone(),
			key.kind.clone(),
			key.namespace.clone(),
			key.name.clone(),
		)
	});
}
