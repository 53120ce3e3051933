//! Pristine version selection.
//!
//! A live object carries fields the server fills in (status, uid, managed
//! fields, ...). Comparing the desired document against it would always show
//! differences, so the comparison baseline is the best available record of
//! what was last applied.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};

/// Annotation holding the base64-encoded JSON of the last applied object.
///
/// Written by the deploy tooling on apply. kdiff only reads it.
pub const ANNOTATION_LAST_APPLIED: &str = "kdiff.io/last-applied";

/// Annotation kubectl writes on client-side apply.
pub const ANNOTATION_KUBECTL_LAST_APPLIED: &str =
	"kubectl.kubernetes.io/last-applied-configuration";

/// Metadata fields populated by the server.
const SERVER_METADATA_FIELDS: &[&str] = &[
	"uid",
	"resourceVersion",
	"generation",
	"creationTimestamp",
	"managedFields",
	"selfLink",
];

/// Where a pristine version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PristineSource {
	KdiffAnnotation,
	KubectlAnnotation,
	LiveObject,
}

impl fmt::Display for PristineSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PristineSource::KdiffAnnotation => write!(f, "kdiff annotation"),
			PristineSource::KubectlAnnotation => write!(f, "kubectl annotation"),
			PristineSource::LiveObject => write!(f, "live object"),
		}
	}
}

/// Pick the comparison baseline for a live object.
///
/// Malformed annotations are logged and skipped.
pub fn select(live: &Value) -> (Value, PristineSource) {
	if let Some(encoded) = crate::model::annotation(live, ANNOTATION_LAST_APPLIED) {
		match decode_kdiff_annotation(encoded) {
			Some(v) => return (v, PristineSource::KdiffAnnotation),
			None => tracing::warn!(
				annotation = ANNOTATION_LAST_APPLIED,
				"ignoring undecodable annotation"
			),
		}
	}
	if let Some(raw) = crate::model::annotation(live, ANNOTATION_KUBECTL_LAST_APPLIED) {
		match serde_json::from_str::<Value>(raw) {
			Ok(v) if v.is_object() => return (v, PristineSource::KubectlAnnotation),
			_ => tracing::warn!(
				annotation = ANNOTATION_KUBECTL_LAST_APPLIED,
				"ignoring unparseable annotation"
			),
		}
	}
	(strip_server_fields(live), PristineSource::LiveObject)
}

fn decode_kdiff_annotation(encoded: &str) -> Option<Value> {
	let bytes = STANDARD.decode(encoded.trim()).ok()?;
	let value: Value = serde_json::from_slice(&bytes).ok()?;
	value.is_object().then_some(value)
}

/// Copy of `live` without fields the server populates.
pub fn strip_server_fields(live: &Value) -> Value {
	let mut out = live.clone();
	let Some(obj) = out.as_object_mut() else {
		return out;
	};
	obj.remove("status");
	if let Some(Value::Object(meta)) = obj.get_mut("metadata") {
		for field in SERVER_METADATA_FIELDS {
			meta.remove(*field);
		}
		let drop_annotations = match meta.get_mut("annotations") {
			Some(Value::Object(annotations)) => {
				strip_last_applied(annotations);
				annotations.is_empty()
			}
			Some(Value::Null) => true,
			_ => false,
		};
		if drop_annotations {
			meta.remove("annotations");
		}
	}
	out
}

fn strip_last_applied(annotations: &mut Map<String, Value>) {
	annotations.remove(ANNOTATION_LAST_APPLIED);
	annotations.remove(ANNOTATION_KUBECTL_LAST_APPLIED);
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn encode_last_applied(doc: &Value) -> String {
		STANDARD.encode(doc.to_string())
	}

	fn live_with(annotations: Value) -> Value {
		json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {
				"name": "cfg",
				"namespace": "web",
				"uid": "1234",
				"resourceVersion": "99",
				"creationTimestamp": "2024-01-01T00:00:00Z",
				"managedFields": [{"manager": "kubectl"}],
				"annotations": annotations,
			},
			"data": {"key": "live"},
			"status": {"phase": "whatever"},
		})
	}

	#[test]
	fn test_kdiff_annotation_wins() {
		let applied = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cfg"}, "data": {"key": "applied"}});
		let live = live_with(json!({
			"kdiff.io/last-applied": encode_last_applied(&applied),
			"kubectl.kubernetes.io/last-applied-configuration": "{\"kind\": \"ConfigMap\"}",
		}));
		let (pristine, source) = select(&live);
		assert_eq!(source, PristineSource::KdiffAnnotation);
		assert_eq!(pristine, applied);
		assert_eq!(source.to_string(), "kdiff annotation");
	}

	#[test]
	fn test_kubectl_annotation() {
		let live = live_with(json!({
			"kubectl.kubernetes.io/last-applied-configuration": "{\"kind\": \"ConfigMap\", \"data\": {\"key\": \"kubectl\"}}",
		}));
		let (pristine, source) = select(&live);
		assert_eq!(source, PristineSource::KubectlAnnotation);
		assert_eq!(pristine["data"]["key"], "kubectl");
	}

	#[test]
	fn test_malformed_annotation_falls_through() {
		let live = live_with(json!({
			"kdiff.io/last-applied": "not base64!",
			"team": "platform",
		}));
		let (pristine, source) = select(&live);
		assert_eq!(source, PristineSource::LiveObject);
		assert_eq!(pristine["metadata"]["annotations"], json!({"team": "platform"}));
	}

	#[test]
	fn test_live_object_stripped() {
		let live = live_with(json!({}));
		let (pristine, source) = select(&live);
		assert_eq!(source, PristineSource::LiveObject);
		assert_eq!(
			pristine,
			json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {"name": "cfg", "namespace": "web"},
				"data": {"key": "live"},
			})
		);
	}
}
