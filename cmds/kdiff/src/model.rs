//! Object model shared by the component loader, the remote client and the
//! diff engine.
//!
//! Objects are kept as plain JSON documents; this module only knows how to
//! derive identities from them and how to read and write the handful of
//! metadata fields the diff engine cares about.

use std::fmt;

use kube::core::GroupVersionKind;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Pseudo-environment holding component defaults; it cannot be diffed.
pub const BASELINE: &str = "_";

/// Label carrying the application name on every object kdiff manages.
pub const LABEL_APPLICATION: &str = "kdiff.io/application";

/// Label carrying the environment name on every object kdiff manages.
pub const LABEL_ENVIRONMENT: &str = "kdiff.io/environment";

/// Annotation carrying the component an object was declared in.
pub const ANNOTATION_COMPONENT: &str = "kdiff.io/component";

/// Errors raised while interpreting object documents.
#[derive(Debug, Error)]
pub enum ModelError {
	#[error("object is not a JSON map")]
	NotAnObject,

	#[error("object missing apiVersion or kind")]
	MissingApiVersionOrKind,

	#[error("object missing metadata.name")]
	MissingName,

	#[error("{key}: {field} must be a map of strings")]
	InvalidSecretData { key: ObjectKey, field: &'static str },
}

/// Full identity of an object as declared: API version included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
	pub group: String,
	pub version: String,
	pub kind: String,
	/// `None` for cluster-scoped objects (or objects not yet defaulted).
	pub namespace: Option<String>,
	pub name: String,
}

impl ObjectKey {
	/// Derive the key from `apiVersion`, `kind` and `metadata`.
	pub fn from_document(doc: &Value) -> Result<Self, ModelError> {
		if !doc.is_object() {
			return Err(ModelError::NotAnObject);
		}
		let api_version = doc
			.get("apiVersion")
			.and_then(Value::as_str)
			.ok_or(ModelError::MissingApiVersionOrKind)?;
		let kind = doc
			.get("kind")
			.and_then(Value::as_str)
			.ok_or(ModelError::MissingApiVersionOrKind)?;
		let name = doc
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.filter(|n| !n.is_empty())
			.ok_or(ModelError::MissingName)?;
		let namespace = doc
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.filter(|ns| !ns.is_empty())
			.map(str::to_string);

		let (group, version) = match api_version.split_once('/') {
			Some((g, v)) => (g, v),
			None => ("", api_version),
		};

		Ok(Self {
			group: group.to_string(),
			version: version.to_string(),
			kind: kind.to_string(),
			namespace,
			name: name.to_string(),
		})
	}

	pub fn api_version(&self) -> String {
		if self.group.is_empty() {
			self.version.clone()
		} else {
			format!("{}/{}", self.group, self.version)
		}
	}

	pub fn gvk(&self) -> GroupVersionKind {
		GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
	}

	/// Version-independent identity.
	pub fn id(&self) -> ObjectId {
		ObjectId {
			group: self.group.clone(),
			kind: self.kind.clone(),
			namespace: self.namespace.clone(),
			name: self.name.clone(),
		}
	}
}

impl fmt::Display for ObjectKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.namespace {
			Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
			None => write!(f, "{}/{}", self.kind, self.name),
		}
	}
}

/// Identity used to match local objects against listed cluster objects.
///
/// The API version is left out: the cluster may serve the same object under
/// a different version than the one it was declared with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
	pub group: String,
	pub kind: String,
	pub namespace: Option<String>,
	pub name: String,
}

/// Anything that can be named in diff output.
pub trait K8sMeta {
	fn key(&self) -> &ObjectKey;
	fn component(&self) -> Option<&str>;
}

/// A desired-state object loaded from a component.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalObject {
	key: ObjectKey,
	component: String,
	environment: String,
	data: Value,
}

impl LocalObject {
	pub fn new(
		component: impl Into<String>,
		environment: impl Into<String>,
		data: Value,
	) -> Result<Self, ModelError> {
		let key = ObjectKey::from_document(&data)?;
		Ok(Self {
			key,
			component: component.into(),
			environment: environment.into(),
			data,
		})
	}

	pub fn environment(&self) -> &str {
		&self.environment
	}

	pub fn data(&self) -> &Value {
		&self.data
	}

	/// A copy of the desired document, ready to be compared.
	pub fn to_document(&self) -> Value {
		self.data.clone()
	}

	/// Fill in `namespace` when the object does not declare one.
	pub fn with_default_namespace(mut self, namespace: &str) -> Self {
		if self.key.namespace.is_none() {
			if let Some(meta) = metadata_mut(&mut self.data) {
				meta.insert("namespace".to_string(), Value::String(namespace.to_string()));
			}
			self.key.namespace = Some(namespace.to_string());
		}
		self
	}

	/// Drop `namespace` from an object of a cluster-scoped kind. The cluster
	/// ignores it on apply and never reports one back.
	pub fn without_namespace(mut self) -> Self {
		if self.key.namespace.take().is_some() {
			if let Some(meta) = self.data.get_mut("metadata").and_then(Value::as_object_mut) {
				meta.remove("namespace");
			}
		}
		self
	}
}

impl K8sMeta for LocalObject {
	fn key(&self) -> &ObjectKey {
		&self.key
	}

	fn component(&self) -> Option<&str> {
		Some(&self.component)
	}
}

/// An object found in the cluster by a scoped listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
	pub key: ObjectKey,
	pub component: Option<String>,
}

impl RemoteObject {
	pub fn from_document(doc: &Value) -> Result<Self, ModelError> {
		Ok(Self {
			key: ObjectKey::from_document(doc)?,
			component: annotation(doc, ANNOTATION_COMPONENT).map(str::to_string),
		})
	}
}

impl K8sMeta for RemoteObject {
	fn key(&self) -> &ObjectKey {
		&self.key
	}

	fn component(&self) -> Option<&str> {
		self.component.as_deref()
	}
}

fn metadata_mut(doc: &mut Value) -> Option<&mut Map<String, Value>> {
	let obj = doc.as_object_mut()?;
	obj.entry("metadata")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
}

fn metadata_map<'a>(doc: &'a Value, field: &str) -> Option<&'a Map<String, Value>> {
	doc.get("metadata")?.get(field)?.as_object()
}

fn set_metadata_map(doc: &mut Value, field: &str, value: Map<String, Value>) {
	if let Some(meta) = metadata_mut(doc) {
		meta.insert(field.to_string(), Value::Object(value));
	}
}

pub fn labels(doc: &Value) -> Option<&Map<String, Value>> {
	metadata_map(doc, "labels")
}

pub fn set_labels(doc: &mut Value, labels: Map<String, Value>) {
	set_metadata_map(doc, "labels", labels);
}

pub fn annotations(doc: &Value) -> Option<&Map<String, Value>> {
	metadata_map(doc, "annotations")
}

pub fn set_annotations(doc: &mut Value, annotations: Map<String, Value>) {
	set_metadata_map(doc, "annotations", annotations);
}

pub fn annotation<'a>(doc: &'a Value, name: &str) -> Option<&'a str> {
	annotations(doc)?.get(name)?.as_str()
}

/// Stamp the labels and annotation that tie an object to its app, environment
/// and component.
pub fn set_ownership(doc: &mut Value, application: &str, environment: &str, component: &str) {
	let mut l = labels(doc).cloned().unwrap_or_default();
	l.insert(LABEL_APPLICATION.to_string(), application.into());
	l.insert(LABEL_ENVIRONMENT.to_string(), environment.into());
	set_labels(doc, l);

	let mut a = annotations(doc).cloned().unwrap_or_default();
	a.insert(ANNOTATION_COMPONENT.to_string(), component.into());
	set_annotations(doc, a);
}

const SECRET_FIELDS: [&str; 2] = ["data", "stringData"];

/// Return a copy of `doc` with secret payloads replaced by fingerprints.
///
/// Values are replaced by a short SHA-256 prefix rather than a fixed marker so
/// that a changed secret still shows up as changed. Non-secret objects are
/// returned unchanged.
pub fn hide_sensitive_info(doc: &Value) -> Result<Value, ModelError> {
	let is_secret = doc.get("apiVersion").and_then(Value::as_str) == Some("v1")
		&& doc.get("kind").and_then(Value::as_str) == Some("Secret");
	if !is_secret {
		return Ok(doc.clone());
	}

	let mut out = doc.clone();
	for field in SECRET_FIELDS {
		let Some(value) = out.get_mut(field) else {
			continue;
		};
		if value.is_null() {
			continue;
		}
		let invalid = || ModelError::InvalidSecretData {
			key: ObjectKey::from_document(doc).unwrap_or_else(|_| ObjectKey {
				group: String::new(),
				version: "v1".to_string(),
				kind: "Secret".to_string(),
				namespace: None,
				name: "<unnamed>".to_string(),
			}),
			field,
		};
		let map = value.as_object_mut().ok_or_else(invalid)?;
		for v in map.values_mut() {
			let s = v.as_str().ok_or_else(invalid)?;
			*v = Value::String(redacted(s));
		}
	}
	Ok(out)
}

fn redacted(value: &str) -> String {
	let digest = Sha256::digest(value.as_bytes());
	let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
	format!("<redacted sha256:{hex}>")
}
