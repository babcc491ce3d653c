//! Generated Terraform JSON configuration
//!
//! Tasks rendered to the Terraform target append resource blocks to a
//! [`TerraformDocument`]. Values that refer to other resources are
//! [`Literal`] tokens: they serialize as markers and are only turned into
//! `${type.name.property}` interpolations by [`TerraformDocument::finish`],
//! once every block has been declared. A token pointing at a resource that
//! was never declared fails the finish step instead of producing a broken
//! configuration.

use crate::error::{EngineError, TaskError};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Name of the generated configuration file
pub const MAIN_FILE: &str = "kubernetes.tf.json";

/// Directory, relative to the configuration, holding file resources
pub const DATA_DIR: &str = "data";

const REF_MARKER: &str = "__ref";
const FILE_MARKER: &str = "__file";

/// A value in a generated configuration that may refer to another resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// A plain string
    Value(String),
    /// A property of another resource, `${type.name.property}`
    Property {
        resource_type: String,
        name: String,
        property: String,
    },
    /// Contents of a data file written next to the configuration
    File { path: String },
}

impl Literal {
    /// Plain string literal
    pub fn value(value: impl Into<String>) -> Self {
        Self::Value(value.into())
    }

    /// Reference to a property of another resource
    pub fn property(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self::Property {
            resource_type: resource_type.into(),
            name: name.into(),
            property: property.into(),
        }
    }

    /// Reference to a data file, relative to the data directory
    pub fn file(path: impl Into<String>) -> Self {
        Self::File { path: path.into() }
    }

    /// Text as it appears in the finished configuration
    pub fn to_interpolation(&self) -> String {
        match self {
            Self::Value(v) => v.clone(),
            Self::Property {
                resource_type,
                name,
                property,
            } => format!("${{{resource_type}.{name}.{property}}}"),
            Self::File { path } => {
                format!("${{file(\"${{path.module}}/{DATA_DIR}/{path}\")}}")
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_interpolation())
    }
}

impl Serialize for Literal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_str(v),
            Self::Property {
                resource_type,
                name,
                property,
            } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REF_MARKER, &[resource_type, name, property])?;
                map.end()
            }
            Self::File { path } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(FILE_MARKER, path)?;
                map.end()
            }
        }
    }
}

/// Resource blocks and data files of one generated configuration
#[derive(Debug, Clone)]
pub struct TerraformDocument {
    provider: String,
    region: String,
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    files: BTreeMap<String, Vec<u8>>,
}

impl TerraformDocument {
    pub fn new(provider: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            region: region.into(),
            resources: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Declare a resource block
    pub fn add_resource<S: Serialize>(
        &mut self,
        resource_type: &str,
        name: &str,
        body: &S,
    ) -> Result<(), EngineError> {
        let body = serde_json::to_value(body)?;
        let blocks = self.resources.entry(resource_type.to_string()).or_default();
        if blocks.contains_key(name) {
            return Err(EngineError::DuplicateResource {
                resource_type: resource_type.to_string(),
                name: name.to_string(),
            });
        }
        log::debug!("Declared {}.{}", resource_type, name);
        blocks.insert(name.to_string(), body);
        Ok(())
    }

    /// Store a file-like value as a data file and return a reference to it
    pub fn add_file(&mut self, resource_type: &str, name: &str, stem: &str, contents: &[u8]) -> Literal {
        let path = format!("{resource_type}_{name}_{stem}");
        self.files.insert(path.clone(), contents.to_vec());
        Literal::file(path)
    }

    /// A declared resource block, before references are resolved
    pub fn resource(&self, resource_type: &str, name: &str) -> Option<&Value> {
        self.resources.get(resource_type)?.get(name)
    }

    /// Whether a resource block is declared
    pub fn contains(&self, resource_type: &str, name: &str) -> bool {
        self.resource(resource_type, name).is_some()
    }

    /// Number of declared resource blocks
    pub fn len(&self) -> usize {
        self.resources.values().map(BTreeMap::len).sum()
    }

    /// Check if no resource is declared
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Data files by path relative to the data directory
    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    /// Resolve every reference and build the configuration JSON
    pub fn finish(&self) -> Result<Value, EngineError> {
        let mut resources = Map::new();
        for (resource_type, blocks) in &self.resources {
            let mut resolved = Map::new();
            for (name, body) in blocks {
                let owner = format!("{resource_type}.{name}");
                resolved.insert(name.clone(), self.resolve(&owner, body)?);
            }
            resources.insert(resource_type.clone(), Value::Object(resolved));
        }

        let mut provider = Map::new();
        provider.insert(self.provider.clone(), json!({ "region": self.region }));

        let mut required = Map::new();
        required.insert(
            self.provider.clone(),
            json!({ "source": format!("hashicorp/{}", self.provider) }),
        );

        Ok(json!({
            "terraform": {
                "required_version": ">= 0.15.0",
                "required_providers": required,
            },
            "provider": provider,
            "resource": resources,
        }))
    }

    /// Finish the document and write it, with its data files, into `dir`.
    ///
    /// Returns the path of the main configuration file.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        let document = self.finish()?;

        fs::create_dir_all(dir)?;
        let main = dir.join(MAIN_FILE);
        let mut text = serde_json::to_string_pretty(&document)?;
        text.push('\n');
        fs::write(&main, text)?;

        if !self.files.is_empty() {
            let data_dir = dir.join(DATA_DIR);
            fs::create_dir_all(&data_dir)?;
            for (path, contents) in &self.files {
                fs::write(data_dir.join(path), contents)?;
            }
        }

        log::info!(
            "Wrote {} resource(s) and {} data file(s) to {}",
            self.len(),
            self.files.len(),
            dir.display()
        );
        Ok(main)
    }

    fn resolve(&self, owner: &str, value: &Value) -> Result<Value, EngineError> {
        match value {
            Value::Object(map) => {
                if let Some(reference) = self.as_marker(owner, map)? {
                    return Ok(Value::String(reference.to_interpolation()));
                }
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve(owner, v)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve(owner, v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    /// Decode a reference marker, checking that its target exists
    fn as_marker(&self, owner: &str, map: &Map<String, Value>) -> Result<Option<Literal>, EngineError> {
        if map.len() != 1 {
            return Ok(None);
        }

        if let Some(Value::Array(parts)) = map.get(REF_MARKER) {
            let parts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            let [resource_type, name, property] = parts.as_slice() else {
                return Ok(None);
            };
            let literal = Literal::property(*resource_type, *name, *property);
            if !self.contains(resource_type, name) {
                return Err(EngineError::UnresolvedReference {
                    owner: owner.to_string(),
                    reference: literal.to_interpolation(),
                });
            }
            return Ok(Some(literal));
        }

        if let Some(Value::String(path)) = map.get(FILE_MARKER) {
            let literal = Literal::file(path.clone());
            if !self.files.contains_key(path) {
                return Err(EngineError::UnresolvedReference {
                    owner: owner.to_string(),
                    reference: literal.to_interpolation(),
                });
            }
            return Ok(Some(literal));
        }

        Ok(None)
    }
}

/// Target that collects resource blocks into a [`TerraformDocument`]
#[derive(Debug)]
pub struct TerraformTarget {
    document: Mutex<TerraformDocument>,
}

impl TerraformTarget {
    pub fn new(provider: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(TerraformDocument::new(provider, region)),
        }
    }

    /// Declare a resource block
    pub fn render_resource<S: Serialize>(
        &self,
        resource_type: &str,
        name: &str,
        body: &S,
    ) -> Result<(), TaskError> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_resource(resource_type, name, body)
            .map_err(|e| TaskError::Other(e.to_string()))
    }

    /// Store a file-like value next to the configuration
    pub fn add_file_resource(
        &self,
        resource_type: &str,
        name: &str,
        stem: &str,
        contents: &[u8],
    ) -> Literal {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_file(resource_type, name, stem, contents)
    }

    /// Snapshot of the document built so far
    pub fn document(&self) -> TerraformDocument {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve references and build the configuration JSON
    pub fn finish(&self) -> Result<Value, EngineError> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish()
    }

    /// Finish and write the configuration into `dir`
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_to(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Serialize)]
    struct Instance {
        key_name: Literal,
        user_data: Option<Literal>,
    }

    #[test]
    fn test_literal_interpolation() {
        assert_eq!(
            Literal::property("aws_key_pair", "admin", "id").to_string(),
            "${aws_key_pair.admin.id}"
        );
        assert_eq!(
            Literal::file("aws_key_pair_admin_public_key").to_string(),
            "${file(\"${path.module}/data/aws_key_pair_admin_public_key\")}"
        );
        assert_eq!(Literal::value("existing").to_string(), "existing");
    }

    #[test]
    fn test_forward_reference_resolves_at_finish() {
        let mut doc = TerraformDocument::new("aws", "us-east-1");
        // The instance is declared before the key it refers to
        doc.add_resource(
            "aws_instance",
            "master",
            &Instance {
                key_name: Literal::property("aws_key_pair", "admin", "id"),
                user_data: None,
            },
        )
        .unwrap();
        let public_key = doc.add_file("aws_key_pair", "admin", "public_key", b"ssh-rsa AAAA");
        doc.add_resource(
            "aws_key_pair",
            "admin",
            &json!({ "key_name": "admin", "public_key": public_key }),
        )
        .unwrap();

        let out = doc.finish().unwrap();
        assert_eq!(
            out["resource"]["aws_instance"]["master"]["key_name"],
            "${aws_key_pair.admin.id}"
        );
        assert_eq!(
            out["resource"]["aws_key_pair"]["admin"]["public_key"],
            "${file(\"${path.module}/data/aws_key_pair_admin_public_key\")}"
        );
        assert_eq!(out["provider"]["aws"]["region"], "us-east-1");
    }

    #[test]
    fn test_unresolved_reference_fails() {
        let mut doc = TerraformDocument::new("aws", "us-east-1");
        doc.add_resource(
            "aws_instance",
            "master",
            &Instance {
                key_name: Literal::property("aws_key_pair", "missing", "id"),
                user_data: None,
            },
        )
        .unwrap();

        let err = doc.finish().unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnresolvedReference { ref owner, ref reference }
                if owner == "aws_instance.master" && reference == "${aws_key_pair.missing.id}"
        ));
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let mut doc = TerraformDocument::new("aws", "us-east-1");
        doc.add_resource("aws_key_pair", "a", &json!({})).unwrap();
        assert!(matches!(
            doc.add_resource("aws_key_pair", "a", &json!({})),
            Err(EngineError::DuplicateResource { .. })
        ));
    }

    #[test]
    fn test_write_to_emits_config_and_data_files() {
        let temp = TempDir::new().unwrap();
        let target = TerraformTarget::new("aws", "eu-west-1");
        let public_key = target.add_file_resource("aws_key_pair", "k", "public_key", b"ssh-ed25519 AAAA\n");
        target
            .render_resource("aws_key_pair", "k", &json!({ "public_key": public_key }))
            .unwrap();

        let main = target.write_to(temp.path()).unwrap();
        assert_eq!(main, temp.path().join(MAIN_FILE));

        let written: Value = serde_json::from_str(&fs::read_to_string(&main).unwrap()).unwrap();
        assert_eq!(
            written["resource"]["aws_key_pair"]["k"]["public_key"],
            "${file(\"${path.module}/data/aws_key_pair_k_public_key\")}"
        );
        assert_eq!(
            fs::read(temp.path().join("data/aws_key_pair_k_public_key")).unwrap(),
            b"ssh-ed25519 AAAA\n"
        );
    }
}
