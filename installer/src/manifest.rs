//! Rewriting of the host manifest after installation.
//!
//! The host tool's JSON manifest declares when it activates and the default
//! values of its settings. Once runtime dependencies are in place the
//! activation triggers are replaced by an explicit list and selected
//! setting defaults are updated. The rewrite is load, transform, validate,
//! write to a temporary file in the same directory, then rename over the
//! original; on any failure the original file is left untouched.

use crate::error::{InstallerError, Result};
use log::debug;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;

const ACTIVATION_EVENTS: &str = "activationEvents";

/// A setting whose default value should change.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingDefault {
    /// Property key under `contributes.configuration.properties`.
    pub key: String,
    /// New default value.
    pub value: Value,
}

/// The changes to apply to the manifest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManifestRewrite {
    /// Replacement activation triggers.
    pub activation_events: Vec<String>,
    /// Setting defaults to update where the property exists.
    pub settings: Vec<SettingDefault>,
}

/// Apply `rewrite` to the manifest at `path` atomically.
///
/// Returns whether the file content changed.
///
/// # Errors
///
/// Returns [`InstallerError::ManifestRewriteFailed`] if the manifest cannot
/// be read, parsed, validated, or written.
pub fn rewrite_manifest(path: &Path, rewrite: &ManifestRewrite) -> Result<bool> {
    let original = std::fs::read_to_string(path)
        .map_err(|e| failed(format!("cannot read {}: {e}", path.display())))?;
    let manifest: Value =
        serde_json::from_str(&original).map_err(|e| failed(format!("invalid JSON: {e}")))?;

    let updated = transform(manifest.clone(), rewrite)?;
    validate(&updated)?;
    if updated == manifest {
        debug!("manifest {} already up to date", path.display());
        return Ok(false);
    }

    let mut json =
        serde_json::to_string_pretty(&updated).map_err(|e| failed(e.to_string()))?;
    json.push('\n');
    write_atomically(path, json.as_bytes())?;
    debug!("rewrote manifest {}", path.display());
    Ok(true)
}

/// Apply `rewrite` to an in-memory manifest.
///
/// Setting defaults are only changed for properties that already exist.
///
/// # Errors
///
/// Returns [`InstallerError::ManifestRewriteFailed`] if the manifest root
/// is not an object.
///
/// # Examples
///
/// ```
/// use runtime_installer::manifest::{ManifestRewrite, transform};
/// use serde_json::json;
///
/// let manifest = json!({ "activationEvents": ["*"] });
/// let rewrite = ManifestRewrite {
///     activation_events: vec!["onLanguage:rust".to_owned()],
///     settings: Vec::new(),
/// };
/// let updated = transform(manifest, &rewrite).expect("object manifest");
/// assert_eq!(updated["activationEvents"], json!(["onLanguage:rust"]));
/// ```
pub fn transform(mut manifest: Value, rewrite: &ManifestRewrite) -> Result<Value> {
    let root = manifest
        .as_object_mut()
        .ok_or_else(|| failed("manifest root is not an object".to_owned()))?;
    root.insert(
        ACTIVATION_EVENTS.to_owned(),
        Value::Array(
            rewrite
                .activation_events
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );

    if let Some(properties) = configuration_properties(root) {
        for setting in &rewrite.settings {
            match properties.get_mut(&setting.key).and_then(Value::as_object_mut) {
                Some(property) => {
                    property.insert("default".to_owned(), setting.value.clone());
                }
                None => debug!("setting {} not declared; skipping", setting.key),
            }
        }
    }
    Ok(manifest)
}

fn configuration_properties(root: &mut Map<String, Value>) -> Option<&mut Map<String, Value>> {
    root.get_mut("contributes")?
        .get_mut("configuration")?
        .get_mut("properties")?
        .as_object_mut()
}

/// Check the invariants a rewritten manifest must hold.
///
/// # Errors
///
/// Returns [`InstallerError::ManifestRewriteFailed`] unless the root is an
/// object and `activationEvents` is a non-empty list of strings without
/// the `*` wildcard.
pub fn validate(manifest: &Value) -> Result<()> {
    let root = manifest
        .as_object()
        .ok_or_else(|| failed("manifest root is not an object".to_owned()))?;
    let events = root
        .get(ACTIVATION_EVENTS)
        .and_then(Value::as_array)
        .ok_or_else(|| failed("activationEvents is not a list".to_owned()))?;
    if events.is_empty() {
        return Err(failed("activationEvents is empty".to_owned()));
    }
    for event in events {
        match event.as_str() {
            Some("*") => return Err(failed("activationEvents contains '*'".to_owned())),
            Some(_) => {}
            None => return Err(failed(format!("activation event {event} is not a string"))),
        }
    }
    Ok(())
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| failed(format!("cannot create temporary file: {e}")))?;
    temp.write_all(contents)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| failed(format!("cannot write temporary file: {e}")))?;
    temp.persist(path)
        .map_err(|e| failed(format!("cannot replace {}: {}", path.display(), e.error)))?;
    Ok(())
}

fn failed(reason: String) -> InstallerError {
    InstallerError::ManifestRewriteFailed { reason }
}
