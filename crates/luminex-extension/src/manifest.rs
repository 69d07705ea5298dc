//! Extension manifests and descriptors.
//!
//! A directory extension is described by `extension.toml`:
//!
//! ```toml
//! name = "python"
//! version = "1.2.0"
//! main = "python"
//! activation_events = ["onLanguage:python", "workspaceContains:**/pyproject.toml"]
//!
//! [engines]
//! luminex = ">=0.1"
//!
//! [contributes.configuration.properties."python.enable"]
//! default = true
//!
//! [[contributes.root_patterns]]
//! filetype = "python"
//! patterns = ["pyproject.toml", "setup.py"]
//!
//! [[contributes.commands]]
//! command = "python.restart"
//! title = "Restart the language server"
//! ```
//!
//! A single-file extension `<name>.toml` under the single-file root only
//! carries `activation_events` and `contributes`; its id is `single-<name>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::activation::ActivationEvents;

/// File name of a directory extension's manifest.
pub const MANIFEST_FILE: &str = "extension.toml";

/// Id prefix of single-file extensions.
pub const SINGLE_FILE_PREFIX: &str = "single-";

/// Errors reading or validating a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Manifest {0} has no name")]
    MissingName(PathBuf),

    #[error("Extension {0} does not declare an engines.luminex requirement")]
    MissingEngine(String),

    #[error("Extension {id} has an invalid engine requirement {requirement}: {source}")]
    InvalidEngine {
        id: String,
        requirement: String,
        #[source]
        source: semver::Error,
    },

    #[error("Extension {id} requires luminex {requirement}, running {running}")]
    IncompatibleEngine {
        id: String,
        requirement: String,
        running: String,
    },
}

/// Parsed `extension.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Extension id
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Entry point handed to the extension loader
    #[serde(default)]
    pub main: Option<String>,

    #[serde(default)]
    pub engines: Engines,

    #[serde(default)]
    pub activation_events: Vec<String>,

    #[serde(default)]
    pub contributes: Contributes,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

/// Host versions an extension supports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Engines {
    /// Semver requirement on the host version
    pub luminex: Option<String>,
}

/// Static contributions applied to the workspace on registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Contributes {
    pub configuration: ConfigurationContribution,
    pub root_patterns: Vec<RootPatternContribution>,
    pub commands: Vec<CommandContribution>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationContribution {
    pub properties: BTreeMap<String, ConfigurationProperty>,
}

/// One configuration key an extension declares.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationProperty {
    pub default: Option<serde_json::Value>,
    pub description: Option<String>,
}

/// Files marking a project root for a filetype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootPatternContribution {
    pub filetype: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// A command with a human readable title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandContribution {
    pub command: String,
    pub title: String,
}

/// The part of a single-file manifest that is read from disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SingleFileManifest {
    activation_events: Vec<String>,
    contributes: Contributes,
}

impl ExtensionManifest {
    /// Parses a manifest from TOML text. `path` is only used in errors.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if manifest.name.trim().is_empty() {
            return Err(ManifestError::MissingName(path.to_path_buf()));
        }
        Ok(manifest)
    }

    /// Reads and validates `<folder>/extension.toml` against the running host version.
    pub async fn load(folder: &Path, engine_version: &str) -> Result<Self, ManifestError> {
        let path = folder.join(MANIFEST_FILE);
        let content = tokio::fs::read_to_string(&path).await.map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest = Self::parse(&content, &path)?;
        manifest.check_engine(engine_version)?;
        Ok(manifest)
    }

    /// Reads a single-file manifest. A missing file yields an empty manifest.
    pub async fn load_single_file(path: &Path) -> Result<Self, ManifestError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if stem.is_empty() {
            return Err(ManifestError::MissingName(path.to_path_buf()));
        }

        let parsed = match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                toml::from_str::<SingleFileManifest>(&content).map_err(|source| {
                    ManifestError::Parse {
                        path: path.to_path_buf(),
                        source,
                    }
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SingleFileManifest::default(),
            Err(source) => {
                return Err(ManifestError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Ok(Self {
            name: format!("{}{}", SINGLE_FILE_PREFIX, stem),
            main: Some(stem),
            activation_events: parsed.activation_events,
            contributes: parsed.contributes,
            ..Self::default()
        })
    }

    /// Returns true if `folder` holds a manifest this host can load.
    pub async fn is_valid_folder(folder: &Path, engine_version: &str) -> bool {
        let is_file = tokio::fs::metadata(folder.join(MANIFEST_FILE))
            .await
            .is_ok_and(|m| m.is_file());
        is_file && Self::load(folder, engine_version).await.is_ok()
    }

    /// Checks the `engines.luminex` requirement.
    pub fn check_engine(&self, engine_version: &str) -> Result<(), ManifestError> {
        let requirement = self
            .engines
            .luminex
            .as_deref()
            .ok_or_else(|| ManifestError::MissingEngine(self.name.clone()))?;
        let req = semver::VersionReq::parse(requirement).map_err(|source| {
            ManifestError::InvalidEngine {
                id: self.name.clone(),
                requirement: requirement.to_string(),
                source,
            }
        })?;

        if !is_compatible(&req, engine_version) {
            return Err(ManifestError::IncompatibleEngine {
                id: self.name.clone(),
                requirement: requirement.to_string(),
                running: engine_version.to_string(),
            });
        }
        Ok(())
    }

    /// Entry point for the loader, defaulting to the extension name.
    pub fn entry(&self) -> &str {
        self.main.as_deref().unwrap_or(&self.name)
    }
}

/// Checks a requirement against the host version.
///
/// An unparsable host version is treated as compatible so development
/// builds with odd version strings still load extensions.
fn is_compatible(req: &semver::VersionReq, engine_version: &str) -> bool {
    match semver::Version::parse(engine_version) {
        Ok(version) => req.matches(&version),
        Err(_) => true,
    }
}

/// Where an extension was registered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionOrigin {
    /// Compiled into the host
    Builtin,
    /// A folder the user or workspace pointed at
    Local,
    /// Installed into the global extension folder
    Global,
    /// A manifest under the single-file root
    SingleFile,
}

impl std::fmt::Display for ExtensionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::Local => write!(f, "local"),
            Self::Global => write!(f, "global"),
            Self::SingleFile => write!(f, "single-file"),
        }
    }
}

/// A registered extension.
#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub manifest: ExtensionManifest,
    /// Extension folder (the containing folder for single-file extensions)
    pub root: PathBuf,
    /// Manifest file of single-file extensions
    pub file: Option<PathBuf>,
    pub origin: ExtensionOrigin,
    pub activation: ActivationEvents,
}

impl ExtensionDescriptor {
    pub fn new(manifest: ExtensionManifest, root: impl Into<PathBuf>, origin: ExtensionOrigin) -> Self {
        Self {
            id: manifest.name.clone(),
            activation: ActivationEvents::new(&manifest.activation_events),
            manifest,
            root: root.into(),
            file: None,
            origin,
        }
    }

    /// Descriptor for the single-file manifest at `path`.
    pub fn single_file(manifest: ExtensionManifest, path: &Path) -> Self {
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut descriptor = Self::new(manifest, root, ExtensionOrigin::SingleFile);
        descriptor.file = Some(path.to_path_buf());
        descriptor
    }

    /// Path handed to the extension as its own location.
    pub fn extension_path(&self) -> &Path {
        self.file.as_deref().unwrap_or(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"
        name = "python"
        version = "1.2.0"
        activation_events = ["onLanguage:python"]

        [engines]
        luminex = ">=0.1"

        [contributes.configuration.properties."python.enable"]
        default = true

        [contributes.configuration.properties."python.path"]
        description = "no default"

        [[contributes.root_patterns]]
        filetype = "python"
        patterns = ["pyproject.toml"]

        [[contributes.commands]]
        command = "python.restart"
        title = "Restart"
    "#;

    #[test]
    fn test_manifest_parsing() {
        let manifest = ExtensionManifest::parse(MANIFEST, Path::new("extension.toml")).unwrap();
        assert_eq!(manifest.name, "python");
        assert_eq!(manifest.entry(), "python");
        assert_eq!(manifest.activation_events, vec!["onLanguage:python"]);

        let props = &manifest.contributes.configuration.properties;
        assert_eq!(props["python.enable"].default, Some(serde_json::json!(true)));
        assert!(props["python.path"].default.is_none());
        assert_eq!(manifest.contributes.root_patterns[0].patterns, vec!["pyproject.toml"]);
        assert_eq!(manifest.contributes.commands[0].title, "Restart");
    }

    #[test]
    fn test_missing_name() {
        let result = ExtensionManifest::parse("version = \"1.0.0\"", Path::new("x.toml"));
        assert!(result.is_err());
        let result = ExtensionManifest::parse("name = \" \"", Path::new("x.toml"));
        assert!(matches!(result, Err(ManifestError::MissingName(_))));
    }

    #[test]
    fn test_engine_check() {
        let mut manifest = ExtensionManifest::parse(MANIFEST, Path::new("e.toml")).unwrap();
        assert!(manifest.check_engine("0.1.0").is_ok());
        assert!(matches!(
            manifest.check_engine("0.0.9"),
            Err(ManifestError::IncompatibleEngine { .. })
        ));

        manifest.engines.luminex = Some("not a requirement".into());
        assert!(matches!(
            manifest.check_engine("0.1.0"),
            Err(ManifestError::InvalidEngine { .. })
        ));

        manifest.engines.luminex = None;
        assert!(matches!(
            manifest.check_engine("0.1.0"),
            Err(ManifestError::MissingEngine(_))
        ));
    }

    #[tokio::test]
    async fn test_load_folder() {
        let dir = tempdir().unwrap();
        assert!(!ExtensionManifest::is_valid_folder(dir.path(), "0.1.0").await);

        std::fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        assert!(ExtensionManifest::is_valid_folder(dir.path(), "0.1.0").await);
        assert!(!ExtensionManifest::is_valid_folder(dir.path(), "0.0.1").await);
        assert!(matches!(
            ExtensionManifest::load(&dir.path().join("missing"), "0.1.0").await,
            Err(ManifestError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_file_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("todo.toml");

        let manifest = ExtensionManifest::load_single_file(&path).await.unwrap();
        assert_eq!(manifest.name, "single-todo");
        assert_eq!(manifest.entry(), "todo");
        assert!(manifest.activation_events.is_empty());

        std::fs::write(&path, "activation_events = [\"onCommand:todo.list\"]").unwrap();
        let manifest = ExtensionManifest::load_single_file(&path).await.unwrap();
        let descriptor = ExtensionDescriptor::single_file(manifest, &path);
        assert_eq!(descriptor.id, "single-todo");
        assert_eq!(descriptor.origin, ExtensionOrigin::SingleFile);
        assert_eq!(descriptor.root, dir.path());
        assert_eq!(descriptor.extension_path(), path.as_path());
    }
}
