//! Module manifest reading and writing.
//!
//! Each module declares its dependencies in a YAML file named `MODULE` at its
//! root:
//!
//! ```yaml
//! version: 1
//! dependencies:
//!   lib:
//!     url: https://example.com/org/lib.git
//!     version: 3f2a9c0
//!     type: git
//! ```
//!
//! The dependency key must match the name derived from its URL, which is what
//! keeps "one module per name" and "path is a function of name" true across
//! manifests written by different people.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{MANIFEST_FILENAME, MANIFEST_VERSION};
use crate::module::name_from_url;
use crate::vcs::ModuleType;

/// Errors that can occur when reading or writing a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write manifest '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse manifest '{}': {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("failed to serialize manifest: {0}")]
  Serialize(#[source] serde_yaml::Error),

  #[error("unsupported manifest version {found} in '{}', expected {}", .path.display(), MANIFEST_VERSION)]
  UnsupportedVersion { path: PathBuf, found: u32 },

  #[error("dependency '{declared}' in '{}' has url '{url}', which names module '{derived}'", .path.display())]
  NameMismatch {
    path: PathBuf,
    declared: String,
    derived: String,
    url: String,
  },

  #[error("dependency '{name}' in '{}' has an invalid url '{url}'", .path.display())]
  InvalidUrl { path: PathBuf, name: String, url: String },
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
  /// Source URL of the dependency.
  pub url: String,

  /// Requested version: any ref the backend can resolve.
  pub version: String,

  /// Backend type; git unless stated.
  #[serde(rename = "type", default, skip_serializing_if = "is_default_type")]
  pub kind: ModuleType,
}

fn is_default_type(kind: &ModuleType) -> bool {
  *kind == ModuleType::default()
}

impl DependencyDecl {
  pub fn new(url: &str, version: &str) -> Self {
    Self {
      url: url.to_string(),
      version: version.to_string(),
      kind: ModuleType::default(),
    }
  }

  pub fn with_kind(mut self, kind: ModuleType) -> Self {
    self.kind = kind;
    self
  }
}

/// The dependency declarations of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
  /// Manifest format version.
  pub version: u32,

  /// Declared dependencies keyed by module name.
  #[serde(default)]
  pub dependencies: BTreeMap<String, DependencyDecl>,
}

impl Default for Manifest {
  fn default() -> Self {
    Self::new()
  }
}

impl Manifest {
  /// Create an empty manifest.
  pub fn new() -> Self {
    Self {
      version: MANIFEST_VERSION,
      dependencies: BTreeMap::new(),
    }
  }

  /// Add a dependency, keyed by the name derived from its URL.
  pub fn with_dependency(mut self, decl: DependencyDecl) -> Self {
    let name = name_from_url(&decl.url).unwrap_or_else(|| decl.url.clone());
    self.dependencies.insert(name, decl);
    self
  }

  /// Path of the manifest for the module rooted at `module_root`.
  pub fn path_in(module_root: &Path) -> PathBuf {
    module_root.join(MANIFEST_FILENAME)
  }

  /// Load the manifest of the module rooted at `module_root`.
  ///
  /// A module without a manifest has no dependencies.
  pub fn load(module_root: &Path) -> Result<Self, ManifestError> {
    let path = Self::path_in(module_root);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no manifest, assuming no dependencies");
        return Ok(Self::new());
      }
      Err(e) => return Err(ManifestError::Read { path, source: e }),
    };
    Self::parse(&content, &path)
  }

  /// Parse and validate manifest content read from `path`.
  pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
    if content.trim().is_empty() {
      return Ok(Self::new());
    }

    let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| ManifestError::Parse {
      path: path.to_path_buf(),
      source: e,
    })?;

    if manifest.version != MANIFEST_VERSION {
      return Err(ManifestError::UnsupportedVersion {
        path: path.to_path_buf(),
        found: manifest.version,
      });
    }

    for (name, decl) in &manifest.dependencies {
      let derived = name_from_url(&decl.url).ok_or_else(|| ManifestError::InvalidUrl {
        path: path.to_path_buf(),
        name: name.clone(),
        url: decl.url.clone(),
      })?;
      if &derived != name {
        return Err(ManifestError::NameMismatch {
          path: path.to_path_buf(),
          declared: name.clone(),
          derived,
          url: decl.url.clone(),
        });
      }
    }

    Ok(manifest)
  }

  /// Serialize to YAML.
  pub fn to_yaml(&self) -> Result<String, ManifestError> {
    serde_yaml::to_string(self).map_err(ManifestError::Serialize)
  }

  /// Write the manifest into the module rooted at `module_root`.
  pub fn save(&self, module_root: &Path) -> Result<(), ManifestError> {
    let path = Self::path_in(module_root);
    let content = self.to_yaml()?;
    fs::write(&path, content).map_err(|e| ManifestError::Write { path, source: e })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  mod parse {
    use super::*;

    #[test]
    fn reads_dependencies() {
      let content = r#"
version: 1
dependencies:
  lib:
    url: https://example.com/org/lib.git
    version: abc123
  tools:
    url: git@example.com:org/tools
    version: main
    type: jj
"#;
      let manifest = Manifest::parse(content, Path::new("MODULE")).unwrap();
      assert_eq!(manifest.dependencies.len(), 2);

      let lib = &manifest.dependencies["lib"];
      assert_eq!(lib.version, "abc123");
      assert_eq!(lib.kind, ModuleType::Git);

      let tools = &manifest.dependencies["tools"];
      assert_eq!(tools.kind, ModuleType::Jj);
    }

    #[test]
    fn empty_content_has_no_dependencies() {
      let manifest = Manifest::parse("  \n", Path::new("MODULE")).unwrap();
      assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn missing_dependencies_key_is_empty() {
      let manifest = Manifest::parse("version: 1\n", Path::new("MODULE")).unwrap();
      assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn rejects_name_mismatch() {
      let content = r#"
version: 1
dependencies:
  other:
    url: https://example.com/org/lib.git
    version: abc123
"#;
      let err = Manifest::parse(content, Path::new("MODULE")).unwrap_err();
      assert!(matches!(err, ManifestError::NameMismatch { ref derived, .. } if derived == "lib"));
    }

    #[test]
    fn rejects_unknown_version() {
      let err = Manifest::parse("version: 7\n", Path::new("MODULE")).unwrap_err();
      assert!(matches!(err, ManifestError::UnsupportedVersion { found: 7, .. }));
    }

    #[test]
    fn rejects_invalid_yaml() {
      let err = Manifest::parse("version: [", Path::new("MODULE")).unwrap_err();
      assert!(matches!(err, ManifestError::Parse { .. }));
    }
  }

  mod load_and_save {
    use super::*;

    #[test]
    fn missing_file_means_no_dependencies() {
      let temp = TempDir::new().unwrap();
      let manifest = Manifest::load(temp.path()).unwrap();
      assert_eq!(manifest, Manifest::new());
    }

    #[test]
    fn saved_manifest_loads_back() {
      let temp = TempDir::new().unwrap();
      let manifest = Manifest::new()
        .with_dependency(DependencyDecl::new("https://example.com/lib.git", "c1"))
        .with_dependency(DependencyDecl::new("https://example.com/jjlib", "main").with_kind(ModuleType::Jj));

      manifest.save(temp.path()).unwrap();
      let content = fs::read_to_string(temp.path().join(MANIFEST_FILENAME)).unwrap();
      assert!(!content.contains("type: git"));
      assert!(content.contains("type: jj"));

      assert_eq!(Manifest::load(temp.path()).unwrap(), manifest);
    }
  }
}
