//! The `rill_project.yaml` manifest.

use std::path::Path;

use rill_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// File name of the manifest at the project root.
pub const MANIFEST_FILE: &str = "rill_project.yaml";

/// Project-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ProjectManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    /// Parses manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(text).map_err(|err| {
            Error::invalid_definition()
                .with_message(format!("Invalid {MANIFEST_FILE}: {err}"))
                .with_source(err)
        })?;
        if manifest.name.trim().is_empty() {
            return Err(Error::invalid_definition().with_message(format!("'name' in {MANIFEST_FILE} must not be empty")));
        }
        Ok(manifest)
    }

    /// Reads the manifest of the project rooted at `root`.
    pub fn read(root: &Path) -> Result<Self> {
        let path = root.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Error::not_found().with_message(format!("No {MANIFEST_FILE} found in {}", root.display()))
            } else {
                Error::connector()
                    .with_message(format!("Failed to read {}", path.display()))
                    .with_source(err)
            }
        })?;
        Self::parse(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|err| {
            Error::serialization()
                .with_message("Failed to serialize the project manifest")
                .with_source(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;

    use super::*;

    #[test]
    fn test_parse() {
        let manifest = ProjectManifest::parse("name: shop\nversion: \"1.2\"\n").unwrap();
        assert_eq!(manifest.name, "shop");
        assert_eq!(manifest.version.as_deref(), Some("1.2"));

        let manifest = ProjectManifest::parse("name: shop\n").unwrap();
        assert_eq!(manifest.version, None);
    }

    #[test]
    fn test_name_is_required() {
        let err = ProjectManifest::parse("version: \"1\"\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        assert!(err.message().contains("name"));

        let err = ProjectManifest::parse("name: \"  \"\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
    }

    #[test]
    fn test_yaml_round_trip() {
        let manifest = ProjectManifest::new("demo");
        let text = manifest.to_yaml().unwrap();
        assert_eq!(text, "name: demo\n");
        assert_eq!(ProjectManifest::parse(&text).unwrap(), manifest);
    }
}
