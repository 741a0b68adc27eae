//! Project skeletons for `rill init`.

use std::path::Path;

use rill_core::{Error, Result};

use crate::fs::{FLOWS_DIR, SOURCES_DIR};
use crate::manifest::{MANIFEST_FILE, ProjectManifest};

const TRACING_TARGET: &str = "rill_project::scaffold";

const MAIN_FLOW: &str = r#"description: Example flow
steps:
  - op: set_variable
    id: greet
    name: greeting
    value: Hello from rill
  - op: print
    message: "{{ var('greeting') }}"
"#;

const LOCAL_SOURCE: &str = "type: jsonl\npath: data\n";

/// Writes a minimal project into `root`.
///
/// Fails if `root` already holds a manifest. The project is named after
/// `name`, or after the directory when `name` is `None`.
pub fn scaffold(root: &Path, name: Option<&str>) -> Result<ProjectManifest> {
    if root.join(MANIFEST_FILE).exists() {
        return Err(Error::invalid_definition()
            .with_message(format!("{} already contains a {MANIFEST_FILE}", root.display())));
    }

    let name = match name {
        Some(name) => name.to_owned(),
        None => root
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("rill-project")
            .to_owned(),
    };
    let manifest = ProjectManifest::new(name);

    write(&root.join(FLOWS_DIR).join("main.yaml"), MAIN_FLOW)?;
    write(&root.join(SOURCES_DIR).join("local.yaml"), LOCAL_SOURCE)?;
    write(&root.join(MANIFEST_FILE), &manifest.to_yaml()?)?;

    tracing::info!(target: TRACING_TARGET, project = %manifest.name, root = %root.display(), "Project created");
    Ok(manifest)
}

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::connector()
                .with_message(format!("Failed to create directory {}", parent.display()))
                .with_source(err)
        })?;
    }
    std::fs::write(path, contents).map_err(|err| {
        Error::connector()
            .with_message(format!("Failed to write {}", path.display()))
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use rill_core::ErrorKind;
    use rill_runtime::project::Project;

    use super::*;
    use crate::FsProject;

    #[test]
    fn test_scaffold_opens_as_a_project() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("orders");
        let manifest = scaffold(&root, None).unwrap();
        assert_eq!(manifest.name, "orders");

        let project = FsProject::open(&root).unwrap();
        assert_eq!(project.flow_names(), vec!["main"]);
        assert_eq!(project.flow("main").unwrap().steps.len(), 2);
        assert_eq!(project.source("local").unwrap().kind, "jsonl");
    }

    #[test]
    fn test_scaffold_refuses_existing_project() {
        let dir = tempfile::tempdir().unwrap();
        scaffold(dir.path(), Some("first")).unwrap();
        let err = scaffold(dir.path(), Some("second")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDefinition);
        assert_eq!(ProjectManifest::read(dir.path()).unwrap().name, "first");
    }
}
