#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod fs;
mod jsonl;
mod manifest;
mod scaffold;

pub use crate::fs::{FLOWS_DIR, FsProject, SOURCES_DIR};
pub use crate::jsonl::{JSONL_SOURCE_KIND, JsonlConnection};
pub use crate::manifest::{MANIFEST_FILE, ProjectManifest};
pub use crate::scaffold::scaffold;

/// Tracing target for project loading.
pub const TRACING_TARGET: &str = "rill_project";
