//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types for ergonomic imports:
//!
//! ```rust
//! use rill_runtime::prelude::*;
//! ```

pub use rill_core::{Connection, Error, ErrorKind, Result, Row, TableAddress, Trace};

pub use crate::context::{ExecutionContext, FlowPosition};
pub use crate::engine::Engine;
pub use crate::eval::{Field, RenderOptions, Sandbox, SandboxConfig};
pub use crate::job::{Job, JobHandle, JobStatus};
pub use crate::loader::DataLoader;
pub use crate::op::{
    FlowDefinition, ForEach, Op, OpDefinition, OpOptions, OpRegistry, Params, PreviewMode,
};
pub use crate::project::{MemoryProject, Project, SourceDefinition};
pub use crate::variable::Scope;
