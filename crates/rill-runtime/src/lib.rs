#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod context;
mod engine;
pub mod eval;
mod job;
mod loader;
pub mod op;
pub mod project;
mod variable;

#[doc(hidden)]
pub mod prelude;

#[cfg(test)]
mod test_support;

pub use context::{ExecutionContext, FlowPosition};
pub use engine::Engine;
pub use job::{ExecutionStack, Job, JobHandle, JobStatus, StackEntry};
pub use loader::DataLoader;
pub use variable::{Scope, SharedBindings, Variable, VariableBindings, VariableKind, VariableView};

/// Tracing target for runtime operations.
pub const TRACING_TARGET: &str = "rill_runtime";
