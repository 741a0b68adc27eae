//! Expression evaluation.
//!
//! Every definition field is either rendered as a template or computed by
//! sandboxed user code:
//! - [`template`]: `{{ var("x") }}` rendering with strict undefined handling
//! - [`Sandbox`] and [`UserFunction`]: compiled `evaluate` functions
//! - [`Field`]: the choice between the two for one definition key

mod document;
mod field;
mod function;
mod sandbox;
pub mod template;

pub use document::{Document, Origin};
pub use field::{CompiledField, EXPRESSION_SUFFIX, Field};
pub use function::{ENTRY_POINT, ScriptContext, UserFunction};
pub use sandbox::{Sandbox, SandboxConfig, SandboxConfigBuilder};
pub use template::{NULL_LITERAL, RenderOptions, render, render_str};
