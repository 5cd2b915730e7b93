//! Prompt Template System
//!
//! Loads and renders `.pmt` (prompt template) files for the pipeline stages.
//!
//! Template loading chain:
//! 1. `{prompts.dir}/{name}.pmt` (configured override)
//! 2. Embedded fallback in code
//!
//! Templates use Handlebars syntax for variable substitution.

pub mod embedded;
mod loader;

pub use loader::{PromptContext, PromptLoader};
