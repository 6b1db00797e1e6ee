//! Rewrite passes and code generation.
//!
//! Passes run in a fixed order; each one assumes the structure left by the
//! ones before it:
//!
//! 1. [`parens`] groups brackets
//! 2. [`stages`] splits the statement at top-level `|>`
//! 3. [`macros`] expands `$name(...)` invocations
//! 4. [`enrich`] turns `ENRICH` stages into joins (needs a catalog)
//! 5. [`cte`] emits CTE chains or a single SELECT
//!
//! [`codegen`] renders any tree back to text.

pub mod codegen;
pub mod cte;
pub mod enrich;
pub mod macros;
pub mod parens;
pub mod stages;

pub use codegen::render;
pub use cte::{transpile, Strategy};
pub use enrich::{expand_enrichments, Enrichment, EnrichmentRegistry};
pub use macros::{expand_macros, MacroDef, MacroRegistry};
pub use parens::group_parentheses;
pub use stages::group_pipe_stages;
