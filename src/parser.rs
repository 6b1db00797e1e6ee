//! Pipe-syntax SQL front end.
//!
//! Source text is lexed into [`token::Token`]s and collected into a
//! [`tree::Tree`] that the rewrite passes operate on.
//!
//! ```text
//! FROM logs |> WHERE status >= 500 |> LIMIT 10
//! ───┬────  ─────────┬──────────── ────┬────
//!    │               │                 └── stage
//!    │               └── stage
//!    └── base (FROM source)
//! ```

pub mod dialect;
pub mod lexer;
pub mod stage;
pub mod token;
pub mod tree;

pub use dialect::Dialect;
pub use lexer::{lex, Lexer};
pub use token::{Token, TokenKind};
pub use tree::{NodeId, NodeKind, Tree};

use crate::error::PipeResult;

/// Lex `input` and build a flat, bracket-checked tree.
pub fn parse(input: &str, dialect: Dialect) -> PipeResult<Tree> {
    Tree::from_tokens(Lexer::new(input, dialect))
}

/// [`parse`] with an explicit bound on bracket nesting.
pub fn parse_with_depth(input: &str, dialect: Dialect, max_depth: usize) -> PipeResult<Tree> {
    Tree::from_tokens_with_depth(Lexer::new(input, dialect), max_depth)
}
