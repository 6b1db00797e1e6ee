//! Pass 3: macro expansion.
//!
//! A macro is invoked as `$name` or `$name(arg, ...)` with the parenthesis
//! directly after the name. Only names on the registry's allow-list expand;
//! any other `$name` is an error. Numeric parameters (`$1`) are positional
//! placeholders and are left alone.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{PipeError, PipeResult};
use crate::parser::dialect::Dialect;
use crate::parser::lexer::lex;
use crate::parser::token::Token;
use crate::parser::tree::{Bracket, NodeId, NodeKind, Tree};
use crate::transpiler::parens::group_sequence;

/// A registered macro: named parameters and a pre-lexed body.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Token>,
    pub description: String,
}

impl MacroDef {
    /// Body text as registered.
    pub fn body_text(&self) -> String {
        self.body.iter().map(|t| t.text.as_str()).collect()
    }

    /// Invocation signature, e.g. `$last(column, amount, unit)`.
    pub fn signature(&self) -> String {
        if self.params.is_empty() {
            format!("${}", self.name)
        } else {
            format!("${}({})", self.name, self.params.join(", "))
        }
    }
}

/// Built-in macros: name, parameters, body, description.
const BUILTINS: &[(&str, &[&str], &str, &str)] = &[
    (
        "time_bucket",
        &["column", "unit"],
        "toStartOfInterval($column, INTERVAL 1 $unit)",
        "Truncate a timestamp to a one-unit bucket",
    ),
    (
        "last",
        &["column", "amount", "unit"],
        "$column >= now() - INTERVAL $amount $unit",
        "Keep rows inside a trailing time window",
    ),
    (
        "between_unix",
        &["column", "start", "end"],
        "$column BETWEEN FROM_UNIXTIME($start) AND FROM_UNIXTIME($end)",
        "Keep rows between two unix timestamps",
    ),
    (
        "error_severities",
        &[],
        "('error', 'ERROR', 'fatal', 'FATAL', 'critical', 'CRITICAL')",
        "Severity values treated as errors",
    ),
    (
        "is_error",
        &["column"],
        "$column IN $error_severities",
        "Severity column holds an error level",
    ),
    (
        "not_empty",
        &["column"],
        "($column IS NOT NULL AND $column != '')",
        "Column is neither NULL nor empty",
    ),
];

/// The macro allow-list.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    dialect: Dialect,
    defs: BTreeMap<String, MacroDef>,
}

impl MacroRegistry {
    /// An empty registry.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            defs: BTreeMap::new(),
        }
    }

    /// A registry holding the built-in macros.
    pub fn builtin(dialect: Dialect) -> PipeResult<Self> {
        let mut registry = Self::new(dialect);
        for (name, params, body, description) in BUILTINS {
            let params = params.iter().map(|p| p.to_string()).collect();
            registry.register(name, params, body, description)?;
        }
        Ok(registry)
    }

    /// Add or replace a macro.
    ///
    /// The body is lexed and bracket-checked now so that expansion cannot fail
    /// on it later.
    pub fn register(
        &mut self,
        name: &str,
        params: Vec<String>,
        body: &str,
        description: &str,
    ) -> PipeResult<()> {
        if !is_macro_name(name) {
            return Err(PipeError::Config(format!("invalid macro name '{name}'")));
        }
        for (i, p) in params.iter().enumerate() {
            if !is_macro_name(p) {
                return Err(PipeError::Config(format!(
                    "macro '{name}': invalid parameter name '{p}'"
                )));
            }
            if params[..i].contains(p) {
                return Err(PipeError::Config(format!(
                    "macro '{name}': duplicate parameter '{p}'"
                )));
            }
        }

        let tokens = lex(body, self.dialect)?;
        let mut scratch = Tree::new();
        let leaves = tokens.iter().cloned().map(|t| scratch.leaf(t)).collect();
        group_sequence(&mut scratch, leaves)?;

        self.defs.insert(
            name.to_string(),
            MacroDef {
                name: name.to_string(),
                params,
                body: tokens,
                description: description.to_string(),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.defs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MacroDef> {
        self.defs.values()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

fn is_macro_name(name: &str) -> bool {
    !name.is_empty()
        && !is_positional(name)
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn is_positional(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_digit())
}

/// Expand every macro invocation in the tree.
///
/// Expansions are rescanned; a chain of expansions deeper than `max_depth`
/// fails with [`PipeError::MacroRecursionLimit`].
pub fn expand_macros(tree: &mut Tree, registry: &MacroRegistry, max_depth: usize) -> PipeResult<NodeId> {
    let root = tree.root();
    let mut expanded = 0;
    expand_in(tree, registry, root, 0, max_depth, &mut expanded)?;
    debug!(expanded, "expanded macros");
    Ok(root)
}

fn expand_in(
    tree: &mut Tree,
    registry: &MacroRegistry,
    parent: NodeId,
    depth: usize,
    max_depth: usize,
    expanded: &mut usize,
) -> PipeResult<()> {
    let mut children = tree.children(parent).to_vec();
    let mut i = 0;

    while i < children.len() {
        let child = children[i];
        let name = tree
            .token(child)
            .and_then(Token::parameter_name)
            .filter(|n| !is_positional(n))
            .map(str::to_string);

        match name {
            Some(name) => {
                let def = registry
                    .get(&name)
                    .ok_or_else(|| PipeError::UnknownMacro(name.clone()))?;
                if depth >= max_depth {
                    return Err(PipeError::MacroRecursionLimit {
                        name,
                        limit: max_depth,
                    });
                }

                let group = children
                    .get(i + 1)
                    .copied()
                    .filter(|&g| !def.params.is_empty() && tree.is_group(g, Bracket::Paren));
                let args = match group {
                    Some(g) => call_args(tree, g),
                    None => Vec::new(),
                };
                if args.len() != def.params.len() {
                    return Err(PipeError::MacroArguments {
                        name,
                        expected: def.params.len(),
                        found: args.len(),
                    });
                }

                let body = instantiate(tree, def, &args)?;
                let call = tree.alloc(NodeKind::MacroCall(name), body);
                let consumed = if group.is_some() { 2 } else { 1 };
                children.splice(i..i + consumed, [call]);
                *expanded += 1;

                expand_in(tree, registry, call, depth + 1, max_depth, expanded)?;
            }
            None => {
                if !tree.children(child).is_empty() {
                    expand_in(tree, registry, child, depth, max_depth, expanded)?;
                }
            }
        }
        i += 1;
    }

    tree.set_children(parent, children);
    Ok(())
}

/// Comma-separated arguments of a call group; `()` has none.
fn call_args(tree: &Tree, group: NodeId) -> Vec<Vec<NodeId>> {
    let interior = tree.group_interior(group).to_vec();
    let parts = tree.split_on(&interior, ",");
    if parts.len() == 1 && parts[0].is_empty() {
        Vec::new()
    } else {
        parts
    }
}

/// Build the body nodes with each parameter replaced by a copy of its argument.
fn instantiate(tree: &mut Tree, def: &MacroDef, args: &[Vec<NodeId>]) -> PipeResult<Vec<NodeId>> {
    let mut nodes = Vec::with_capacity(def.body.len());
    for token in &def.body {
        let param = token
            .parameter_name()
            .and_then(|p| def.params.iter().position(|q| q == p));
        match param {
            Some(pos) => {
                for &n in &args[pos] {
                    nodes.push(tree.deep_copy(n));
                }
            }
            None => nodes.push(tree.leaf(token.clone())),
        }
    }
    group_sequence(tree, nodes)
}
