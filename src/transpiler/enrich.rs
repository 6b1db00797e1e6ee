//! Pass 4: enrichment expansion.
//!
//! `|> ENRICH ip(client_ip) AS geo` becomes a `LEFT JOIN` stage against the
//! enrichment's lookup table, with the columns the catalog actually has.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::error::{PipeError, PipeResult};
use crate::parser::stage::{Stage, StageOp};
use crate::parser::token::TokenKind;
use crate::parser::tree::{Bracket, NodeId, NodeKind, Tree};
use crate::transpiler::codegen::quote_ident;
use crate::transpiler::stages::{stage_args, stages};

/// A lookup table joined on a key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub name: String,
    pub table: String,
    pub key: String,
    /// Columns to bring in, prefixed on output.
    pub columns: Vec<String>,
}

/// Base of the join aliases, `<prefix>_<name>_<k>`.
const JOIN_PREFIX: &str = "__enrich";

const IP_COLUMNS: &[&str] = &[
    "country_long",
    "country_short",
    "region",
    "city",
    "latitude",
    "longitude",
    "zipcode",
    "timezone",
    "asn",
    "asn_country",
    "isp",
    "hostname",
    "registry",
    "allocated_at",
];

/// Enrichment functions callable from `ENRICH` stages.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentRegistry {
    defs: BTreeMap<String, Enrichment>,
}

impl EnrichmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `ip` geolocation enrichment over `ip_data`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Enrichment {
            name: "ip".to_string(),
            table: "ip_data".to_string(),
            key: "ip".to_string(),
            columns: IP_COLUMNS.iter().map(|c| c.to_string()).collect(),
        });
        registry
    }

    pub fn register(&mut self, enrichment: Enrichment) {
        self.defs.insert(enrichment.name.clone(), enrichment);
    }

    pub fn get(&self, name: &str) -> Option<&Enrichment> {
        self.defs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Enrichment> {
        self.defs.values()
    }
}

/// A parsed `ENRICH name(column) [AS prefix]` stage.
struct Call {
    stage: NodeId,
    pipe: NodeId,
    name: String,
    column: Vec<NodeId>,
    prefix: String,
    trailing: Vec<NodeId>,
}

/// Expand every `ENRICH` stage.
///
/// Needs a catalog as soon as one such stage exists; each distinct lookup
/// table is queried once.
pub async fn expand_enrichments<C>(
    tree: &mut Tree,
    registry: &EnrichmentRegistry,
    catalog: Option<&C>,
    max_targets: usize,
) -> PipeResult<NodeId>
where
    C: Catalog + Sync,
{
    let root = tree.root();
    let calls = stages(tree)
        .into_iter()
        .filter(|(_, s)| s.op == StageOp::Enrich)
        .map(|(id, _)| id)
        .collect::<Vec<_>>()
        .into_iter()
        .map(|id| parse_call(tree, id))
        .collect::<PipeResult<Vec<_>>>()?;

    if calls.is_empty() {
        return Ok(root);
    }

    let mut targets: Vec<&Enrichment> = Vec::new();
    for call in &calls {
        let def = registry.get(&call.name).ok_or_else(|| {
            PipeError::EnrichmentUnavailable(format!("unknown enrichment '{}'", call.name))
        })?;
        if !targets.iter().any(|t| t.table == def.table) {
            targets.push(def);
        }
    }
    if targets.len() > max_targets {
        return Err(PipeError::EnrichmentLimit {
            found: targets.len(),
            limit: max_targets,
        });
    }

    let catalog = catalog.ok_or_else(|| {
        PipeError::EnrichmentUnavailable("no store handle for catalog lookups".to_string())
    })?;

    let mut available: HashMap<String, Vec<String>> = HashMap::new();
    for def in targets {
        let columns = catalog
            .table_columns(&def.table)
            .await
            .map_err(|e| PipeError::EnrichmentUnavailable(format!("{}: {e}", def.table)))?
            .ok_or_else(|| {
                PipeError::EnrichmentUnavailable(format!("table '{}' not found", def.table))
            })?;
        available.insert(def.table.clone(), columns);
    }

    let join_prefix = tree.unused_prefix(JOIN_PREFIX);
    for (k, call) in calls.into_iter().enumerate() {
        let Some(def) = registry.get(&call.name) else {
            continue;
        };
        let existing = available.get(&def.table).map(Vec::as_slice).unwrap_or_default();
        let alias = format!("{join_prefix}_{}_{k}", def.name);
        rewrite(tree, call, def, existing, &alias)?;
    }

    debug!(targets = available.len(), "expanded enrichments");
    Ok(root)
}

fn parse_call(tree: &Tree, stage: NodeId) -> PipeResult<Call> {
    let malformed =
        || PipeError::transpile("ENRICH expects `name(column)` optionally followed by `AS prefix`");

    let args = stage_args(tree, stage);
    let sig: Vec<NodeId> = args.iter().copied().filter(|&n| !tree.is_trivia(n)).collect();

    let name = match sig.first().and_then(|&n| tree.token(n)) {
        Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::Keyword) => {
            t.unquoted().to_ascii_lowercase()
        }
        _ => return Err(malformed()),
    };
    let group = match sig.get(1) {
        Some(&g) if tree.is_group(g, Bracket::Paren) => g,
        _ => return Err(malformed()),
    };
    let column = tree.trim(tree.group_interior(group)).to_vec();
    if column.is_empty() || tree.split_on(&column, ",").len() > 1 {
        return Err(malformed());
    }

    let prefix = match &sig[2..] {
        [] => format!("{name}_"),
        [kw, alias] if tree.is_keyword(*kw, "AS") => match tree.token(*alias) {
            Some(t) if t.kind == TokenKind::Identifier => format!("{}_", t.unquoted()),
            _ => return Err(malformed()),
        },
        _ => return Err(malformed()),
    };

    let children = tree.children(stage);
    let end = children.iter().rposition(|&n| !tree.is_trivia(n)).map_or(0, |i| i + 1);

    Ok(Call {
        stage,
        pipe: children[0],
        name,
        column,
        prefix,
        trailing: children[end..].to_vec(),
    })
}

fn rewrite(
    tree: &mut Tree,
    call: Call,
    def: &Enrichment,
    existing: &[String],
    alias: &str,
) -> PipeResult<()> {
    if !existing.iter().any(|c| c == &def.key) {
        return Err(PipeError::EnrichmentUnavailable(format!(
            "key column '{}' missing from '{}'",
            def.key, def.table
        )));
    }

    let mut select = vec![format!("{} AS __key", quote_ident(&def.key))];
    for column in &def.columns {
        if existing.iter().any(|c| c == column) {
            select.push(format!(
                "{} AS {}",
                quote_ident(column),
                quote_ident(&format!("{}{column}", call.prefix))
            ));
        } else {
            warn!(table = %def.table, column = %column, "enrichment column not in catalog, skipping");
        }
    }
    if select.len() == 1 {
        return Err(PipeError::EnrichmentUnavailable(format!(
            "'{}' has none of the columns of enrichment '{}'",
            def.table, def.name
        )));
    }

    let subquery = tree.fragment(format!(
        "(SELECT {} FROM {}) AS {alias} ON ",
        select.join(", "),
        quote_ident(&def.table)
    ));
    let join = tree.fragment(" LEFT JOIN ");
    let tail = tree.fragment(format!(" = {alias}.__key"));

    let mut children = vec![call.pipe, join, subquery];
    children.extend(call.column);
    children.push(tail);
    children.extend(call.trailing);

    tree.set_kind(
        call.stage,
        NodeKind::Stage(Stage {
            op: StageOp::Join("LEFT JOIN".to_string()),
            args_from: 2,
        }),
    );
    tree.set_children(call.stage, children);
    Ok(())
}
