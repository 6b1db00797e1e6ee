//! Pass 5: turn pipe stages into standard SQL.
//!
//! The general form chains one CTE per stage, each reading the previous one:
//!
//! ```text
//! FROM logs |> WHERE status >= 500 |> AGGREGATE count(*) AS c
//!
//! WITH __pipe_1 AS (SELECT * FROM logs WHERE status >= 500),
//!      __pipe_2 AS (SELECT count(*) AS c FROM __pipe_1)
//! SELECT * FROM __pipe_2
//! ```
//!
//! The flat form folds `WHERE* → SELECT|EXTEND|AGGREGATE → ORDER BY → LIMIT`
//! over a plain table into a single SELECT and falls back to CTEs otherwise.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{PipeError, PipeResult};
use crate::parser::stage::StageOp;
use crate::parser::token::{Token, TokenKind};
use crate::parser::tree::{NodeId, NodeKind, Tree};
use crate::transpiler::codegen::quote_ident;
use crate::transpiler::stages::{stage_args, stages};

const ALIAS_PREFIX: &str = "__pipe";

/// Output shape of the transpilation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One CTE per stage.
    #[default]
    Cte,
    /// A single SELECT when the stages allow it.
    Flat,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Cte => write!(f, "cte"),
            Strategy::Flat => write!(f, "flat"),
        }
    }
}

impl FromStr for Strategy {
    type Err = PipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cte" => Ok(Strategy::Cte),
            "flat" => Ok(Strategy::Flat),
            other => Err(PipeError::Config(format!("unknown strategy '{other}'"))),
        }
    }
}

/// One stage with its trimmed arguments.
struct Step {
    op: StageOp,
    args: Vec<NodeId>,
}

/// What the first stage reads from.
enum Source {
    /// `FROM name` or `FROM db.name`.
    Table(Vec<NodeId>),
    /// Any other base query; becomes the first CTE.
    Query(Vec<NodeId>),
}

struct Cte {
    alias: String,
    body: Vec<NodeId>,
    /// Names this CTE reads from.
    reads: Vec<String>,
}

/// Rewrite the statement's pipe stages as SQL.
///
/// Statements without stages are returned untouched.
pub fn transpile(tree: &mut Tree, strategy: Strategy) -> PipeResult<NodeId> {
    check_nested_pipes(tree)?;
    let root = tree.root();
    let found: Vec<NodeId> = stages(tree).into_iter().map(|(id, _)| id).collect();
    let Some(&last_stage) = found.last() else {
        return Ok(root);
    };

    let children = tree.children(root).to_vec();
    let first_pos = children.iter().position(|&c| c == found[0]).unwrap_or(0);
    let last_pos = children.iter().position(|&c| c == last_stage).unwrap_or(0);

    let base = &children[..first_pos];
    let lead = base.iter().position(|&n| !tree.is_trivia(n)).unwrap_or(base.len());
    let leading = base[..lead].to_vec();
    let trailing = children[last_pos + 1..].to_vec();
    let trimmed = tree.trim(base).to_vec();
    let source = classify_source(tree, &trimmed)?;

    let mut steps = Vec::with_capacity(found.len());
    for id in found {
        let op = match tree.kind(id) {
            NodeKind::Stage(s) => s.op.clone(),
            _ => continue,
        };
        let args = stage_args(tree, id);
        check_args(&op, &args)?;
        steps.push(Step { op, args });
    }

    let body = match (strategy, source) {
        (Strategy::Flat, Source::Table(table)) if is_flat(&steps) => {
            debug!(stages = steps.len(), "transpiling to a single query");
            flat(tree, table, steps)?
        }
        (_, source) => {
            debug!(stages = steps.len(), "transpiling to CTEs");
            chain(tree, source, steps)?
        }
    };

    let mut out = leading;
    out.extend(body);
    out.extend(trailing);
    let statement = tree.alloc(NodeKind::Statement, out);
    tree.set_root(statement);
    Ok(statement)
}

/// Only top-level `|>` operators start stages; one inside brackets would
/// reach the store verbatim.
fn check_nested_pipes(tree: &Tree) -> PipeResult<()> {
    for &child in tree.children(tree.root()) {
        let inner = match tree.kind(child) {
            NodeKind::Stage(_) => tree.children(child).get(1..).unwrap_or_default(),
            _ => std::slice::from_ref(&child),
        };
        let nested = inner
            .iter()
            .flat_map(|&n| tree.tokens(n))
            .find(|t| t.is_pipe());
        if let Some(t) = nested {
            return Err(PipeError::transpile(format!(
                "pipe operator at offset {} is inside brackets; pipe syntax in subqueries is not supported",
                t.offset
            )));
        }
    }
    Ok(())
}

fn check_args(op: &StageOp, args: &[NodeId]) -> PipeResult<()> {
    match op {
        StageOp::Enrich => Err(PipeError::EnrichmentUnavailable(
            "ENRICH stage was not expanded against a catalog".to_string(),
        )),
        StageOp::Unknown(word) if word.is_empty() => {
            Err(PipeError::transpile("empty pipe stage"))
        }
        StageOp::Unknown(word) => Err(PipeError::transpile(format!(
            "unsupported pipe operator '{word}'"
        ))),
        StageOp::Distinct if !args.is_empty() => {
            Err(PipeError::transpile("DISTINCT takes no arguments"))
        }
        op if op.requires_args() && args.is_empty() => {
            Err(PipeError::transpile(format!("'{op}' stage requires arguments")))
        }
        _ => Ok(()),
    }
}

fn classify_source(tree: &mut Tree, base: &[NodeId]) -> PipeResult<Source> {
    let Some(&first) = base.first() else {
        return Err(PipeError::transpile("pipe query has no source before the first '|>'"));
    };
    if !tree.is_keyword(first, "FROM") {
        return Ok(Source::Query(base.to_vec()));
    }

    let rest = tree.trim(&base[1..]);
    if rest.is_empty() {
        return Err(PipeError::transpile("FROM without a source"));
    }
    if is_table_name(tree, rest) {
        Ok(Source::Table(rest.to_vec()))
    } else {
        let select = tree.fragment("SELECT * ");
        let mut query = vec![select];
        query.extend_from_slice(base);
        Ok(Source::Query(query))
    }
}

/// `name` or dotted `db.name`, with no spacing.
fn is_table_name(tree: &Tree, nodes: &[NodeId]) -> bool {
    nodes.len() % 2 == 1
        && nodes.iter().enumerate().all(|(i, &n)| match tree.token(n) {
            Some(t) if i % 2 == 0 => t.kind == TokenKind::Identifier,
            Some(t) => t.is_symbol("."),
            None => false,
        })
}

/// Output SQL under construction.
struct Sql<'t> {
    tree: &'t mut Tree,
    out: Vec<NodeId>,
}

impl<'t> Sql<'t> {
    fn new(tree: &'t mut Tree) -> Self {
        Self {
            tree,
            out: Vec::new(),
        }
    }

    fn text(&mut self, text: &str) -> &mut Self {
        let id = self.tree.fragment(text);
        self.out.push(id);
        self
    }

    fn nodes(&mut self, nodes: &[NodeId]) -> &mut Self {
        self.out.extend_from_slice(nodes);
        self
    }

    /// Deep copies of `nodes`, for text that appears twice in the output.
    fn copies(&mut self, nodes: &[NodeId]) -> &mut Self {
        for &n in nodes {
            let copy = self.tree.deep_copy(n);
            self.out.push(copy);
        }
        self
    }

    /// An identifier leaf, so later checks can see the reference.
    fn ident(&mut self, name: &str) -> &mut Self {
        let id = self.tree.leaf(Token::new(TokenKind::Identifier, quote_ident(name), 0));
        self.out.push(id);
        self
    }

    /// `parts` joined by `", "`.
    fn list(&mut self, parts: &[Vec<NodeId>]) -> &mut Self {
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.text(", ");
            }
            self.nodes(part);
        }
        self
    }

    fn finish(self) -> Vec<NodeId> {
        self.out
    }
}

/// Split AGGREGATE arguments at a top-level `GROUP BY`.
fn split_group_by(tree: &Tree, args: &[NodeId]) -> PipeResult<(Vec<NodeId>, Vec<NodeId>)> {
    let sig = tree.significant(args);
    for (k, &i) in sig.iter().enumerate() {
        if tree.is_keyword(args[i], "GROUP") {
            let by = sig.get(k + 1).copied();
            if !by.is_some_and(|b| tree.is_keyword(args[b], "BY")) {
                return Err(PipeError::transpile("expected BY after GROUP"));
            }
            let by = by.unwrap_or(i);
            let keys = tree.trim(&args[by + 1..]).to_vec();
            if keys.is_empty() {
                return Err(PipeError::transpile("GROUP BY without keys"));
            }
            return Ok((tree.trim(&args[..i]).to_vec(), keys));
        }
    }
    Ok((args.to_vec(), Vec::new()))
}

/// A grouping key without its trailing `AS alias`.
fn strip_alias<'n>(tree: &Tree, key: &'n [NodeId]) -> &'n [NodeId] {
    let sig = tree.significant(key);
    match sig.len() {
        n if n >= 3 && tree.is_keyword(key[sig[n - 2]], "AS") => tree.trim(&key[..sig[n - 2]]),
        _ => key,
    }
}

/// Grouping expressions of a comma-separated key list.
fn group_keys(tree: &Tree, keys: &[NodeId]) -> PipeResult<Vec<Vec<NodeId>>> {
    let exprs: Vec<Vec<NodeId>> = tree
        .split_on(keys, ",")
        .iter()
        .map(|k| strip_alias(tree, k).to_vec())
        .collect();
    if exprs.iter().any(Vec::is_empty) {
        return Err(PipeError::transpile("empty GROUP BY key"));
    }
    Ok(exprs)
}

/// Write `keys, aggs FROM input GROUP BY key-expressions`.
fn write_aggregate(sql: &mut Sql<'_>, args: &[NodeId], input: &Input) -> PipeResult<()> {
    let (aggs, keys) = split_group_by(sql.tree, args)?;
    if keys.is_empty() {
        sql.nodes(&aggs);
        input.write_from(sql);
        return Ok(());
    }

    let exprs = group_keys(sql.tree, &keys)?;
    sql.nodes(&keys);
    if !aggs.is_empty() {
        sql.text(", ").nodes(&aggs);
    }
    input.write_from(sql);
    sql.text(" GROUP BY");
    for (i, expr) in exprs.iter().enumerate() {
        sql.text(if i == 0 { " " } else { ", " }).copies(expr);
    }
    Ok(())
}

/// The relation a stage selects from.
enum Input {
    Table(Vec<NodeId>),
    Alias(String),
}

impl Input {
    fn write_from(&self, sql: &mut Sql<'_>) {
        sql.text(" FROM ");
        match self {
            Input::Table(nodes) => {
                sql.copies(nodes);
            }
            Input::Alias(name) => {
                sql.ident(name);
            }
        }
    }

    fn name(&self, tree: &Tree) -> String {
        match self {
            Input::Table(nodes) => nodes
                .iter()
                .filter_map(|&n| tree.token(n))
                .map(Token::unquoted)
                .collect(),
            Input::Alias(name) => name.clone(),
        }
    }
}

fn chain(tree: &mut Tree, source: Source, steps: Vec<Step>) -> PipeResult<Vec<NodeId>> {
    let prefix = alias_prefix(tree);
    let mut ctes: Vec<Cte> = Vec::new();
    let mut next = 0usize;
    let mut fresh = || {
        next += 1;
        format!("{prefix}_{next}")
    };

    let mut input = match source {
        Source::Table(nodes) => Input::Table(nodes),
        Source::Query(body) => {
            let alias = format!("{prefix}_0");
            ctes.push(Cte {
                alias: alias.clone(),
                body,
                reads: Vec::new(),
            });
            Input::Alias(alias)
        }
    };

    for step in steps {
        if step.op == StageOp::As {
            let name = match step.args.as_slice() {
                [n] => match tree.token(*n) {
                    Some(t) if t.kind == TokenKind::Identifier => t.unquoted().to_string(),
                    _ => return Err(PipeError::transpile("AS expects a single name")),
                },
                _ => return Err(PipeError::transpile("AS expects a single name")),
            };
            match (&input, ctes.last_mut()) {
                (Input::Alias(_), Some(last)) => last.alias = name.clone(),
                _ => {
                    let reads = vec![input.name(tree)];
                    let mut sql = Sql::new(tree);
                    sql.text("SELECT *");
                    input.write_from(&mut sql);
                    ctes.push(Cte {
                        alias: name.clone(),
                        body: sql.finish(),
                        reads,
                    });
                }
            }
            input = Input::Alias(name);
            continue;
        }

        let reads = vec![input.name(tree)];
        let body = stage_sql(tree, &step, &input)?;
        let alias = fresh();
        ctes.push(Cte {
            alias: alias.clone(),
            body,
            reads,
        });
        input = Input::Alias(alias);
    }

    check_references(tree, &ctes, &prefix)?;

    let mut sql = Sql::new(tree);
    sql.text("WITH ");
    let last = ctes.last().map(|c| c.alias.clone()).unwrap_or_default();
    for (i, cte) in ctes.into_iter().enumerate() {
        if i > 0 {
            sql.text(", ");
        }
        sql.ident(&cte.alias).text(" AS (").nodes(&cte.body).text(")");
    }
    sql.text(" SELECT * FROM ").ident(&last);
    Ok(sql.finish())
}

fn stage_sql(tree: &mut Tree, step: &Step, input: &Input) -> PipeResult<Vec<NodeId>> {
    let args = step.args.as_slice();
    let mut sql = Sql::new(tree);

    match &step.op {
        StageOp::Where => {
            sql.text("SELECT *");
            input.write_from(&mut sql);
            sql.text(" WHERE ").nodes(args);
        }
        StageOp::Select => {
            sql.text("SELECT ").nodes(args);
            input.write_from(&mut sql);
        }
        StageOp::Extend => {
            sql.text("SELECT *, ").nodes(args);
            input.write_from(&mut sql);
        }
        StageOp::Aggregate => {
            sql.text("SELECT ");
            write_aggregate(&mut sql, args, input)?;
        }
        StageOp::OrderBy => {
            sql.text("SELECT *");
            input.write_from(&mut sql);
            sql.text(" ORDER BY ").nodes(args);
        }
        StageOp::Limit => {
            sql.text("SELECT *");
            input.write_from(&mut sql);
            sql.text(" LIMIT ").nodes(args);
        }
        StageOp::Distinct => {
            sql.text("SELECT DISTINCT *");
            input.write_from(&mut sql);
        }
        StageOp::Drop => {
            sql.text("SELECT * EXCEPT (").nodes(args).text(")");
            input.write_from(&mut sql);
        }
        StageOp::Set => {
            let mut replaced = Vec::new();
            for part in sql.tree.split_on(args, ",") {
                let eq = part.iter().position(|&n| sql.tree.is_symbol(n, "="));
                let (column, expr) = match eq {
                    Some(i) => (sql.tree.trim(&part[..i]).to_vec(), sql.tree.trim(&part[i + 1..]).to_vec()),
                    None => return Err(PipeError::transpile("SET expects `column = expression`")),
                };
                if column.is_empty() || expr.is_empty() {
                    return Err(PipeError::transpile("SET expects `column = expression`"));
                }
                replaced.push((column, expr));
            }
            sql.text("SELECT * REPLACE (");
            for (i, (column, expr)) in replaced.iter().enumerate() {
                if i > 0 {
                    sql.text(", ");
                }
                sql.nodes(expr).text(" AS ").nodes(column);
            }
            sql.text(")");
            input.write_from(&mut sql);
        }
        StageOp::Rename => {
            let mut pairs = Vec::new();
            for part in sql.tree.split_on(args, ",") {
                let sig = sql.tree.significant(&part);
                let at = sig.iter().copied().find(|&i| sql.tree.is_keyword(part[i], "AS"));
                let (old, new) = match at {
                    Some(i) => (sql.tree.trim(&part[..i]).to_vec(), sql.tree.trim(&part[i + 1..]).to_vec()),
                    None => return Err(PipeError::transpile("RENAME expects `old AS new`")),
                };
                if old.is_empty() || new.is_empty() {
                    return Err(PipeError::transpile("RENAME expects `old AS new`"));
                }
                pairs.push((old, new));
            }
            let olds: Vec<Vec<NodeId>> = pairs.iter().map(|(o, _)| o.clone()).collect();
            sql.text("SELECT * EXCEPT (").list(&olds).text(")");
            for (old, new) in &pairs {
                sql.text(", ").copies(old).text(" AS ").nodes(new);
            }
            input.write_from(&mut sql);
        }
        StageOp::Join(keyword) => {
            sql.text("SELECT *");
            input.write_from(&mut sql);
            sql.text(&format!(" {keyword} ")).nodes(args);
        }
        StageOp::As | StageOp::Enrich | StageOp::Unknown(_) => {
            return Err(PipeError::transpile(format!(
                "'{}' cannot be expressed as a query stage",
                step.op
            )));
        }
    }

    Ok(sql.finish())
}

fn alias_prefix(tree: &Tree) -> String {
    tree.unused_prefix(ALIAS_PREFIX)
}

/// Reject CTEs that read their own or a later alias, and duplicate aliases.
fn check_references(tree: &Tree, ctes: &[Cte], prefix: &str) -> PipeResult<()> {
    for (i, cte) in ctes.iter().enumerate() {
        if ctes[..i].iter().any(|c| c.alias == cte.alias) {
            return Err(PipeError::transpile(format!("duplicate alias '{}'", cte.alias)));
        }

        let mut refs = cte.reads.clone();
        for &n in &cte.body {
            refs.extend(
                tree.identifiers(n)
                    .into_iter()
                    .filter(|name| name.starts_with(prefix)),
            );
        }

        for name in refs {
            match ctes.iter().position(|c| c.alias == name) {
                Some(j) if j >= i => {
                    return Err(PipeError::transpile(format!(
                        "'{}' references '{name}' which is not defined before it",
                        cte.alias
                    )));
                }
                None if name.starts_with(prefix) => {
                    return Err(PipeError::transpile(format!(
                        "'{}' references undefined alias '{name}'",
                        cte.alias
                    )));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn is_flat(steps: &[Step]) -> bool {
    let mut phase = 0;
    for step in steps {
        let p = match step.op {
            StageOp::Where if phase == 0 => 0,
            StageOp::Select | StageOp::Extend | StageOp::Aggregate => 1,
            StageOp::OrderBy => 2,
            StageOp::Limit => 3,
            _ => return false,
        };
        if p < phase || (p == phase && p > 0) {
            return false;
        }
        phase = p;
    }
    true
}

fn flat(tree: &mut Tree, table: Vec<NodeId>, steps: Vec<Step>) -> PipeResult<Vec<NodeId>> {
    let filters: Vec<&Step> = steps.iter().filter(|s| s.op == StageOp::Where).collect();
    let projection = steps
        .iter()
        .find(|s| matches!(s.op, StageOp::Select | StageOp::Extend | StageOp::Aggregate));
    let order = steps.iter().find(|s| s.op == StageOp::OrderBy);
    let limit = steps.iter().find(|s| s.op == StageOp::Limit);

    let mut sql = Sql::new(tree);
    let input = Input::Table(table);
    let mut aggregated = false;
    sql.text("SELECT ");
    match projection {
        Some(Step { op: StageOp::Select, args }) => {
            sql.nodes(args);
        }
        Some(Step { op: StageOp::Extend, args }) => {
            sql.text("*, ").nodes(args);
        }
        Some(Step { args, .. }) => {
            aggregated = true;
            let (aggs, keys) = split_group_by(sql.tree, args)?;
            if keys.is_empty() {
                sql.nodes(&aggs);
            } else {
                sql.nodes(&keys);
                if !aggs.is_empty() {
                    sql.text(", ").nodes(&aggs);
                }
            }
        }
        None => {
            sql.text("*");
        }
    }
    input.write_from(&mut sql);

    if filters.len() == 1 {
        sql.text(" WHERE ").nodes(&filters[0].args);
    } else if !filters.is_empty() {
        for (i, step) in filters.iter().enumerate() {
            sql.text(if i == 0 { " WHERE (" } else { ") AND (" }).nodes(&step.args);
        }
        sql.text(")");
    }

    if let (true, Some(step)) = (aggregated, projection) {
        let (_, keys) = split_group_by(sql.tree, &step.args)?;
        if !keys.is_empty() {
            let exprs = group_keys(sql.tree, &keys)?;
            sql.text(" GROUP BY");
            for (i, expr) in exprs.iter().enumerate() {
                sql.text(if i == 0 { " " } else { ", " }).copies(expr);
            }
        }
    }
    if let Some(step) = order {
        sql.text(" ORDER BY ").nodes(&step.args);
    }
    if let Some(step) = limit {
        sql.text(" LIMIT ").nodes(&step.args);
    }
    Ok(sql.finish())
}
