//! Pass 2: partition the statement into pipe stages.

use tracing::debug;

use crate::parser::stage::{Stage, StageOp};
use crate::parser::token::TokenKind;
use crate::parser::tree::{NodeId, NodeKind, Tree};

/// Wrap each top-level `|>` segment in a [`NodeKind::Stage`] node.
///
/// Everything before the first `|>` stays as the statement's base. A
/// trailing `;` is kept outside the last stage. Statements without `|>`
/// are left untouched, as are statements that already carry stages.
pub fn group_pipe_stages(tree: &mut Tree) -> NodeId {
    let root = tree.root();
    let children = tree.children(root).to_vec();

    if children.iter().any(|&c| matches!(tree.kind(c), NodeKind::Stage(_))) {
        return root;
    }

    let pipes: Vec<usize> = (0..children.len())
        .filter(|&i| tree.token(children[i]).is_some_and(|t| t.is_pipe()))
        .collect();
    let (Some(&first), Some(&last)) = (pipes.first(), pipes.last()) else {
        return root;
    };

    let end = match tree.significant(&children).last() {
        Some(&i) if i > last && tree.is_symbol(children[i], ";") => i,
        _ => children.len(),
    };

    let mut out: Vec<NodeId> = children[..first].to_vec();
    for (k, &start) in pipes.iter().enumerate() {
        let stop = pipes.get(k + 1).copied().unwrap_or(end);
        let stage = make_stage(tree, children[start..stop].to_vec());
        out.push(stage);
    }
    out.extend_from_slice(&children[end..]);

    debug!(stages = pipes.len(), "grouped pipe stages");
    tree.set_children(root, out);
    root
}

fn make_stage(tree: &mut Tree, segment: Vec<NodeId>) -> NodeId {
    let mut words = Vec::new();
    let mut positions = Vec::new();

    for (i, &n) in segment.iter().enumerate().skip(1) {
        if tree.is_trivia(n) {
            continue;
        }
        match tree.token(n) {
            Some(t) if matches!(t.kind, TokenKind::Keyword | TokenKind::Identifier) && words.len() < 3 => {
                words.push(t.text.clone());
                positions.push(i);
            }
            _ => break,
        }
    }

    let (op, used) = StageOp::recognize(&words);
    let args_from = if used == 0 { 1 } else { positions[used - 1] + 1 };
    tree.alloc(NodeKind::Stage(Stage { op, args_from }), segment)
}

/// The stage nodes of a statement, in source order.
pub fn stages(tree: &Tree) -> Vec<(NodeId, &Stage)> {
    tree.children(tree.root())
        .iter()
        .filter_map(|&c| match tree.kind(c) {
            NodeKind::Stage(s) => Some((c, s)),
            _ => None,
        })
        .collect()
}

/// The argument nodes of a stage, trivia trimmed.
pub fn stage_args(tree: &Tree, id: NodeId) -> Vec<NodeId> {
    let children = tree.children(id);
    let from = match tree.kind(id) {
        NodeKind::Stage(s) => s.args_from.min(children.len()),
        _ => 0,
    };
    tree.trim(&children[from..]).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dialect::Dialect;
    use crate::parser::lexer::Lexer;
    use crate::transpiler::codegen::{render, render_nodes};
    use crate::transpiler::parens::group_parentheses;

    fn staged(sql: &str) -> Tree {
        let mut tree = Tree::from_tokens(Lexer::new(sql, Dialect::ClickHouse)).unwrap();
        group_parentheses(&mut tree).unwrap();
        group_pipe_stages(&mut tree);
        tree
    }

    #[test]
    fn test_stage_order() {
        let tree = staged(
            "FROM apache_logs |> WHERE timestamp BETWEEN 1700000000 AND 1700003600 |> AGGREGATE count(*) AS c",
        );
        let ops: Vec<StageOp> = stages(&tree).into_iter().map(|(_, s)| s.op.clone()).collect();
        assert_eq!(ops, vec![StageOp::Where, StageOp::Aggregate]);
    }

    #[test]
    fn test_stage_args() {
        let tree = staged("FROM t\n|> ORDER BY ts DESC\n|> LIMIT 10");
        let found = stages(&tree);
        assert_eq!(found[0].1.op, StageOp::OrderBy);
        assert_eq!(render_nodes(&tree, &stage_args(&tree, found[0].0)), "ts DESC");
        assert_eq!(render_nodes(&tree, &stage_args(&tree, found[1].0)), "10");
    }

    #[test]
    fn test_no_pipes_is_untouched() {
        let sql = "SELECT count(*) FROM t WHERE x = 1";
        let tree = staged(sql);
        assert!(stages(&tree).is_empty());
        assert_eq!(render(&tree), sql);
    }

    #[test]
    fn test_nested_pipes_are_not_stages() {
        let tree = staged("FROM (FROM t |> WHERE x) |> LIMIT 1");
        assert_eq!(stages(&tree).len(), 1);
    }

    #[test]
    fn test_trailing_semicolon_stays_outside() {
        let tree = staged("FROM t |> LIMIT 5;\n");
        let root = tree.children(tree.root());
        let (stage, _) = stages(&tree)[0];
        assert_eq!(render_nodes(&tree, &stage_args(&tree, stage)), "5");
        assert!(tree.is_symbol(root[root.len() - 2], ";"));
    }

    #[test]
    fn test_round_trip_after_grouping() {
        let sql = "FROM logs\n|> WHERE level = 'error' -- only errors\n|> SELECT ts, msg;";
        assert_eq!(render(&staged(sql)), sql);
    }

    #[test]
    fn test_idempotent() {
        let mut tree = staged("FROM t |> WHERE a |> LIMIT 1");
        let snapshot = tree.clone();
        group_pipe_stages(&mut tree);
        assert_eq!(tree, snapshot);
    }
}
