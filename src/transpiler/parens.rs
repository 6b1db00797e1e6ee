//! Pass 1: collapse matched brackets into group nodes.

use std::mem;

use tracing::debug;

use crate::error::{PipeError, PipeResult};
use crate::parser::token::TokenKind;
use crate::parser::tree::{Bracket, NodeId, NodeKind, Tree};

/// Group every bracket pair in the tree.
///
/// Idempotent: the delimiters of an existing group are never re-scanned, so
/// a second run finds no loose brackets.
pub fn group_parentheses(tree: &mut Tree) -> PipeResult<NodeId> {
    let root = tree.root();
    group_node(tree, root)?;
    debug!(nodes = tree.len(), "grouped parentheses");
    Ok(root)
}

fn group_node(tree: &mut Tree, id: NodeId) -> PipeResult<()> {
    let mut pending = vec![id];
    while let Some(id) = pending.pop() {
        let children = tree.children(id).to_vec();
        if children.is_empty() {
            continue;
        }

        let grouped = match tree.kind(id) {
            NodeKind::Group(_) if children.len() >= 2 => {
                let last = children.len() - 1;
                let mut inner = group_sequence(tree, children[1..last].to_vec())?;
                inner.insert(0, children[0]);
                inner.push(children[last]);
                inner
            }
            _ => group_sequence(tree, children)?,
        };

        pending.extend(grouped.iter().copied());
        tree.set_children(id, grouped);
    }
    Ok(())
}

/// Group loose bracket tokens in a sibling sequence.
pub fn group_sequence(tree: &mut Tree, nodes: Vec<NodeId>) -> PipeResult<Vec<NodeId>> {
    let mut stack: Vec<(Bracket, usize, Vec<NodeId>)> = Vec::new();
    let mut current = Vec::with_capacity(nodes.len());

    for n in nodes {
        let (open, close, offset) = match tree.token(n) {
            Some(t) if t.kind == TokenKind::Punctuation => {
                (Bracket::from_open(&t.text), Bracket::from_close(&t.text), t.offset)
            }
            _ => (None, None, 0),
        };

        if let Some(b) = open {
            stack.push((b, offset, mem::take(&mut current)));
            current.push(n);
        } else if let Some(b) = close {
            match stack.pop() {
                Some((expected, _, outer)) if expected == b => {
                    current.push(n);
                    let members = mem::replace(&mut current, outer);
                    let group = tree.alloc(NodeKind::Group(b), members);
                    current.push(group);
                }
                Some((expected, _, _)) => {
                    return Err(PipeError::unbalanced(
                        offset,
                        format!("expected '{}' but found '{}'", expected.close(), b.close()),
                    ));
                }
                None => {
                    return Err(PipeError::unbalanced(offset, format!("unexpected '{}'", b.close())));
                }
            }
        } else {
            current.push(n);
        }
    }

    if let Some((b, offset, _)) = stack.pop() {
        return Err(PipeError::unbalanced(offset, format!("unclosed '{}'", b.open())));
    }
    Ok(current)
}
