//! Serialize a token tree back to SQL text.
//!
//! Leaves are concatenated depth-first, left to right. Untouched tokens keep
//! their original spacing; fragments inserted by rewrites carry their own.

use crate::parser::tree::{NodeId, NodeKind, Tree};

/// Render the whole statement.
pub fn render(tree: &Tree) -> String {
    render_node(tree, tree.root())
}

/// Render one subtree.
pub fn render_node(tree: &Tree, id: NodeId) -> String {
    let mut out = String::new();
    write_node(tree, id, &mut out);
    out
}

/// Render a sibling sequence.
pub fn render_nodes(tree: &Tree, nodes: &[NodeId]) -> String {
    let mut out = String::new();
    for &n in nodes {
        write_node(tree, n, &mut out);
    }
    out
}

fn write_node(tree: &Tree, id: NodeId, out: &mut String) {
    for n in tree.walk(id) {
        match tree.kind(n) {
            NodeKind::Token(t) => out.push_str(&t.text),
            NodeKind::Fragment(text) => out.push_str(text),
            _ => {}
        }
    }
}

/// Backtick-quote names that are not plain words.
pub fn quote_ident(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dialect::Dialect;
    use crate::parser::lexer::Lexer;

    #[test]
    fn test_round_trip_untouched_tree() {
        let sql = "SELECT  a,\n\tb -- trailing\nFROM \"t\" /* c */ WHERE x = 'y''z'";
        let tree = Tree::from_tokens(Lexer::new(sql, Dialect::ClickHouse)).unwrap();
        assert_eq!(render(&tree), sql);
    }

    #[test]
    fn test_fragments_are_emitted_in_place() {
        let mut tree = Tree::from_tokens(Lexer::new("a", Dialect::ClickHouse)).unwrap();
        let root = tree.root();
        let a = tree.children(root)[0];
        let before = tree.fragment("SELECT ");
        let after = tree.fragment(" FROM t");
        tree.set_children(root, vec![before, a, after]);
        assert_eq!(render(&tree), "SELECT a FROM t");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("city"), "city");
        assert_eq!(quote_ident("@timestamp"), "`@timestamp`");
        assert_eq!(quote_ident("a`b"), "`a``b`");
    }
}
