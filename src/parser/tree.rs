//! Arena-backed token tree.
//!
//! Nodes live in a `Vec` and refer to their children by [`NodeId`]. Rewrite
//! passes take `&mut Tree`, build replacement nodes, and splice them into
//! the parent's child list; nodes that fall out of the tree stay in the
//! arena unreferenced until the tree is dropped.

use std::collections::HashMap;

use crate::error::{PipeError, PipeResult};
use crate::parser::stage::Stage;
use crate::parser::token::{Token, TokenKind};

/// Index of a node in its [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Default bound on bracket nesting accepted by [`Tree::from_tokens`].
pub const MAX_NESTING: usize = 256;

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Bracket pairs grouped into composite nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Paren,
    Square,
    /// `{...}`: map literals and `{name:Type}` query parameters.
    Brace,
}

impl Bracket {
    pub fn from_open(text: &str) -> Option<Self> {
        match text {
            "(" => Some(Bracket::Paren),
            "[" => Some(Bracket::Square),
            "{" => Some(Bracket::Brace),
            _ => None,
        }
    }

    pub fn from_close(text: &str) -> Option<Self> {
        match text {
            ")" => Some(Bracket::Paren),
            "]" => Some(Bracket::Square),
            "}" => Some(Bracket::Brace),
            _ => None,
        }
    }

    pub fn open(self) -> char {
        match self {
            Bracket::Paren => '(',
            Bracket::Square => '[',
            Bracket::Brace => '{',
        }
    }

    pub fn close(self) -> char {
        match self {
            Bracket::Paren => ')',
            Bracket::Square => ']',
            Bracket::Brace => '}',
        }
    }
}

/// Structural role of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Leaf: a lexed token.
    Token(Token),
    /// Leaf: text inserted by a rewrite pass.
    Fragment(String),
    /// Root of a statement.
    Statement,
    /// Bracketed region; children include the delimiters.
    Group(Bracket),
    /// One `|>` stage.
    Stage(Stage),
    /// Expansion of a macro invocation; children are the expanded body.
    MacroCall(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<NodeId>,
}

/// Token tree for one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// An empty statement.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Statement,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    /// Build a flat statement from a token stream.
    ///
    /// Bracket balance is checked here so that unbalanced input never
    /// reaches the rewrite passes. Nesting is capped at [`MAX_NESTING`].
    pub fn from_tokens<I>(tokens: I) -> PipeResult<Self>
    where
        I: IntoIterator<Item = PipeResult<Token>>,
    {
        Self::from_tokens_with_depth(tokens, MAX_NESTING)
    }

    /// [`Tree::from_tokens`] with an explicit nesting bound.
    pub fn from_tokens_with_depth<I>(tokens: I, max_depth: usize) -> PipeResult<Self>
    where
        I: IntoIterator<Item = PipeResult<Token>>,
    {
        let mut tree = Tree::new();
        let mut open: Vec<(Bracket, usize)> = Vec::new();
        let mut children = Vec::new();

        for token in tokens {
            let token = token?;
            if token.kind == TokenKind::Punctuation {
                if let Some(b) = Bracket::from_open(&token.text) {
                    if open.len() >= max_depth {
                        return Err(PipeError::unbalanced(
                            token.offset,
                            format!("brackets nested deeper than {max_depth} levels"),
                        ));
                    }
                    open.push((b, token.offset));
                } else if let Some(b) = Bracket::from_close(&token.text) {
                    match open.pop() {
                        Some((expected, _)) if expected == b => {}
                        Some((expected, _)) => {
                            return Err(PipeError::unbalanced(
                                token.offset,
                                format!("expected '{}' but found '{}'", expected.close(), b.close()),
                            ));
                        }
                        None => {
                            return Err(PipeError::unbalanced(
                                token.offset,
                                format!("unexpected '{}'", b.close()),
                            ));
                        }
                    }
                }
            }
            children.push(tree.leaf(token));
        }

        if let Some((b, offset)) = open.pop() {
            return Err(PipeError::unbalanced(offset, format!("unclosed '{}'", b.open())));
        }

        let root = tree.root;
        tree.set_children(root, children);
        Ok(tree)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = id;
    }

    pub fn alloc(&mut self, kind: NodeKind, children: Vec<NodeId>) -> NodeId {
        self.nodes.push(Node { kind, children });
        NodeId(self.nodes.len() - 1)
    }

    pub fn leaf(&mut self, token: Token) -> NodeId {
        self.alloc(NodeKind::Token(token), Vec::new())
    }

    pub fn fragment(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Fragment(text.into()), Vec::new())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        self.nodes[id.0].children = children;
    }

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.0].kind = kind;
    }

    /// Number of nodes in the arena, reachable or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn token(&self, id: NodeId) -> Option<&Token> {
        match &self.nodes[id.0].kind {
            NodeKind::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_trivia(&self, id: NodeId) -> bool {
        self.token(id).is_some_and(Token::is_trivia)
    }

    pub fn is_keyword(&self, id: NodeId, word: &str) -> bool {
        self.token(id).is_some_and(|t| t.is_keyword(word))
    }

    pub fn is_symbol(&self, id: NodeId, symbol: &str) -> bool {
        self.token(id).is_some_and(|t| t.is_symbol(symbol))
    }

    pub fn is_group(&self, id: NodeId, bracket: Bracket) -> bool {
        matches!(self.kind(id), NodeKind::Group(b) if *b == bracket)
    }

    /// Strip leading and trailing trivia.
    pub fn trim<'s>(&self, nodes: &'s [NodeId]) -> &'s [NodeId] {
        let start = nodes.iter().position(|&n| !self.is_trivia(n)).unwrap_or(nodes.len());
        let end = nodes.iter().rposition(|&n| !self.is_trivia(n)).map_or(start, |i| i + 1);
        &nodes[start..end.max(start)]
    }

    /// Indices of the non-trivia nodes.
    pub fn significant(&self, nodes: &[NodeId]) -> Vec<usize> {
        (0..nodes.len()).filter(|&i| !self.is_trivia(nodes[i])).collect()
    }

    /// Split on top-level occurrences of `symbol`, trimming each part.
    ///
    /// Separators inside groups are already nested away, so only the given
    /// level is considered.
    pub fn split_on(&self, nodes: &[NodeId], symbol: &str) -> Vec<Vec<NodeId>> {
        let mut parts = Vec::new();
        let mut current = Vec::new();
        for &n in nodes {
            if self.is_symbol(n, symbol) {
                parts.push(self.trim(&current).to_vec());
                current.clear();
            } else {
                current.push(n);
            }
        }
        parts.push(self.trim(&current).to_vec());
        parts
    }

    /// Children of a group without its delimiters.
    pub fn group_interior(&self, id: NodeId) -> &[NodeId] {
        let children = self.children(id);
        match self.kind(id) {
            NodeKind::Group(_) if children.len() >= 2 => &children[1..children.len() - 1],
            _ => children,
        }
    }

    /// Copy a subtree, returning the new root.
    ///
    /// Post-order over an explicit stack; copies of finished children wait
    /// in `done` until their parent is allocated.
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        let mut stack = vec![(id, false)];
        let mut done: Vec<NodeId> = Vec::new();
        while let Some((n, children_done)) = stack.pop() {
            if children_done {
                let count = self.nodes[n.0].children.len();
                let copied = done.split_off(done.len() - count);
                let kind = self.nodes[n.0].kind.clone();
                done.push(self.alloc(kind, copied));
            } else {
                stack.push((n, true));
                stack.extend(self.nodes[n.0].children.iter().rev().map(|&c| (c, false)));
            }
        }
        done.pop().unwrap_or(id)
    }

    /// Reachable nodes in depth-first, left-to-right order.
    pub fn walk(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).iter().rev());
        }
        out
    }

    /// Tokens of the leaves under `id`, in order.
    pub fn tokens(&self, id: NodeId) -> Vec<&Token> {
        self.walk(id).into_iter().filter_map(|n| self.token(n)).collect()
    }

    /// Unquoted identifier names under `id`.
    pub fn identifiers(&self, id: NodeId) -> Vec<String> {
        self.tokens(id)
            .into_iter()
            .filter(|t| t.kind == TokenKind::Identifier)
            .map(|t| t.unquoted().to_string())
            .collect()
    }

    /// `base`, extended with `_` until no identifier in the statement
    /// starts with it.
    pub fn unused_prefix(&self, base: &str) -> String {
        let names = self.identifiers(self.root);
        let mut prefix = base.to_string();
        while names.iter().any(|n| n.starts_with(&prefix)) {
            prefix.push('_');
        }
        prefix
    }

    /// Nodes reachable from the root through more than one parent.
    ///
    /// Empty for a well-formed tree.
    pub fn owner_violations(&self) -> Vec<NodeId> {
        let mut seen: HashMap<NodeId, usize> = HashMap::new();
        let mut stack = vec![self.root];
        let mut shared = Vec::new();
        while let Some(n) = stack.pop() {
            let count = seen.entry(n).or_insert(0);
            *count += 1;
            if *count > 1 {
                shared.push(n);
                continue;
            }
            stack.extend(self.children(n).iter().copied());
        }
        shared
    }
}
