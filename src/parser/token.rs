//! Lexical tokens.

use std::fmt;

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Keyword,
    /// Bare or quoted identifier (`col`, `` `@timestamp` ``, `"table"`).
    Identifier,
    /// String literal, quotes included.
    String,
    Number,
    /// `$name`: a macro invocation or placeholder.
    Parameter,
    Operator,
    Punctuation,
    Comment,
    Whitespace,
}

/// An atomic lexical unit. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset of the first character in the source text.
    pub offset: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            offset,
        }
    }

    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Case-insensitive keyword match.
    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(word)
    }

    /// Exact operator or punctuation match.
    pub fn is_symbol(&self, symbol: &str) -> bool {
        matches!(self.kind, TokenKind::Operator | TokenKind::Punctuation) && self.text == symbol
    }

    pub fn is_pipe(&self) -> bool {
        self.kind == TokenKind::Operator && self.text == "|>"
    }

    /// Name of a `$name` parameter without the sigil.
    pub fn parameter_name(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Parameter => self.text.strip_prefix('$'),
            _ => None,
        }
    }

    /// Identifier text with surrounding quotes removed.
    pub fn unquoted(&self) -> &str {
        let t = self.text.as_str();
        for q in ['`', '"'] {
            if t.len() >= 2 && t.starts_with(q) && t.ends_with(q) {
                return &t[1..t.len() - 1];
            }
        }
        t
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquoted() {
        let t = Token::new(TokenKind::Identifier, "`@timestamp`", 0);
        assert_eq!(t.unquoted(), "@timestamp");
        let t = Token::new(TokenKind::Identifier, "\"apache_logs\"", 0);
        assert_eq!(t.unquoted(), "apache_logs");
        let t = Token::new(TokenKind::Identifier, "client", 0);
        assert_eq!(t.unquoted(), "client");
    }

    #[test]
    fn test_parameter_name() {
        let t = Token::new(TokenKind::Parameter, "$start", 3);
        assert_eq!(t.parameter_name(), Some("start"));
        let t = Token::new(TokenKind::Identifier, "start", 3);
        assert_eq!(t.parameter_name(), None);
    }

    #[test]
    fn test_keyword_is_case_insensitive() {
        let t = Token::new(TokenKind::Keyword, "where", 0);
        assert!(t.is_keyword("WHERE"));
        assert!(!t.is_symbol("where"));
    }
}
