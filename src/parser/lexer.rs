//! Pipe-syntax SQL lexer using nom.
//!
//! Every byte of the input lands in exactly one token; whitespace and
//! comments are tokens too, so the token stream concatenates back to the
//! source text.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while1},
    character::complete::{anychar, char, digit0, digit1, not_line_ending, one_of},
    combinator::{opt, recognize},
    multi::many0,
    sequence::{pair, tuple},
    IResult,
};

use crate::error::{PipeError, PipeResult};
use crate::parser::dialect::{Dialect, LexRules};
use crate::parser::token::{Token, TokenKind};

/// Lazy token stream over a SQL string.
///
/// Yields `Err` once for the first unclassifiable span and then stops.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    rules: &'static LexRules,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, dialect: Dialect) -> Self {
        Self::with_rules(input, dialect.rules())
    }

    pub fn with_rules(input: &'a str, rules: &'static LexRules) -> Self {
        Self {
            input,
            pos: 0,
            rules,
            failed: false,
        }
    }

    /// Rewind to the start of the input.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.failed = false;
    }
}

impl Iterator for Lexer<'_> {
    type Item = PipeResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.input.len() {
            return None;
        }
        let rest = &self.input[self.pos..];
        match scan(rest, self.rules) {
            Ok((kind, len)) => {
                let token = Token::new(kind, &rest[..len], self.pos);
                self.pos += len;
                Some(Ok(token))
            }
            Err(message) => {
                self.failed = true;
                Some(Err(PipeError::lex(self.pos, message)))
            }
        }
    }
}

/// Lex the whole input eagerly.
pub fn lex(input: &str, dialect: Dialect) -> PipeResult<Vec<Token>> {
    Lexer::new(input, dialect).collect()
}

/// Classify the token at the start of `rest`, returning its kind and byte length.
fn scan(rest: &str, rules: &LexRules) -> Result<(TokenKind, usize), String> {
    let consumed = |remaining: &str| rest.len() - remaining.len();

    if let Ok((r, _)) = whitespace(rest) {
        return Ok((TokenKind::Whitespace, consumed(r)));
    }
    if rest.starts_with("--") {
        let (r, _) = line_comment(rest).map_err(|_| "malformed line comment".to_string())?;
        return Ok((TokenKind::Comment, consumed(r)));
    }
    if rest.starts_with("/*") {
        let (r, _) = block_comment(rest).map_err(|_| "unterminated block comment".to_string())?;
        return Ok((TokenKind::Comment, consumed(r)));
    }

    let Some(c) = rest.chars().next() else {
        return Err("unexpected end of input".to_string());
    };

    if c == '\'' {
        let (r, _) = quoted(rest, '\'').map_err(|_| "unterminated string literal".to_string())?;
        return Ok((TokenKind::String, consumed(r)));
    }
    if rules.identifier_quotes.contains(&c) {
        let (r, _) = quoted(rest, c).map_err(|_| "unterminated quoted identifier".to_string())?;
        return Ok((TokenKind::Identifier, consumed(r)));
    }
    if c.is_ascii_digit() || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) {
        if let Ok((r, _)) = number(rest) {
            return Ok((TokenKind::Number, consumed(r)));
        }
    }
    if c == '$' {
        if let Ok((r, _)) = parameter(rest) {
            return Ok((TokenKind::Parameter, consumed(r)));
        }
    }
    if c.is_alphabetic() || c == '_' {
        let (r, w) = word(rest).map_err(|_| format!("unexpected character {c:?}"))?;
        let kind = if rules.is_keyword(w) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        return Ok((kind, consumed(r)));
    }
    if let Some(op) = rules.operators.iter().find(|op| rest.starts_with(**op)) {
        return Ok((TokenKind::Operator, op.len()));
    }
    if rules.punctuation.contains(&c) {
        return Ok((TokenKind::Punctuation, c.len_utf8()));
    }

    Err(format!("unexpected character {c:?}"))
}

fn whitespace(input: &str) -> IResult<&str, &str> {
    take_while1(char::is_whitespace)(input)
}

fn line_comment(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("--"), not_line_ending))(input)
}

fn block_comment(input: &str) -> IResult<&str, &str> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(input)
}

/// Quoted span; doubled quotes and backslash escapes stay inside.
fn quoted(input: &str, q: char) -> IResult<&str, &str> {
    recognize(tuple((
        char(q),
        many0(alt((
            recognize(pair(char('\\'), anychar)),
            recognize(pair(char(q), char(q))),
            take_while1(move |c: char| c != q && c != '\\'),
        ))),
        char(q),
    )))(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(pair(tag("0x"), take_while1(|c: char| c.is_ascii_hexdigit()))),
        recognize(pair(
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        )),
    ))(input)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(is_word_char)(input)
}

fn parameter(input: &str) -> IResult<&str, &str> {
    recognize(pair(char('$'), take_while1(is_word_char)))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<(TokenKind, String)> {
        lex(input, Dialect::ClickHouse)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_pipe_query_tokens() {
        let toks = kinds("FROM apache_logs |> WHERE status >= 500");
        assert_eq!(
            toks,
            vec![
                (TokenKind::Keyword, "FROM".to_string()),
                (TokenKind::Identifier, "apache_logs".to_string()),
                (TokenKind::Operator, "|>".to_string()),
                (TokenKind::Keyword, "WHERE".to_string()),
                (TokenKind::Identifier, "status".to_string()),
                (TokenKind::Operator, ">=".to_string()),
                (TokenKind::Number, "500".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokens_cover_input() {
        let input = "SELECT `@timestamp`, 'it''s' -- note\n/* block */ FROM \"t\" WHERE x=1.5e3;";
        let joined: String = lex(input, Dialect::ClickHouse)
            .unwrap()
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(joined, input);
    }

    #[test]
    fn test_offsets_are_contiguous() {
        let input = "FROM t\n|> LIMIT 10";
        let mut expected = 0;
        for tok in lex(input, Dialect::ClickHouse).unwrap() {
            assert_eq!(tok.offset, expected);
            expected += tok.text.len();
        }
        assert_eq!(expected, input.len());
    }

    #[test]
    fn test_comments_and_strings() {
        let toks = kinds("x = 'a -- b' -- trailing");
        assert_eq!(toks[2], (TokenKind::String, "'a -- b'".to_string()));
        assert_eq!(toks[3], (TokenKind::Comment, "-- trailing".to_string()));
    }

    #[test]
    fn test_parameters() {
        let toks = kinds("$start $is_error(level) $1");
        assert_eq!(toks[0], (TokenKind::Parameter, "$start".to_string()));
        assert_eq!(toks[1], (TokenKind::Parameter, "$is_error".to_string()));
        assert_eq!(toks[5], (TokenKind::Parameter, "$1".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = lex("WHERE msg = 'oops", Dialect::ClickHouse).unwrap_err();
        match err {
            PipeError::Lex { offset, message } => {
                assert_eq!(offset, 12);
                assert!(message.contains("unterminated string"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = lex("SELECT 1 /* never closed", Dialect::ClickHouse).unwrap_err();
        assert_eq!(err.kind(), "LexError");
    }

    #[test]
    fn test_unclassifiable_character() {
        let err = lex("SELECT #", Dialect::ClickHouse).unwrap_err();
        assert!(matches!(err, PipeError::Lex { offset: 7, .. }));
    }

    #[test]
    fn test_lexer_stops_after_error_and_restarts() {
        let mut lexer = Lexer::new("a # b", Dialect::ClickHouse);
        let first: Vec<_> = lexer.by_ref().collect();
        assert_eq!(first.len(), 3);
        assert!(first[2].is_err());
        assert!(lexer.next().is_none());

        lexer.reset();
        assert_eq!(lexer.next().unwrap().unwrap().text, "a");
    }

    #[test]
    fn test_backtick_not_identifier_quote_in_ansi() {
        let err = lex("SELECT `x`", Dialect::Ansi).unwrap_err();
        assert!(matches!(err, PipeError::Lex { .. }));
    }
}
