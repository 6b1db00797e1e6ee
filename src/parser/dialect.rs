//! Dialect-specific lexical rules.

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    ClickHouse,
    Ansi,
}

/// Which words are keywords and which symbol sequences are operators.
#[derive(Debug)]
pub struct LexRules {
    /// Upper-case keywords.
    pub keywords: &'static [&'static str],
    /// Operators, longest first.
    pub operators: &'static [&'static str],
    pub punctuation: &'static [char],
    /// Characters that open and close a quoted identifier.
    pub identifier_quotes: &'static [char],
}

impl LexRules {
    pub fn is_keyword(&self, word: &str) -> bool {
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(word))
    }
}

/// Keywords shared by every dialect, including the pipe stage operators.
const COMMON_KEYWORDS: &[&str] = &[
    "AGGREGATE", "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS", "DESC", "DISTINCT",
    "DROP", "ELSE", "END", "ENRICH", "EXCEPT", "EXISTS", "EXTEND", "FALSE", "FROM", "FULL", "GROUP",
    "HAVING", "ILIKE", "IN", "INNER", "INTERVAL", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "NOT",
    "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "RENAME", "RIGHT", "SELECT", "SET", "THEN",
    "TRUE", "UNION", "USING", "WHEN", "WHERE", "WITH",
];

const CLICKHOUSE_KEYWORDS: &[&str] = &[
    "AGGREGATE", "ALL", "AND", "ANY", "ARRAY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS",
    "DESC", "DISTINCT", "DROP", "ELSE", "END", "ENRICH", "EXCEPT", "EXISTS", "EXTEND", "FALSE",
    "FINAL", "FORMAT", "FROM", "FULL", "GLOBAL", "GROUP", "HAVING", "ILIKE", "IN", "INNER",
    "INTERVAL", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET", "ON", "OR",
    "ORDER", "OUTER", "PREWHERE", "RENAME", "REPLACE", "RIGHT", "SAMPLE", "SELECT", "SET",
    "SETTINGS", "THEN", "TRUE", "UNION", "USING", "WHEN", "WHERE", "WITH",
];

const CLICKHOUSE_OPERATORS: &[&str] = &[
    "|>", "||", "<=>", "<>", "!=", "<=", ">=", "==", "->", "::", "=", "<", ">", "+", "-", "*",
    "/", "%", "?", ":",
];

const ANSI_OPERATORS: &[&str] = &[
    "|>", "||", "<>", "!=", "<=", ">=", "=", "<", ">", "+", "-", "*", "/", "%",
];

const PUNCTUATION: &[char] = &['(', ')', '[', ']', '{', '}', ',', ';', '.'];

static CLICKHOUSE_RULES: LexRules = LexRules {
    keywords: CLICKHOUSE_KEYWORDS,
    operators: CLICKHOUSE_OPERATORS,
    punctuation: PUNCTUATION,
    identifier_quotes: &['`', '"'],
};

static ANSI_RULES: LexRules = LexRules {
    keywords: COMMON_KEYWORDS,
    operators: ANSI_OPERATORS,
    punctuation: PUNCTUATION,
    identifier_quotes: &['"'],
};

impl Dialect {
    pub fn rules(&self) -> &'static LexRules {
        match self {
            Dialect::ClickHouse => &CLICKHOUSE_RULES,
            Dialect::Ansi => &ANSI_RULES,
        }
    }

    /// Parse a dialect name from configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "clickhouse" => Some(Dialect::ClickHouse),
            "ansi" | "sql" => Some(Dialect::Ansi),
            _ => None,
        }
    }
}
