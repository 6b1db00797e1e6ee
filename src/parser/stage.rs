//! Pipe stage operators.

use std::fmt;

/// The operation a `|>` stage applies to its input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOp {
    Where,
    Select,
    Extend,
    Aggregate,
    OrderBy,
    Limit,
    Distinct,
    Drop,
    Rename,
    Set,
    /// `|> AS name`: names the current table.
    As,
    /// Join keywords as written, upper-cased and single-spaced (`LEFT OUTER JOIN`).
    Join(String),
    /// `|> ENRICH fn(column)`; rewritten into a join before transpilation.
    Enrich,
    /// Anything else. Carried through grouping, rejected by transpilation.
    Unknown(String),
}

impl StageOp {
    /// Recognize the operator from the leading words of a stage.
    ///
    /// Returns the operator and how many words it spans.
    pub fn recognize(words: &[String]) -> (StageOp, usize) {
        let upper: Vec<String> = words.iter().take(3).map(|w| w.to_ascii_uppercase()).collect();
        let word = |i: usize| upper.get(i).map(String::as_str);

        match (word(0), word(1), word(2)) {
            (Some("ORDER"), Some("BY"), _) => (StageOp::OrderBy, 2),
            (Some("WHERE"), _, _) => (StageOp::Where, 1),
            (Some("SELECT"), _, _) => (StageOp::Select, 1),
            (Some("EXTEND"), _, _) => (StageOp::Extend, 1),
            (Some("AGGREGATE"), _, _) => (StageOp::Aggregate, 1),
            (Some("LIMIT"), _, _) => (StageOp::Limit, 1),
            (Some("DISTINCT"), _, _) => (StageOp::Distinct, 1),
            (Some("DROP"), _, _) => (StageOp::Drop, 1),
            (Some("RENAME"), _, _) => (StageOp::Rename, 1),
            (Some("SET"), _, _) => (StageOp::Set, 1),
            (Some("AS"), _, _) => (StageOp::As, 1),
            (Some("ENRICH"), _, _) => (StageOp::Enrich, 1),
            (Some("JOIN"), _, _) => (StageOp::Join("JOIN".to_string()), 1),
            (Some(side @ ("LEFT" | "RIGHT" | "FULL")), Some("OUTER"), Some("JOIN")) => {
                (StageOp::Join(format!("{side} OUTER JOIN")), 3)
            }
            (Some(side @ ("LEFT" | "RIGHT" | "FULL" | "INNER" | "CROSS")), Some("JOIN"), _) => {
                (StageOp::Join(format!("{side} JOIN")), 2)
            }
            (Some(other), _, _) => (StageOp::Unknown(other.to_string()), 1),
            (None, _, _) => (StageOp::Unknown(String::new()), 0),
        }
    }

    /// Whether the stage must carry arguments.
    pub fn requires_args(&self) -> bool {
        !matches!(self, StageOp::Distinct)
    }
}

impl fmt::Display for StageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOp::Where => write!(f, "WHERE"),
            StageOp::Select => write!(f, "SELECT"),
            StageOp::Extend => write!(f, "EXTEND"),
            StageOp::Aggregate => write!(f, "AGGREGATE"),
            StageOp::OrderBy => write!(f, "ORDER BY"),
            StageOp::Limit => write!(f, "LIMIT"),
            StageOp::Distinct => write!(f, "DISTINCT"),
            StageOp::Drop => write!(f, "DROP"),
            StageOp::Rename => write!(f, "RENAME"),
            StageOp::Set => write!(f, "SET"),
            StageOp::As => write!(f, "AS"),
            StageOp::Join(kw) => write!(f, "{kw}"),
            StageOp::Enrich => write!(f, "ENRICH"),
            StageOp::Unknown(word) => write!(f, "{word}"),
        }
    }
}

/// A pipe stage node: its operator and where its arguments start among the
/// node's children (everything before is the `|>` token and operator words).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub op: StageOp,
    pub args_from: usize,
}
