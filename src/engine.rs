//! Query execution against the column store.
//!
//! ClickHouse speaks the MySQL wire protocol, so the store handle is a
//! `sqlx` MySQL pool. Generated SQL is sent as plain text (no prepared
//! statements) and every row is flattened into display strings.

use std::fmt;

use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{PipeError, PipeResult};
use crate::pipeline::Pipeline;
use crate::transpiler::{codegen, Strategy};

/// Display text of a NULL cell, whatever the column type.
pub const NULL_CELL: &str = "[null]";

/// A decoded cell.
pub enum CellValue {
    Null,
    Int(i64),
    Text(String),
    /// Anything else, rendered through its `Display` impl.
    Other(Box<dyn fmt::Display + Send + Sync>),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str(NULL_CELL),
            CellValue::Int(v) => write!(f, "{v}"),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Other(v) => write!(f, "{v}"),
        }
    }
}

impl fmt::Debug for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "Null"),
            CellValue::Int(v) => write!(f, "Int({v})"),
            CellValue::Text(s) => write!(f, "Text({s:?})"),
            CellValue::Other(v) => write!(f, "Other({v})"),
        }
    }
}

impl From<Option<i64>> for CellValue {
    fn from(v: Option<i64>) -> Self {
        v.map_or(CellValue::Null, CellValue::Int)
    }
}

impl From<Option<String>> for CellValue {
    fn from(v: Option<String>) -> Self {
        v.map_or(CellValue::Null, CellValue::Text)
    }
}

/// Query result: column names and stringified rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    #[serde(rename = "Names")]
    pub names: Vec<String>,
    #[serde(rename = "Rows")]
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            rows: Vec::new(),
        }
    }

    /// Append a row, rendering each cell once.
    pub fn push_row(&mut self, cells: impl IntoIterator<Item = CellValue>) {
        self.rows.push(cells.into_iter().map(|c| c.to_string()).collect());
    }

    /// Index of the column called `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Successful response of [`PipeDB::transpile_and_run`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecResponse {
    pub table: Table,
    #[serde(rename = "transpiledSQL")]
    pub transpiled_sql: String,
}

/// A failed request: context, cause, and the SQL produced so far.
#[derive(Debug, Error)]
#[error("{message}: {source}")]
pub struct ExecError {
    pub message: String,
    pub source: PipeError,
    pub transpiled_sql: Option<String>,
}

/// JSON body reported for an [`ExecError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub message: String,
    #[serde(rename = "transpiledSQL")]
    pub transpiled_sql: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>, source: PipeError, transpiled_sql: Option<String>) -> Self {
        Self {
            message: message.into(),
            source,
            transpiled_sql,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.message.clone(),
            kind: self.kind().to_string(),
            message: self.source.to_string(),
            transpiled_sql: self.transpiled_sql.clone().unwrap_or_default(),
        }
    }
}

/// Handle to the column store.
#[derive(Clone)]
pub struct PipeDB {
    pool: MySqlPool,
}

impl PipeDB {
    /// Connect using a `mysql://` URL pointing at the store's MySQL interface.
    ///
    /// ```rust,ignore
    /// let db = PipeDB::connect("mysql://default:@localhost:9004/default", 5).await?;
    /// ```
    pub async fn connect(url: &str, max_connections: u32) -> PipeResult<Self> {
        let options = url
            .parse::<MySqlConnectOptions>()
            .map_err(|e| PipeError::Connection(e.to_string()))?;
        Self::connect_with(options, max_connections).await
    }

    pub async fn connect_with(options: MySqlConnectOptions, max_connections: u32) -> PipeResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| PipeError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Run `sql` and collect the whole result.
    ///
    /// Column names come from the first row. The text protocol reports no
    /// columns for an empty result, so those are described separately.
    pub async fn execute(&self, sql: &str) -> PipeResult<Table> {
        let rows = self.fetch(sql).await?;

        let names = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self.describe_columns(sql).await.unwrap_or_else(|e| {
                warn!(error = %e, "could not describe empty result");
                Vec::new()
            }),
        };
        let mut table = Table::new(names);
        for row in &rows {
            table.push_row((0..row.len()).map(|i| decode_cell(row, i)));
        }
        debug!(rows = table.rows.len(), "query finished");
        Ok(table)
    }

    async fn fetch(&self, sql: &str) -> PipeResult<Vec<MySqlRow>> {
        (&self.pool).fetch_all(sql).await.map_err(|e| PipeError::Query {
            message: e.to_string(),
            sql: sql.to_string(),
        })
    }

    /// Result column names of `sql` in positional order, without running it.
    pub async fn describe_columns(&self, sql: &str) -> PipeResult<Vec<String>> {
        let rows = self.fetch(&describe_query(sql)).await?;
        Ok(rows.iter().map(|r| decode_cell(r, 0).to_string()).collect())
    }

    /// Transpile `query` and run the result.
    pub async fn transpile_and_run(
        &self,
        pipeline: &Pipeline,
        query: &str,
        strategy: Strategy,
    ) -> Result<ExecResponse, ExecError> {
        info!(query = %query, "received query");

        let mut tree = pipeline
            .parse(query)
            .map_err(|e| ExecError::new("Failed to parse query", e, None))?;
        if let Err(e) = pipeline.rewrite(&mut tree, Some(self), strategy).await {
            let partial = codegen::render(&tree);
            return Err(ExecError::new("Failed to transpile query", e, Some(partial)));
        }
        let sql = codegen::render(&tree);
        info!(sql = %sql, "transpiled query");

        let table = self
            .execute(&sql)
            .await
            .map_err(|e| ExecError::new("Failed to execute query", e, Some(sql.clone())))?;
        info!(columns = ?table.names, rows = table.rows.len(), "query returned");

        Ok(ExecResponse {
            table,
            transpiled_sql: sql,
        })
    }
}

impl Catalog for PipeDB {
    async fn table_columns(&self, table: &str) -> PipeResult<Option<Vec<String>>> {
        let sql = format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = currentDatabase() AND table_name = '{}' \
             ORDER BY ordinal_position",
            escape_literal(table)
        );
        let rows = self.fetch(&sql).await?;
        let columns: Vec<String> = rows.iter().map(|r| decode_cell(r, 0).to_string()).collect();
        debug!(table, columns = columns.len(), "catalog lookup");
        Ok(if columns.is_empty() { None } else { Some(columns) })
    }
}

/// `DESCRIBE` over `sql` as a subquery; the newline keeps a trailing line
/// comment from swallowing the closing parenthesis.
fn describe_query(sql: &str) -> String {
    let body = sql.trim().trim_end_matches(';').trim_end();
    format!("DESCRIBE TABLE ({body}\n)")
}

/// Escape a value for a single-quoted SQL string.
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Decode one cell by its reported type, falling back to text.
fn decode_cell(row: &MySqlRow, i: usize) -> CellValue {
    match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return CellValue::Null,
        Ok(_) => {}
        Err(e) => return CellValue::Other(Box::new(e.to_string())),
    }

    let type_name = row.columns()[i].type_info().name();
    let decoded = match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(i).map(CellValue::Int).ok()
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<u64, _>(i).ok().map(|v| match i64::try_from(v) {
            Ok(v) => CellValue::Int(v),
            Err(_) => CellValue::Other(Box::new(v)),
        }),
        "FLOAT" | "DOUBLE" => row
            .try_get::<f64, _>(i)
            .ok()
            .map(|v| CellValue::Other(Box::new(v))),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(i)
            .ok()
            .map(|v| CellValue::Other(Box::new(v))),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(i)
            .ok()
            .map(|v| CellValue::Other(Box::new(v))),
        _ => None,
    };
    decoded.unwrap_or_else(|| decode_text(row, i))
}

fn decode_text(row: &MySqlRow, i: usize) -> CellValue {
    if let Ok(s) = row.try_get_unchecked::<String, _>(i) {
        return CellValue::Text(s);
    }
    match row.try_get_unchecked::<Vec<u8>, _>(i) {
        Ok(bytes) => CellValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => CellValue::Other(Box::new(format!("<{e}>"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_display() {
        assert_eq!(CellValue::Null.to_string(), "[null]");
        assert_eq!(CellValue::Int(-3).to_string(), "-3");
        assert_eq!(CellValue::Text("GET".into()).to_string(), "GET");
        assert_eq!(CellValue::Other(Box::new(1.5f64)).to_string(), "1.5");
        assert_eq!(CellValue::from(None::<i64>).to_string(), NULL_CELL);
    }

    #[test]
    fn test_table_serializes_like_the_api() {
        let mut table = Table::new(vec!["c".to_string()]);
        table.push_row([CellValue::Int(42)]);
        let response = ExecResponse {
            table,
            transpiled_sql: "SELECT 42 AS c".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "table": { "Names": ["c"], "Rows": [["42"]] },
                "transpiledSQL": "SELECT 42 AS c"
            })
        );
    }

    #[test]
    fn test_error_response() {
        let err = ExecError::new(
            "Failed to transpile query",
            PipeError::UnknownMacro("nope".to_string()),
            Some("FROM t |> WHERE $nope".to_string()),
        );
        let body = serde_json::to_value(err.to_response()).unwrap();
        assert_eq!(body["error"], "Failed to transpile query");
        assert_eq!(body["kind"], "UnknownMacroError");
        assert_eq!(body["message"], "Unknown macro: '$nope'");
        assert_eq!(body["transpiledSQL"], "FROM t |> WHERE $nope");
    }

    #[test]
    fn test_describe_query() {
        assert_eq!(describe_query("SELECT 1 AS c;\n"), "DESCRIBE TABLE (SELECT 1 AS c\n)");
        assert_eq!(
            describe_query("SELECT a FROM t -- note"),
            "DESCRIBE TABLE (SELECT a FROM t -- note\n)"
        );
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("it's"), "it\\'s");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = PipeDB::connect("not a url", 1).await.err().unwrap();
        assert_eq!(err.kind(), "ConnectionError");
    }
}
