//! # pipeql: pipe-syntax SQL for analytical stores
//!
//! pipeql rewrites SQL written as a chain of `|>` stages into standard SQL
//! and runs it against ClickHouse.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pipeql::prelude::*;
//!
//! let pipeline = Pipeline::new(Dialect::ClickHouse)?;
//! let sql = pipeline
//!     .transpile_offline("FROM apache_logs |> WHERE status >= 500 |> AGGREGATE count(*) AS c", Strategy::Cte)
//!     .await?;
//! // => "WITH __pipe_1 AS (SELECT * FROM apache_logs WHERE status >= 500),
//! //     __pipe_2 AS (SELECT count(*) AS c FROM __pipe_1) SELECT * FROM __pipe_2"
//! ```
//!
//! ## Stages
//!
//! | Stage                      | Effect                               |
//! |----------------------------|--------------------------------------|
//! | `WHERE cond`               | Filter rows                          |
//! | `SELECT cols`              | Project                              |
//! | `EXTEND expr AS name`      | Add computed columns                 |
//! | `AGGREGATE aggs GROUP BY`  | Group and aggregate                  |
//! | `ORDER BY` / `LIMIT`       | Sort / truncate                      |
//! | `DISTINCT`                 | Deduplicate                          |
//! | `DROP` / `RENAME` / `SET`  | Remove, rename or replace columns    |
//! | `AS name`                  | Name the current table               |
//! | `[LEFT] JOIN t ON ...`     | Join                                 |
//! | `ENRICH ip(col) [AS p]`    | Join geolocation data                |
//! | `$macro(args)`             | Expand an allow-listed macro         |

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod preprocess;
pub mod timeseries;
pub mod transpiler;

pub mod prelude {
    pub use crate::catalog::{Catalog, StaticCatalog};
    pub use crate::config::{Limits, PipeConfig};
    pub use crate::engine::{CellValue, ExecError, ExecResponse, PipeDB, Table};
    pub use crate::error::*;
    pub use crate::parser::Dialect;
    pub use crate::pipeline::Pipeline;
    pub use crate::preprocess::strip_comments;
    pub use crate::transpiler::Strategy;
}

use engine::{ExecError, ExecResponse, PipeDB};
use error::PipeResult;
use pipeline::Pipeline;
use transpiler::Strategy;

/// Transpile `query` in the CTE form and execute it.
pub async fn transpile_and_run(
    db: &PipeDB,
    pipeline: &Pipeline,
    query: &str,
) -> Result<ExecResponse, ExecError> {
    db.transpile_and_run(pipeline, query, Strategy::Cte).await
}

/// Transpile `query` with the built-in ClickHouse pipeline and no store.
///
/// # Example
///
/// ```
/// let sql = pipeql::transpile("FROM t |> LIMIT 3").unwrap();
/// assert_eq!(sql, "WITH __pipe_1 AS (SELECT * FROM t LIMIT 3) SELECT * FROM __pipe_1");
/// ```
pub fn transpile(query: &str) -> PipeResult<String> {
    let pipeline = Pipeline::new(parser::Dialect::ClickHouse)?;
    let mut tree = pipeline.parse(query)?;
    pipeline.prepare(&mut tree)?;
    transpiler::cte::transpile(&mut tree, Strategy::Cte)?;
    Ok(transpiler::render(&tree))
}
