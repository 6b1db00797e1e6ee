//! Store integration tests for pipeql
//!
//! Runs queries against a ClickHouse server through its MySQL interface.
//! Set `PIPEQL_DATABASE_URL` (default `mysql://default:@localhost:9004/default`).
//! Run: `cargo test --test store_integration -- --ignored`

use pipeql::prelude::*;
use pretty_assertions::assert_eq;

const DEFAULT_URL: &str = "mysql://default:@localhost:9004/default";

async fn connect() -> PipeResult<PipeDB> {
    let url = std::env::var("PIPEQL_DATABASE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    PipeDB::connect(&url, 2).await
}

fn pipeline() -> Pipeline {
    Pipeline::new(Dialect::ClickHouse).expect("built-in pipeline")
}

/// A two-stage query returns one `c` column with the count.
#[tokio::test]
#[ignore = "Requires a ClickHouse server - run with --ignored"]
async fn test_count_query() -> PipeResult<()> {
    let db = connect().await?;
    let response = pipeql::transpile_and_run(
        &db,
        &pipeline(),
        "FROM numbers(10) |> WHERE number < 7 |> AGGREGATE count(*) AS c",
    )
    .await
    .map_err(|e| e.source)?;

    assert_eq!(response.table.names, vec!["c".to_string()]);
    assert_eq!(response.table.rows, vec![vec!["7".to_string()]]);
    assert!(response.transpiled_sql.starts_with("WITH __pipe_0 AS (SELECT * FROM numbers(10))"));
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a ClickHouse server - run with --ignored"]
async fn test_flat_query() -> PipeResult<()> {
    let db = connect().await?;
    let response = db
        .transpile_and_run(
            &pipeline(),
            "FROM system.one |> SELECT dummy AS d |> LIMIT 1",
            Strategy::Flat,
        )
        .await
        .map_err(|e| e.source)?;

    assert_eq!(response.transpiled_sql, "SELECT dummy AS d FROM system.one LIMIT 1");
    assert_eq!(response.table.rows, vec![vec!["0".to_string()]]);
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a ClickHouse server - run with --ignored"]
async fn test_null_and_typed_cells() -> PipeResult<()> {
    let db = connect().await?;
    let table = db
        .execute("SELECT NULL AS n, toInt32(-3) AS i, 'GET' AS s, toDate('2024-01-02') AS d")
        .await?;

    assert_eq!(table.names, vec!["n", "i", "s", "d"]);
    assert_eq!(table.rows, vec![vec!["[null]", "-3", "GET", "2024-01-02"]]);
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a ClickHouse server - run with --ignored"]
async fn test_empty_result_keeps_column_names() -> PipeResult<()> {
    let db = connect().await?;
    let table = db
        .execute("SELECT number AS n, toString(number) AS s FROM numbers(3) WHERE number > 5")
        .await?;

    assert_eq!(table.names, vec!["n", "s"]);
    assert!(table.rows.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a ClickHouse server - run with --ignored"]
async fn test_query_error_carries_sql() -> PipeResult<()> {
    let db = connect().await?;
    let sql = "SELECT * FROM pipeql_no_such_table";
    match db.execute(sql).await {
        Err(PipeError::Query { sql: reported, .. }) => assert_eq!(reported, sql),
        other => panic!("expected a query error, got {other:?}"),
    }

    let err = pipeql::transpile_and_run(&db, &pipeline(), "FROM pipeql_no_such_table |> LIMIT 1")
        .await
        .unwrap_err();
    assert_eq!(err.message, "Failed to execute query");
    assert_eq!(err.kind(), "QueryError");
    assert_eq!(
        err.transpiled_sql.as_deref(),
        Some("WITH __pipe_1 AS (SELECT * FROM pipeql_no_such_table LIMIT 1) SELECT * FROM __pipe_1")
    );
    Ok(())
}

#[tokio::test]
#[ignore = "Requires a ClickHouse server - run with --ignored"]
async fn test_catalog_lookup() -> PipeResult<()> {
    let db = connect().await?;
    assert_eq!(db.table_columns("pipeql_no_such_table").await?, None);
    Ok(())
}
