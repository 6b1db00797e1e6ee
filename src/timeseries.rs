//! Hourly event counts for a table over a time range.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipeConfig;
use crate::engine::{ExecError, PipeDB, Table};
use crate::error::PipeError;
use crate::pipeline::Pipeline;
use crate::transpiler::codegen::quote_ident;
use crate::transpiler::Strategy;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesRequest {
    /// The editor's current query; not used to build the series.
    #[serde(default)]
    pub query: String,
    /// Unix seconds.
    pub start_date: i64,
    pub end_date: i64,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSeriesElement {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeSeriesResponse {
    pub data: Vec<TimeSeriesElement>,
}

/// The pipe query counting rows per hour of the table's timestamp field.
pub fn build_query(config: &PipeConfig, request: &TimeSeriesRequest) -> String {
    let field = quote_ident(&config.timestamp_field(&request.table_name));
    format!(
        "FROM {table} \
         |> WHERE $between_unix({field}, {start}, {end}) \
         |> AGGREGATE count(*) AS count GROUP BY date_trunc('hour', {field}) AS date \
         |> ORDER BY date",
        table = quote_ident(&request.table_name),
        start = request.start_date,
        end = request.end_date,
    )
}

/// Build, transpile and run the series query.
pub async fn run(
    db: &PipeDB,
    pipeline: &Pipeline,
    config: &PipeConfig,
    request: &TimeSeriesRequest,
) -> Result<TimeSeriesResponse, ExecError> {
    let query = build_query(config, request);
    info!(table = %request.table_name, "time series query");
    let response = db.transpile_and_run(pipeline, &query, Strategy::Flat).await?;
    into_series(&response.table).map_err(|e| {
        ExecError::new("Failed to read time series", e, Some(response.transpiled_sql.clone()))
    })
}

/// Map `(date, count)` rows into series points.
pub fn into_series(table: &Table) -> Result<TimeSeriesResponse, PipeError> {
    let data = table
        .rows
        .iter()
        .map(|row| match row.as_slice() {
            [date, count, ..] => count
                .parse::<i64>()
                .map(|count| TimeSeriesElement {
                    date: date.clone(),
                    count,
                })
                .map_err(|_| PipeError::Query {
                    message: format!("count '{count}' is not an integer"),
                    sql: String::new(),
                }),
            _ => Err(PipeError::Query {
                message: "expected (date, count) rows".to_string(),
                sql: String::new(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TimeSeriesResponse { data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(table: &str) -> TimeSeriesRequest {
        serde_json::from_value(serde_json::json!({
            "query": "FROM x",
            "startDate": 1700000000,
            "endDate": 1700003600,
            "tableName": table,
        }))
        .unwrap()
    }

    #[test]
    fn test_build_query_uses_timestamp_field() {
        let query = build_query(&PipeConfig::default(), &request("kibana_sample_data_logs"));
        assert!(query.starts_with("FROM kibana_sample_data_logs |> WHERE $between_unix(utc_time, 1700000000, 1700003600)"));

        let query = build_query(&PipeConfig::default(), &request("other"));
        assert!(query.contains("`@timestamp`"));
    }

    #[tokio::test]
    async fn test_series_query_is_flat() {
        let pipeline = Pipeline::new(Default::default()).unwrap();
        let query = build_query(&PipeConfig::default(), &request("apache_logs"));
        let sql = pipeline.transpile_offline(&query, Strategy::Flat).await.unwrap();
        assert_eq!(
            sql,
            "SELECT date_trunc('hour', timestamp) AS date, count(*) AS count FROM apache_logs \
             WHERE timestamp BETWEEN FROM_UNIXTIME(1700000000) AND FROM_UNIXTIME(1700003600) \
             GROUP BY date_trunc('hour', timestamp) ORDER BY date"
        );
    }

    #[test]
    fn test_into_series() {
        let table = Table {
            names: vec!["date".into(), "count".into()],
            rows: vec![vec!["2023-11-14 22:00:00".into(), "17".into()]],
        };
        let series = into_series(&table).unwrap();
        assert_eq!(
            series.data,
            vec![TimeSeriesElement {
                date: "2023-11-14 22:00:00".into(),
                count: 17
            }]
        );

        let bad = Table {
            names: vec![],
            rows: vec![vec!["x".into(), "[null]".into()]],
        };
        assert_eq!(into_series(&bad).unwrap_err().kind(), "QueryError");
    }
}
