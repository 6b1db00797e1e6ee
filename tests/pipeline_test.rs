use pipeql::prelude::*;
use pipeql::transpiler::stages::stages;
use pretty_assertions::assert_eq;

fn pipeline() -> Pipeline {
    Pipeline::new(Dialect::ClickHouse).expect("built-in pipeline")
}

const SCENARIO: &str =
    "FROM apache_logs |> WHERE timestamp BETWEEN 1700000000 AND 1700003600 |> AGGREGATE count(*) AS c";

#[test]
fn test_scenario_has_two_stages() {
    let p = pipeline();
    let mut tree = p.parse(SCENARIO).expect("Failed to parse scenario");
    p.prepare(&mut tree).expect("Failed to prepare scenario");
    let ops: Vec<String> = stages(&tree).iter().map(|(_, s)| s.op.to_string()).collect();
    assert_eq!(ops, vec!["WHERE", "AGGREGATE"]);
}

#[tokio::test]
async fn test_scenario_cte() {
    let sql = pipeline()
        .transpile_offline(SCENARIO, Strategy::Cte)
        .await
        .expect("Failed to transpile scenario");
    assert_eq!(
        sql,
        "WITH __pipe_1 AS (SELECT * FROM apache_logs WHERE timestamp BETWEEN 1700000000 AND 1700003600), \
         __pipe_2 AS (SELECT count(*) AS c FROM __pipe_1) SELECT * FROM __pipe_2"
    );
}

#[tokio::test]
async fn test_scenario_flat() {
    let sql = pipeline()
        .transpile_offline(SCENARIO, Strategy::Flat)
        .await
        .expect("Failed to transpile scenario");
    assert_eq!(
        sql,
        "SELECT count(*) AS c FROM apache_logs WHERE timestamp BETWEEN 1700000000 AND 1700003600"
    );
}

#[tokio::test]
async fn test_unknown_macro_fails_before_execution() {
    let err = pipeline()
        .transpile_offline("FROM apache_logs |> WHERE $no_such_macro(status)", Strategy::Cte)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UnknownMacroError");
}

#[test]
fn test_unbalanced_parentheses_fail_before_stages() {
    let p = pipeline();
    let err = p
        .parse("FROM logs |> WHERE (a = 1 |> LIMIT 1")
        .and_then(|mut tree| p.prepare(&mut tree))
        .unwrap_err();
    assert!(matches!(err, PipeError::UnbalancedGrouping { offset: 19, .. }));
}

#[test]
fn test_deeply_nested_query_is_rejected() {
    let depth = 10_000;
    let query = format!("FROM t |> WHERE {}1{}", "(".repeat(depth), ")".repeat(depth));
    let err = pipeql::transpile(&query).unwrap_err();
    assert_eq!(err.kind(), "UnbalancedGroupingError");
    assert!(err.to_string().contains("nested deeper than 256"));
}

#[test]
fn test_sync_transpile() {
    let sql = pipeql::transpile("FROM logs |> WHERE $is_error(level) |> LIMIT 5").expect("transpile");
    assert_eq!(
        sql,
        "WITH __pipe_1 AS (SELECT * FROM logs WHERE level IN ('error', 'ERROR', 'fatal', 'FATAL', 'critical', 'CRITICAL')), \
         __pipe_2 AS (SELECT * FROM __pipe_1 LIMIT 5) SELECT * FROM __pipe_2"
    );
    assert_eq!(
        pipeql::transpile("FROM logs |> ENRICH ip(client_ip)").unwrap_err().kind(),
        "EnrichmentUnavailableError"
    );
}

#[tokio::test]
async fn test_enrichment_with_static_catalog() {
    let catalog = StaticCatalog::new().with_table("ip_data", ["ip", "city", "country_long"]);
    let sql = pipeline()
        .transpile(
            "FROM logs |> ENRICH ip(client_ip) AS geo |> SELECT client_ip, geo_city",
            Some(&catalog),
            Strategy::Cte,
        )
        .await
        .expect("Failed to transpile enrichment");
    assert_eq!(
        sql,
        "WITH __pipe_1 AS (SELECT * FROM logs LEFT JOIN (SELECT ip AS __key, country_long AS geo_country_long, \
         city AS geo_city FROM ip_data) AS __enrich_ip_0 ON client_ip = __enrich_ip_0.__key), \
         __pipe_2 AS (SELECT client_ip, geo_city FROM __pipe_1) SELECT * FROM __pipe_2"
    );
}

#[tokio::test]
async fn test_preprocessed_multiline_query() {
    let raw = "-- errors per host\nFROM logs\n\n|> WHERE level = 'error' -- only errors\n|> AGGREGATE count(*) AS n GROUP BY host\n|> ORDER BY n DESC\n";
    let sql = pipeline()
        .transpile_offline(&strip_comments(raw), Strategy::Flat)
        .await
        .expect("Failed to transpile multiline query");
    assert_eq!(
        sql,
        "SELECT host, count(*) AS n FROM logs WHERE level = 'error' GROUP BY host ORDER BY n DESC"
    );
}

#[tokio::test]
async fn test_editor_placeholders_as_variables() {
    let mut p = pipeline();
    p.macros_mut().register("start", vec![], "1700000000", "").unwrap();
    p.macros_mut().register("end", vec![], "1700003600", "").unwrap();
    let sql = p
        .transpile_offline(
            "FROM logs |> WHERE $between_unix(ts, $start, $end) |> LIMIT 1",
            Strategy::Flat,
        )
        .await
        .expect("Failed to transpile placeholders");
    assert_eq!(
        sql,
        "SELECT * FROM logs WHERE ts BETWEEN FROM_UNIXTIME(1700000000) AND FROM_UNIXTIME(1700003600) LIMIT 1"
    );
}
