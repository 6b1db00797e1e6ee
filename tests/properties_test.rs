use pipeql::parser::{parse, Dialect, Tree};
use pipeql::prelude::*;
use pipeql::transpiler::{cte, group_parentheses, group_pipe_stages, render, stages};

fn grouped(sql: &str) -> Tree {
    let mut tree = parse(sql, Dialect::ClickHouse).expect("parse");
    group_parentheses(&mut tree).expect("group");
    tree
}

#[test]
fn test_round_trip_without_stages() {
    let inputs = [
        "SELECT a, b FROM t",
        "SELECT  count(*)\n FROM `logs`  -- trailing comment\nWHERE x IN (1, 2, [3])",
        "/* header */ SELECT 'it''s', \"quoted col\" FROM db.t WHERE y <> 0.5e3;",
    ];
    for sql in inputs {
        let mut tree = grouped(sql);
        group_pipe_stages(&mut tree);
        cte::transpile(&mut tree, Strategy::Cte).expect("transpile");
        assert_eq!(render(&tree), sql);
    }
}

#[test]
fn test_stage_count_matches_pipes() {
    for n in 1..6 {
        let mut sql = String::from("FROM t");
        for i in 0..n {
            sql.push_str(&format!(" |> WHERE f(x, {i}) > 0"));
        }
        let mut tree = grouped(&sql);
        group_pipe_stages(&mut tree);
        assert_eq!(stages::stages(&tree).len(), n);
    }
}

#[test]
fn test_grouping_twice_is_noop() {
    let mut tree = grouped("FROM t |> WHERE ((a)) AND f([b, (c)])");
    let once = tree.clone();
    group_parentheses(&mut tree).expect("regroup");
    assert_eq!(tree, once);
}

#[test]
fn test_aliases_defined_before_use() {
    let mut tree = grouped(
        "FROM t |> WHERE a > 1 |> EXTEND a * 2 AS b |> AS doubled |> AGGREGATE sum(b) AS s GROUP BY c |> ORDER BY s |> LIMIT 3",
    );
    group_pipe_stages(&mut tree);
    cte::transpile(&mut tree, Strategy::Cte).expect("transpile");
    let sql = render(&tree);

    for alias in ["__pipe_1", "doubled", "__pipe_3", "__pipe_4", "__pipe_5"] {
        let defined = sql.find(&format!("{alias} AS (")).expect("alias defined");
        let used = sql.find(&format!("FROM {alias}")).expect("alias used");
        assert!(defined < used, "{alias} used before definition in {sql}");
    }
    assert!(tree.owner_violations().is_empty());
}

#[tokio::test]
async fn test_self_referential_macro_terminates() {
    let mut pipeline = Pipeline::new(Dialect::ClickHouse).unwrap();
    pipeline.macros_mut().register("a", vec!["x".into()], "$b($x)", "").unwrap();
    pipeline.macros_mut().register("b", vec!["x".into()], "$a($x) + 1", "").unwrap();
    let err = pipeline
        .transpile_offline("FROM t |> SELECT $a(1)", Strategy::Cte)
        .await
        .unwrap_err();
    assert!(matches!(err, PipeError::MacroRecursionLimit { limit: 16, .. }));
}
