//! Executing compiled queries against DuckDB.

mod common;

use common::seeded_pool;
use nl_query::nl2sql::executor::QueryExecutor;
use nl_query::nl2sql::format::ResultFormatter;
use nl_query::nl2sql::models::SqlQuery;
use serde_json::{json, Value};
use std::collections::HashMap;

fn query(sql: &str, params: &[(&str, Value)]) -> SqlQuery {
    SqlQuery {
        sql: sql.to_string(),
        parameters: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<HashMap<_, _>>(),
        description: "test query".to_string(),
        tables_used: vec!["failure_events".to_string()],
    }
}

#[tokio::test]
async fn binds_named_parameters() {
    let executor = QueryExecutor::new(seeded_pool());
    let result = executor
        .execute(&query(
            "SELECT \"id\" FROM \"failure_events\" WHERE \"equipment_id\" IN (:in_1, :in_2) AND \"costo_total\" > :f_3 ORDER BY \"id\" ASC LIMIT :limit",
            &[
                ("in_1", json!("EQ-1")),
                ("in_2", json!("EQ-3")),
                ("f_3", json!(2000)),
                ("limit", json!(2)),
            ],
        ))
        .await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.column_names, vec!["id"]);
    assert_eq!(result.row_count, 2);
    assert_eq!(result.data[0]["id"], json!(1));
    assert_eq!(result.data[1]["id"], json!(2));
    assert!(!result.truncated);
}

#[tokio::test]
async fn injection_payload_is_just_a_value() {
    let pool = seeded_pool();
    let executor = QueryExecutor::new(pool.clone());

    let result = executor
        .execute(&query(
            "SELECT * FROM \"failure_events\" WHERE \"descripcion_falla\" = :f_1",
            &[("f_1", json!("'; DROP TABLE failure_events; --"))],
        ))
        .await;
    assert!(result.success);
    assert_eq!(result.row_count, 0);

    let count: i64 = pool
        .get()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM failure_events", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 5);
}

#[tokio::test]
async fn cells_are_normalized() {
    let executor = QueryExecutor::new(seeded_pool());
    let result = executor
        .execute(&query(
            "SELECT \"id\", \"costo_total\", \"fecha\", \"costo_total\" > 1000 AS \"big\", CAST(\"costo_total\" AS DOUBLE) AS \"cost\", NULL AS \"nothing\" FROM \"failure_events\" WHERE \"id\" = :f_1",
            &[("f_1", json!(1))],
        ))
        .await;

    assert!(result.success, "{:?}", result.error_message);
    let row = &result.data[0];
    assert_eq!(row["id"], json!(1));
    assert_eq!(row["costo_total"], json!("15000.50"));
    assert_eq!(row["fecha"], json!("2024-01-15"));
    assert_eq!(row["big"], json!(true));
    assert_eq!(row["cost"], json!(15000.5));
    assert_eq!(row["nothing"], Value::Null);
}

#[tokio::test]
async fn integer_sums_are_numbers() {
    let pool = seeded_pool();
    pool.get()
        .unwrap()
        .execute_batch(
            "CREATE TABLE stock (qty INTEGER); INSERT INTO stock VALUES (10000), (5000), (1234);",
        )
        .unwrap();

    let result = QueryExecutor::new(pool)
        .execute(&query(
            "SELECT SUM(\"qty\") AS \"total\", COUNT(*) AS \"n\" FROM \"stock\"",
            &[],
        ))
        .await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.data[0]["total"], json!(16234));
    assert_eq!(result.data[0]["n"], json!(3));
    let text = ResultFormatter::default().format_text(&result);
    assert!(text.contains("16,234"), "{}", text);
}

#[tokio::test]
async fn date_bounds_bind_as_text() {
    let executor = QueryExecutor::new(seeded_pool());
    let result = executor
        .execute(&query(
            "SELECT COUNT(*) AS \"total\" FROM \"failure_events\" WHERE \"fecha\" >= :date_start AND \"fecha\" <= :date_end",
            &[
                ("date_start", json!("2024-02-01")),
                ("date_end", json!("2024-02-29")),
            ],
        ))
        .await;

    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.data[0]["total"], json!(2));
}

#[tokio::test]
async fn rows_beyond_the_cap_are_dropped() {
    let executor = QueryExecutor::new(seeded_pool()).with_max_rows(3);
    let result = executor
        .execute(&query("SELECT * FROM \"failure_events\"", &[]))
        .await;

    assert!(result.success);
    assert_eq!(result.row_count, 3);
    assert_eq!(result.data.len(), 3);
    assert!(result.truncated);
}

#[tokio::test]
async fn database_errors_become_failed_results() {
    let executor = QueryExecutor::new(seeded_pool());
    let result = executor
        .execute(&query("SELECT * FROM \"ghosts\"", &[]))
        .await;

    assert!(!result.success);
    assert!(result.data.is_empty());
    assert!(result.error_message.as_deref().unwrap().contains("ghosts"));
    assert!(
        ResultFormatter::default()
            .format_text(&result)
            .starts_with("Error in query: ")
    );
}

#[tokio::test]
async fn unbound_placeholder_is_a_failed_result() {
    let executor = QueryExecutor::new(seeded_pool());
    let result = executor
        .execute(&query(
            "SELECT * FROM \"failure_events\" WHERE \"id\" = :f_9",
            &[],
        ))
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("No value bound for placeholder :f_9")
    );
}
