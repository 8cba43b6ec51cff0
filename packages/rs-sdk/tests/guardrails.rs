mod common;

use common::open_test_lix;
use lix_rs_sdk::LixErrorCode;

#[tokio::test]
async fn internal_tables_are_rejected_before_planning() {
    let lix = open_test_lix().await;

    for sql in [
        "SELECT * FROM lix_internal_change",
        "SELECT 1 WHERE EXISTS (SELECT 1 FROM lix_internal_state_materialized)",
        "DELETE FROM lix_internal_snapshot",
        "UPDATE lix_internal_version SET name = 'x'",
    ] {
        let err = lix
            .execute(sql, &[])
            .await
            .expect_err("internal access should be denied");
        assert_eq!(err.code, LixErrorCode::PrivateTableAccess, "sql: {sql}");
    }
}

#[tokio::test]
async fn unknown_lix_tables_are_planner_errors() {
    let lix = open_test_lix().await;
    let err = lix
        .execute("SELECT * FROM lix_not_a_view", &[])
        .await
        .expect_err("unknown view should fail");
    assert_eq!(err.code, LixErrorCode::Planner);
}

#[tokio::test]
async fn placeholder_count_mismatch_is_a_binding_error() {
    let lix = open_test_lix().await;
    let err = lix
        .execute("SELECT key FROM lix_key_value WHERE key = ?", &[])
        .await
        .expect_err("missing parameter should fail");
    assert_eq!(err.code, LixErrorCode::Binding);
}

#[tokio::test]
async fn plan_fingerprints_are_stable_for_identical_input() {
    let lix = open_test_lix().await;
    let params = vec![lix_rs_sdk::Value::Text("x".to_string())];

    let first = lix
        .engine()
        .plan_fingerprint("SELECT key FROM lix_key_value WHERE key = ?", &params)
        .await
        .expect("fingerprint");
    let second = lix
        .engine()
        .plan_fingerprint("SELECT key FROM lix_key_value WHERE key = ?", &params)
        .await
        .expect("fingerprint");
    assert_eq!(first, second);

    let different = lix
        .engine()
        .plan_fingerprint(
            "SELECT key FROM lix_key_value WHERE key = ?",
            &[lix_rs_sdk::Value::Text("y".to_string())],
        )
        .await
        .expect("fingerprint");
    assert_ne!(first, different);
}

#[tokio::test]
async fn closed_instance_rejects_further_calls() {
    let lix = open_test_lix().await;
    lix.execute("INSERT INTO lix_key_value (key, value) VALUES ('k', 'v')", &[])
        .await
        .expect("insert should succeed");

    lix.close();
    lix.close();

    let err = lix
        .execute("SELECT key FROM lix_key_value", &[])
        .await
        .expect_err("closed instance should reject queries");
    assert_eq!(err.code, LixErrorCode::Closed);

    let err = lix
        .observe(lix_rs_sdk::ObserveQuery::new("SELECT 1", vec![]))
        .map(|_| ())
        .expect_err("closed instance should reject observers");
    assert_eq!(err.code, LixErrorCode::Closed);
}

#[tokio::test]
async fn foreign_tables_pass_through_untouched() {
    let lix = open_test_lix().await;

    lix.execute(
        "CREATE TABLE app_side_table (id TEXT PRIMARY KEY, payload TEXT)",
        &[],
    )
    .await
    .expect("ddl should pass through");
    lix.execute(
        "INSERT INTO app_side_table (id, payload) VALUES ('a', 'p')",
        &[],
    )
    .await
    .expect("insert should pass through");

    let rows = lix
        .execute("SELECT payload FROM app_side_table WHERE id = 'a'", &[])
        .await
        .expect("read should pass through");
    assert_eq!(common::row_text(&rows, 0, 0), "p");
}
