mod common;

use common::{open_test_lix, row_integer, row_text, text};
use lix_rs_sdk::{CreateVersionArgs, Value};
use serde_json::json;

#[tokio::test]
async fn key_value_insert_select_update_delete() {
    let lix = open_test_lix().await;

    lix.execute(
        "INSERT INTO lix_key_value (key, value) VALUES (?, ?)",
        &[text("theme"), text("light")],
    )
    .await
    .expect("insert should succeed");

    let rows = lix
        .execute("SELECT key, value FROM lix_key_value WHERE key = 'theme'", &[])
        .await
        .expect("select should succeed");
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(row_text(&rows, 0, 0), "theme");
    assert_eq!(row_text(&rows, 0, 1), "light");

    lix.execute(
        "UPDATE lix_key_value SET value = 'dark' WHERE key = 'theme'",
        &[],
    )
    .await
    .expect("update should succeed");
    let rows = lix
        .execute("SELECT value FROM lix_key_value WHERE key = 'theme'", &[])
        .await
        .expect("select should succeed");
    assert_eq!(row_text(&rows, 0, 0), "dark");

    lix.execute("DELETE FROM lix_key_value WHERE key = 'theme'", &[])
        .await
        .expect("delete should succeed");
    let rows = lix
        .execute("SELECT key FROM lix_key_value WHERE key = 'theme'", &[])
        .await
        .expect("select should succeed");
    assert!(rows.rows.is_empty());
}

#[tokio::test]
async fn state_rows_expose_canonical_columns() {
    let lix = open_test_lix().await;

    lix.execute(
        "INSERT INTO lix_key_value (key, value) VALUES ('k', 'v')",
        &[],
    )
    .await
    .expect("insert should succeed");

    let rows = lix
        .execute(
            "SELECT entity_id, schema_key, file_id, version_id, snapshot_content \
             FROM lix_state WHERE schema_key = 'lix_key_value' AND entity_id = 'k'",
            &[],
        )
        .await
        .expect("state read should succeed");
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(row_text(&rows, 0, 0), "k");
    assert_eq!(row_text(&rows, 0, 1), "lix_key_value");
    assert_eq!(row_text(&rows, 0, 2), "lix");
    assert_eq!(row_text(&rows, 0, 3), "main");
    let snapshot: serde_json::Value =
        serde_json::from_str(&row_text(&rows, 0, 4)).expect("snapshot JSON");
    assert_eq!(snapshot, json!({ "key": "k", "value": "v" }));
}

#[tokio::test]
async fn stored_schema_registration_enables_state_writes() {
    let lix = open_test_lix().await;

    let schema = json!({
        "x-lix-key": "demo_note",
        "x-lix-version": "1",
        "x-lix-primary-key": ["/id"],
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "body": { "type": "string" }
        },
        "required": ["id"]
    })
    .to_string();
    lix.execute(
        "INSERT INTO lix_stored_schema (key, version, value) VALUES ('demo_note', '1', ?)",
        &[text(&schema)],
    )
    .await
    .expect("schema registration should succeed");

    lix.execute(
        "INSERT INTO lix_state (entity_id, schema_key, file_id, snapshot_content) \
         VALUES ('n1', 'demo_note', 'notes', ?)",
        &[text(&json!({ "id": "n1", "body": "hello" }).to_string())],
    )
    .await
    .expect("state insert should succeed");

    let rows = lix
        .execute(
            "SELECT snapshot_content FROM lix_state WHERE schema_key = 'demo_note'",
            &[],
        )
        .await
        .expect("state read should succeed");
    assert_eq!(rows.rows.len(), 1);
}

#[tokio::test]
async fn state_insert_with_unregistered_schema_is_rejected() {
    let lix = open_test_lix().await;

    let err = lix
        .execute(
            "INSERT INTO lix_state (entity_id, schema_key, file_id, snapshot_content) \
             VALUES ('e', 'nope', 'f', '{}')",
            &[],
        )
        .await
        .expect_err("unregistered schema should fail");
    assert_eq!(err.code, lix_rs_sdk::LixErrorCode::Planner);
}

#[tokio::test]
async fn snapshot_validation_rejects_mismatching_content() {
    let lix = open_test_lix().await;

    let schema = json!({
        "x-lix-key": "demo_strict",
        "x-lix-version": "1",
        "x-lix-primary-key": ["/id"],
        "type": "object",
        "properties": { "id": { "type": "string" } },
        "required": ["id"],
        "additionalProperties": false
    })
    .to_string();
    lix.execute(
        "INSERT INTO lix_stored_schema (key, version, value) VALUES ('demo_strict', '1', ?)",
        &[text(&schema)],
    )
    .await
    .expect("schema registration should succeed");

    let err = lix
        .execute(
            "INSERT INTO lix_state (entity_id, schema_key, file_id, snapshot_content) \
             VALUES ('e', 'demo_strict', 'f', ?)",
            &[text(&json!({ "id": "e", "extra": true }).to_string())],
        )
        .await
        .expect_err("schema violation should fail");
    assert_eq!(err.code, lix_rs_sdk::LixErrorCode::Planner);
}

#[tokio::test]
async fn child_version_inherits_entities_from_its_parent() {
    let lix = open_test_lix().await;

    lix.execute(
        "INSERT INTO lix_key_value (key, value) VALUES ('inherited', 'yes')",
        &[],
    )
    .await
    .expect("insert should succeed");

    lix.create_version(CreateVersionArgs {
        id: Some("child".to_string()),
        name: None,
        inherits_from_version_id: Some("main".to_string()),
        hidden: false,
    })
    .await
    .expect("create_version should succeed");

    let rows = lix
        .execute(
            "SELECT entity_id, inherited_from_version_id FROM lix_state_by_version \
             WHERE version_id = 'child' AND schema_key = 'lix_key_value' \
               AND entity_id = 'inherited'",
            &[],
        )
        .await
        .expect("by-version read should succeed");
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(row_text(&rows, 0, 1), "main");
}

#[tokio::test]
async fn child_overwrite_shadows_the_inherited_row() {
    let lix = open_test_lix().await;

    lix.execute(
        "INSERT INTO lix_key_value (key, value) VALUES ('k', 'parent')",
        &[],
    )
    .await
    .expect("insert should succeed");
    lix.create_version(CreateVersionArgs {
        id: Some("child".to_string()),
        name: None,
        inherits_from_version_id: Some("main".to_string()),
        hidden: false,
    })
    .await
    .expect("create_version should succeed");
    lix.switch_version("child").await.expect("switch");

    lix.execute(
        "INSERT INTO lix_key_value (key, value) VALUES ('k', 'child')",
        &[],
    )
    .await
    .expect("child insert should succeed");

    let child_rows = lix
        .execute("SELECT value FROM lix_key_value WHERE key = 'k'", &[])
        .await
        .expect("child read should succeed");
    assert_eq!(row_text(&child_rows, 0, 0), "child");

    lix.switch_version("main").await.expect("switch back");
    let parent_rows = lix
        .execute("SELECT value FROM lix_key_value WHERE key = 'k'", &[])
        .await
        .expect("parent read should succeed");
    assert_eq!(row_text(&parent_rows, 0, 0), "parent");
}

#[tokio::test]
async fn entity_views_resolve_inside_subqueries() {
    let lix = open_test_lix().await;

    lix.execute(
        "INSERT INTO lix_key_value (key, value) VALUES ('a', '1'), ('b', '2')",
        &[],
    )
    .await
    .expect("insert should succeed");

    let rows = lix
        .execute(
            "SELECT count(*) FROM lix_key_value \
             WHERE key IN (SELECT key FROM lix_key_value WHERE value = '1')",
            &[],
        )
        .await
        .expect("nested read should succeed");
    assert_eq!(row_integer(&rows, 0, 0), 1);
}

#[tokio::test]
async fn multi_row_insert_resolves_placeholders_once_per_script() {
    let lix = open_test_lix().await;

    lix.execute(
        "INSERT INTO lix_key_value (key, value) VALUES (?, ?); \
         INSERT INTO lix_key_value (key, value) VALUES (?, ?)",
        &[
            text("first"),
            text("1"),
            text("second"),
            Value::Integer(2),
        ],
    )
    .await
    .expect("script should succeed");

    let rows = lix
        .execute(
            "SELECT key FROM lix_key_value WHERE key IN ('first', 'second') ORDER BY key",
            &[],
        )
        .await
        .expect("read should succeed");
    assert_eq!(rows.rows.len(), 2);
    assert_eq!(row_text(&rows, 0, 0), "first");
    assert_eq!(row_text(&rows, 1, 0), "second");
}
