mod common;

use common::{blob, install_mock_json_plugin, open_test_lix, row_integer, row_text};
use serde_json::json;

#[tokio::test]
async fn json_property_edit_round_trips_through_state_and_file() {
    let lix = open_test_lix().await;
    install_mock_json_plugin(&lix).await;

    lix.execute(
        "INSERT INTO lix_file (id, path, data) VALUES ('f', '/s.json', ?)",
        &[blob(br#"{"theme":"light"}"#)],
    )
    .await
    .expect("file insert should succeed");

    lix.execute(
        "UPDATE lix_file SET data = ? WHERE id = 'f'",
        &[blob(br#"{"theme":"dark"}"#)],
    )
    .await
    .expect("file update should succeed");

    let state = lix
        .execute(
            "SELECT snapshot_content FROM lix_state WHERE entity_id = '/theme' AND file_id = 'f'",
            &[],
        )
        .await
        .expect("state read should succeed");
    assert_eq!(state.rows.len(), 1);
    let snapshot: serde_json::Value =
        serde_json::from_str(&row_text(&state, 0, 0)).expect("snapshot should be JSON");
    assert_eq!(snapshot, json!({ "value": "dark" }));

    let data = lix
        .execute("SELECT data FROM lix_file WHERE id = 'f'", &[])
        .await
        .expect("file read should succeed");
    assert_eq!(data.rows.len(), 1);
    let bytes = match &data.rows[0][0] {
        lix_rs_sdk::Value::Blob(bytes) => bytes.clone(),
        other => panic!("expected blob data, got {other:?}"),
    };
    let document: serde_json::Value =
        serde_json::from_slice(&bytes).expect("file bytes should be JSON");
    assert_eq!(document, json!({ "theme": "dark" }));
}

#[tokio::test]
async fn state_history_orders_snapshots_by_commit_depth() {
    let lix = open_test_lix().await;
    install_mock_json_plugin(&lix).await;

    lix.execute(
        "INSERT INTO lix_file (id, path, data) VALUES ('f', '/s.json', ?)",
        &[blob(br#"{"theme":"light"}"#)],
    )
    .await
    .expect("file insert should succeed");
    lix.execute(
        "UPDATE lix_file SET data = ? WHERE id = 'f'",
        &[blob(br#"{"theme":"dark"}"#)],
    )
    .await
    .expect("file update should succeed");

    let history = lix
        .execute(
            "SELECT snapshot_content, depth FROM lix_state_history \
             WHERE entity_id = '/theme' AND file_id = 'f' ORDER BY depth DESC",
            &[],
        )
        .await
        .expect("history read should succeed");
    assert_eq!(history.rows.len(), 2);

    let older: serde_json::Value =
        serde_json::from_str(&row_text(&history, 0, 0)).expect("older snapshot JSON");
    let newer: serde_json::Value =
        serde_json::from_str(&row_text(&history, 1, 0)).expect("newer snapshot JSON");
    assert_eq!(older, json!({ "value": "light" }));
    assert_eq!(newer, json!({ "value": "dark" }));
    assert!(row_integer(&history, 0, 1) > row_integer(&history, 1, 1));
}

#[tokio::test]
async fn file_delete_tombstones_every_entity_of_the_file() {
    let lix = open_test_lix().await;
    install_mock_json_plugin(&lix).await;

    lix.execute(
        "INSERT INTO lix_file (id, path, data) VALUES ('f', '/s.json', ?)",
        &[blob(br#"{"theme":"light"}"#)],
    )
    .await
    .expect("file insert should succeed");

    lix.execute("DELETE FROM lix_file WHERE id = 'f'", &[])
        .await
        .expect("file delete should succeed");

    let live = lix
        .execute("SELECT count(*) FROM lix_state WHERE file_id = 'f'", &[])
        .await
        .expect("state count should succeed");
    assert_eq!(row_integer(&live, 0, 0), 0);

    let tombstones = lix
        .execute(
            "SELECT count(*) FROM lix_state_with_tombstones WHERE file_id = 'f'",
            &[],
        )
        .await
        .expect("tombstone count should succeed");
    assert!(row_integer(&tombstones, 0, 0) >= 1);

    let files = lix
        .execute("SELECT id FROM lix_file WHERE id = 'f'", &[])
        .await
        .expect("file read should succeed");
    assert!(files.rows.is_empty());
}

#[tokio::test]
async fn path_rename_keeps_file_content() {
    let lix = open_test_lix().await;
    install_mock_json_plugin(&lix).await;

    lix.execute(
        "INSERT INTO lix_file (id, path, data) VALUES ('f', '/a.json', ?)",
        &[blob(br#"{"k":"v"}"#)],
    )
    .await
    .expect("file insert should succeed");

    lix.execute("UPDATE lix_file SET path = '/b.json' WHERE id = 'f'", &[])
        .await
        .expect("rename should succeed");

    let result = lix
        .execute("SELECT path, name, extension, data FROM lix_file WHERE id = 'f'", &[])
        .await
        .expect("file read should succeed");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(row_text(&result, 0, 0), "/b.json");
    assert_eq!(row_text(&result, 0, 1), "b");
    assert_eq!(row_text(&result, 0, 2), "json");
    assert!(matches!(&result.rows[0][3], lix_rs_sdk::Value::Blob(_)));
}
