mod common;

use common::{open_test_lix, row_text, VecSnapshotSink, VecSnapshotSource};

#[tokio::test]
async fn export_and_restore_preserve_query_results() {
    let source = open_test_lix().await;
    source
        .execute(
            "INSERT INTO lix_key_value (key, value) VALUES ('exported', 'yes')",
            &[],
        )
        .await
        .expect("seed insert should succeed");

    let mut sink = VecSnapshotSink::default();
    source
        .export_snapshot(&mut sink)
        .await
        .expect("export should succeed");
    assert!(!sink.bytes.is_empty(), "export should emit a database image");

    let target = open_test_lix().await;
    let mut image = VecSnapshotSource {
        bytes: Some(sink.bytes),
    };
    target
        .restore_from_snapshot(&mut image)
        .await
        .expect("restore should succeed");

    let rows = target
        .execute("SELECT value FROM lix_key_value WHERE key = 'exported'", &[])
        .await
        .expect("read after restore should succeed");
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(row_text(&rows, 0, 0), "yes");

    let history = target
        .execute(
            "SELECT count(*) FROM lix_state_history WHERE entity_id = 'exported'",
            &[],
        )
        .await
        .expect("history after restore should succeed");
    assert_eq!(common::row_integer(&history, 0, 0), 1);
}
