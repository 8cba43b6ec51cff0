mod common;

use std::io::Write;

use common::{blob, mock_json_manifest, open_test_lix, row_text};
use lix_rs_sdk::PluginInstallInput;
use serde_json::json;
use zip::write::SimpleFileOptions;

fn build_plugin_archive(manifest: &str, wasm: &[u8], schemas: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default();
        writer
            .start_file("manifest.json", options)
            .expect("start manifest");
        writer
            .write_all(manifest.as_bytes())
            .expect("write manifest");
        writer
            .start_file("plugin.wasm", options)
            .expect("start wasm");
        writer.write_all(wasm).expect("write wasm");
        for (path, content) in schemas {
            writer.start_file(*path, options).expect("start schema");
            writer
                .write_all(content.as_bytes())
                .expect("write schema");
        }
        writer.finish().expect("finish archive");
    }
    cursor.into_inner()
}

#[tokio::test]
async fn reinstalling_identical_plugin_bytes_is_a_no_op() {
    let lix = open_test_lix().await;

    let first = lix
        .install_plugin(PluginInstallInput::Parts {
            manifest_json: mock_json_manifest(),
            wasm_bytes: b"plugin-bytes".to_vec(),
        })
        .await
        .expect("first install should succeed");
    assert!(first.updated);

    let second = lix
        .install_plugin(PluginInstallInput::Parts {
            manifest_json: mock_json_manifest(),
            wasm_bytes: b"plugin-bytes".to_vec(),
        })
        .await
        .expect("second install should succeed");
    assert!(!second.updated, "identical reinstall must be a no-op");

    let third = lix
        .install_plugin(PluginInstallInput::Parts {
            manifest_json: mock_json_manifest(),
            wasm_bytes: b"different-bytes".to_vec(),
        })
        .await
        .expect("changed install should succeed");
    assert!(third.updated);
}

#[tokio::test]
async fn archive_install_registers_bundled_schemas() {
    let lix = open_test_lix().await;

    let manifest = json!({
        "key": "mock_json",
        "runtime": "wasm-component-v1",
        "api_version": "0.1.0",
        "match": { "path_glob": "*.json" },
        "schemas": ["schema/json_property.json"]
    })
    .to_string();
    let schema = json!({
        "x-lix-key": "json_property",
        "x-lix-version": "1",
        "x-lix-primary-key": ["/id"],
        "type": "object",
        "properties": { "id": { "type": "string" }, "value": {} },
        "required": ["id"]
    })
    .to_string();
    let archive = build_plugin_archive(&manifest, b"wasm-bytes", &[(
        "schema/json_property.json",
        schema.as_str(),
    )]);

    let result = lix
        .install_plugin(PluginInstallInput::Archive {
            archive_bytes: archive,
        })
        .await
        .expect("archive install should succeed");
    assert!(result.updated);

    // The bundled schema is registered: direct state writes validate against it.
    lix.execute(
        "INSERT INTO lix_state (entity_id, schema_key, file_id, snapshot_content) \
         VALUES ('p1', 'json_property', 'f', ?)",
        &[common::text(&json!({ "id": "p1", "value": 1 }).to_string())],
    )
    .await
    .expect("state write against bundled schema should succeed");
}

#[tokio::test]
async fn invalid_manifest_is_rejected_with_plugin_error() {
    let lix = open_test_lix().await;

    let err = lix
        .install_plugin(PluginInstallInput::Parts {
            manifest_json: json!({
                "runtime": "wasm-component-v1",
                "api_version": "0.1.0",
                "match": { "path_glob": "*.json" }
            })
            .to_string(),
            wasm_bytes: b"x".to_vec(),
        })
        .await
        .expect_err("manifest without key should fail");
    assert_eq!(err.code, lix_rs_sdk::LixErrorCode::Plugin);
}

#[tokio::test]
async fn file_write_without_matching_plugin_fails() {
    let lix = open_test_lix().await;

    let err = lix
        .execute(
            "INSERT INTO lix_file (id, path, data) VALUES ('f', '/notes.md', ?)",
            &[blob(b"# heading")],
        )
        .await
        .expect_err("write without plugin should fail");
    assert_eq!(err.code, lix_rs_sdk::LixErrorCode::Plugin);
}

#[tokio::test]
async fn most_specific_glob_wins_for_overlapping_plugins() {
    let lix = open_test_lix().await;
    common::install_mock_json_plugin(&lix).await;

    let fallback = json!({
        "key": "fallback",
        "runtime": "wasm-component-v1",
        "api_version": "0.1.0",
        "match": { "path_glob": "*" }
    })
    .to_string();
    lix.install_plugin(PluginInstallInput::Parts {
        manifest_json: fallback,
        wasm_bytes: b"fallback".to_vec(),
    })
    .await
    .expect("fallback install should succeed");

    lix.execute(
        "INSERT INTO lix_file (id, path, data) VALUES ('f', '/cfg.json', ?)",
        &[blob(br#"{"a":1}"#)],
    )
    .await
    .expect("file insert should succeed");

    let rows = lix
        .execute(
            "SELECT plugin_key FROM lix_state WHERE file_id = 'f' AND entity_id = '/a'",
            &[],
        )
        .await
        .expect("state read should succeed");
    assert_eq!(rows.rows.len(), 1);
    assert_eq!(row_text(&rows, 0, 0), "mock_json");
}
