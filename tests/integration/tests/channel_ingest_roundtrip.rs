use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::{json, Value};
use tdrive_catalog::{CatalogEntry, CatalogStore, EntryKind, FileCategory, SqliteCatalogStore};
use tdrive_channel_ingest::{
    IngestCountersSnapshot, IngestPipeline, IngestPipelineConfig, ListenerStateStore,
    PipelineHandle, TelegramBotConfig,
};
use tdrive_core::CancellationToken;
use tempfile::tempdir;

const TOKEN: &str = "424242:integration-secret";
const CHANNEL_ID: i64 = -1_001_234_567_890;
const OWNER_ID: i64 = 9;

fn channel_post(update_id: i64, chat_id: i64, message_id: i64, document: Option<Value>) -> Value {
    let mut message = json!({
        "message_id": message_id,
        "date": 1_760_100_000,
        "chat": { "id": chat_id, "type": "channel", "title": "drops" },
    });
    match document {
        Some(document) => message["document"] = document,
        None => message["text"] = json!("just text"),
    }
    json!({ "update_id": update_id, "channel_post": message })
}

fn document(file_name: &str, mime_type: &str, size: u64) -> Value {
    json!({
        "file_id": format!("file-{file_name}"),
        "file_unique_id": format!("unique-{file_name}"),
        "file_name": file_name,
        "mime_type": mime_type,
        "file_size": size,
    })
}

fn telegram(server: &MockServer) -> TelegramBotConfig {
    let mut config = TelegramBotConfig::new(TOKEN);
    config.api_base = server.base_url();
    config.poll_timeout_seconds = 0;
    config.request_timeout = Duration::from_secs(5);
    config
}

fn pipeline_config(state_path: &Path, target_parent_id: &str) -> IngestPipelineConfig {
    let mut config = IngestPipelineConfig::new(CHANNEL_ID, OWNER_ID);
    config.state_path = Some(state_path.to_path_buf());
    config.target_parent_id = Some(target_parent_id.to_string());
    config
}

async fn wait_for_counters(
    handle: &PipelineHandle,
    predicate: impl Fn(&IngestCountersSnapshot) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !predicate(&handle.counters()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline counters should settle");
}

#[tokio::test]
async fn integration_bot_api_updates_land_in_sqlite_catalog_and_survive_restart() {
    let temp = tempdir().expect("tempdir");
    let db_path = temp.path().join("catalog.sqlite");
    let state_path = temp.path().join("listener-state.json");

    let sqlite = Arc::new(SqliteCatalogStore::new(&db_path).expect("catalog"));
    let inbox = CatalogEntry::directory("inbox", None, OWNER_ID);
    sqlite.insert(inbox.clone()).await.expect("inbox directory");
    let store: Arc<dyn CatalogStore> = sqlite.clone();

    // Resume from a previously acknowledged offset.
    ListenerStateStore::load(Some(&state_path))
        .expect("state")
        .acknowledge(1, IngestCountersSnapshot::default())
        .expect("seed offset");

    let server = MockServer::start();
    let get_me = server.mock(|when, then| {
        when.method(GET).path(format!("/bot{TOKEN}/getMe"));
        then.status(200).json_body(json!({
            "ok": true,
            "result": { "id": 424242, "is_bot": true, "first_name": "Drive", "username": "drive_bot" }
        }));
    });
    let first_batch = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/bot{TOKEN}/getUpdates"))
            .query_param("offset", "1");
        then.status(200).json_body(json!({
            "ok": true,
            "result": [
                channel_post(1, CHANNEL_ID, 100, Some(document("report.pdf", "application/pdf", 2048))),
                channel_post(2, -1_009_999_999_999, 5, Some(document("foreign.pdf", "application/pdf", 10))),
                channel_post(3, CHANNEL_ID, 101, Some(document("x.txt", "text/plain", 12))),
                channel_post(4, CHANNEL_ID, 102, Some(document("x.txt", "text/plain", 13))),
                channel_post(5, CHANNEL_ID, 103, None),
            ]
        }));
    });
    let idle = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/bot{TOKEN}/getUpdates"))
            .query_param("offset", "6");
        then.status(200).json_body(json!({ "ok": true, "result": [] }));
    });

    let cancel = CancellationToken::new();
    let handle = IngestPipeline::telegram(
        pipeline_config(&state_path, &inbox.id),
        &telegram(&server),
        Arc::clone(&store),
    )
    .expect("pipeline")
    .start(cancel.clone())
    .await
    .expect("start");
    wait_for_counters(&handle, |counters| {
        counters.entries_ingested == 3 && counters.non_document_messages == 1
    })
    .await;
    cancel.cancel();
    let report = handle.join().await.expect("join");

    get_me.assert_calls(1);
    first_batch.assert_calls(1);
    assert_eq!(report.identity.map(|identity| identity.bot_id), Some(424242));
    assert_eq!(report.counters.messages_filtered, 1);
    assert_eq!(report.counters.entries_renamed, 1);

    let entries = SqliteCatalogStore::new(&db_path)
        .expect("reopen")
        .list_entries()
        .await
        .expect("entries");
    let files: Vec<&CatalogEntry> = entries
        .iter()
        .filter(|entry| entry.kind == EntryKind::File)
        .collect();
    assert_eq!(files.len(), 3);
    assert!(files
        .iter()
        .all(|entry| entry.parent_id.as_deref() == Some(inbox.id.as_str())));
    assert!(files.iter().all(|entry| entry.owner_id == OWNER_ID));
    let report_pdf = files
        .iter()
        .find(|entry| entry.name == "report.pdf")
        .expect("report.pdf");
    assert_eq!(report_pdf.mime_type.as_deref(), Some("application/pdf"));
    assert_eq!(report_pdf.size_bytes, Some(2048));
    assert_eq!(report_pdf.category, Some(FileCategory::Document));
    assert_eq!(report_pdf.source_message_id, Some(100));
    let text_names: Vec<&str> = files
        .iter()
        .filter(|entry| entry.name.ends_with(".txt"))
        .map(|entry| entry.name.as_str())
        .collect();
    assert_eq!(text_names.len(), 2);
    assert_ne!(text_names[0], text_names[1]);

    let state = ListenerStateStore::load(Some(&state_path)).expect("state");
    assert_eq!(state.next_update_offset(), Some(6));
    assert_eq!(
        state.authorized_identity().map(|identity| identity.bot_id),
        Some(424242)
    );

    // A restart resumes after the acknowledged batch without re-authorizing.
    let idle_calls_before_restart = idle.calls();
    let restart_cancel = CancellationToken::new();
    let restarted = IngestPipeline::telegram(
        pipeline_config(&state_path, &inbox.id),
        &telegram(&server),
        store,
    )
    .expect("pipeline")
    .start(restart_cancel.clone())
    .await
    .expect("restart");
    tokio::time::timeout(Duration::from_secs(10), async {
        while idle.calls() <= idle_calls_before_restart {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("restarted pipeline polls from the stored offset");
    restart_cancel.cancel();
    let restart_report = restarted.join().await.expect("join restart");

    get_me.assert_calls(1);
    first_batch.assert_calls(1);
    assert_eq!(restart_report.counters.entries_ingested, 0);
    assert_eq!(sqlite.list_entries().await.expect("entries").len(), 4);
}
