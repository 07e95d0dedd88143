use std::io::Write;
use std::sync::Arc;

use dashcache::application::replay::{ReplayReport, replay_file};
use dashcache::cache::{CacheConfig, ManualClock};
use serde_json::json;
use time::macros::datetime;

#[tokio::test]
async fn replays_a_log_file_into_a_snapshot() {
    let mut log = tempfile::NamedTempFile::new().expect("temp log file");
    for line in [
        json!({"type": "request_started", "key": ["tickets", "list", "0"]}),
        json!({"type": "request_succeeded", "key": ["tickets", "list", "0"], "data": {"records": [{"id": 1}]}}),
        json!({"type": "request_appended", "key": ["tickets", "list", "0"], "incoming": {"records": [{"id": 1}, {"id": 2}]}, "dedupKey": "id"}),
        json!({"domain": "integration", "type": "all_loaded", "data": [{"id": "jira"}]}),
        json!({"domain": "widget_graph", "type": "request_started", "key": ["throughput"]}),
        json!({"domain": "widget_graph", "type": "request_failed", "key": ["throughput"], "error": "timeout"}),
        json!({"domain": "nowhere", "type": "request_started", "key": ["x"]}),
    ] {
        writeln!(log, "{line}").expect("write log line");
    }

    let (report, snapshot) = replay_file(
        log.path(),
        CacheConfig::default(),
        Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC))),
    )
    .await
    .expect("replay succeeds");

    assert_eq!(
        report,
        ReplayReport {
            lines: 7,
            applied: 6,
            ignored: 0,
            stale: 0,
            unreadable: 1,
        }
    );

    let value = serde_json::to_value(&snapshot).expect("serialize snapshot");
    assert_eq!(
        value["resources"][0]["data"]["records"],
        json!([{"id": 1}, {"id": 2}])
    );
    assert_eq!(value["resources"][0]["loading"], json!(false));
    assert_eq!(value["integrations"]["entities"][0]["key"], json!("jira"));
    assert_eq!(
        value["integrations"]["all_loaded_at"],
        json!("2024-05-01T12:00:00Z")
    );
    assert_eq!(
        value["widget_graphs"][0],
        json!({"id": "throughput", "state": "failed", "value": "timeout"})
    );
}
