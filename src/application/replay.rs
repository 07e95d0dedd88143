//! Replay of a JSON-lines cache event log.
//!
//! Each line is one [`DomainEvent`]. Lines that are not valid JSON are logged
//! and skipped; events that parse but are malformed reach the caches and are
//! absorbed there.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cache::{CacheConfig, Clock, DashboardCaches, DashboardSnapshot, DomainEvent, Outcome};
use crate::infra::error::InfraError;

/// Tally of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub lines: usize,
    pub applied: usize,
    pub ignored: usize,
    pub stale: usize,
    pub unreadable: usize,
}

impl ReplayReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Updated | Outcome::Removed | Outcome::Unchanged => self.applied += 1,
            Outcome::Stale => self.stale += 1,
            Outcome::Ignored => self.ignored += 1,
        }
    }
}

/// Feed every event of `reader` through `caches`.
pub async fn replay<R>(caches: &DashboardCaches, reader: R) -> std::io::Result<ReplayReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = ReplayReport::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        report.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<DomainEvent>(line) {
            Ok(event) => report.record(caches.route(event)),
            Err(err) => {
                warn!(line = report.lines, error = %err, "Skipping unreadable event line");
                report.unreadable += 1;
            }
        }
    }

    info!(
        lines = report.lines,
        applied = report.applied,
        ignored = report.ignored,
        stale = report.stale,
        unreadable = report.unreadable,
        "Replay finished"
    );
    Ok(report)
}

/// Replay the log at `path` into a fresh set of caches.
pub async fn replay_file(
    path: &Path,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
) -> Result<(ReplayReport, DashboardSnapshot), InfraError> {
    let file = File::open(path)
        .await
        .map_err(|err| InfraError::read(path, err))?;

    let caches = DashboardCaches::new(config, clock);
    info!(path = %path.display(), "Replaying cache event log");
    let report = replay(&caches, BufReader::new(file))
        .await
        .map_err(|err| InfraError::read(path, err))?;

    Ok((report, caches.snapshot()))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cache::{ManualClock, ResourceKey};

    fn caches() -> DashboardCaches {
        DashboardCaches::new(
            CacheConfig::default(),
            Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC))),
        )
    }

    #[tokio::test]
    async fn tallies_every_outcome() {
        let log = concat!(
            r#"{"type":"request_started","key":["tickets","list","0"]}"#,
            "\n",
            r#"{"type":"request_succeeded","key":["tickets","list","0"],"data":{"records":[]},"epoch":99}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"type":"request_succeeded","key":["tickets"],"data":{}}"#,
            "\n",
            r#"{"type":"request_succeeded","key":["tickets","list","0"],"data":{"records":[1]},"epoch":1}"#,
            "\n",
        );
        let caches = caches();
        let report = replay(&caches, log.as_bytes()).await.expect("replay");

        assert_eq!(
            report,
            ReplayReport {
                lines: 6,
                applied: 2,
                ignored: 1,
                stale: 1,
                unreadable: 1,
            }
        );
        assert_eq!(
            caches.resources().records(&ResourceKey::list("tickets")),
            vec![serde_json::json!(1)]
        );
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let result = replay_file(
            Path::new("/nonexistent/dashcache/events.jsonl"),
            CacheConfig::default(),
            Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC))),
        )
        .await;
        assert!(matches!(result, Err(InfraError::Read { .. })));
    }
}
