#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use skill_feedback_core::{FeedbackSnapshot, TranscriptExtraction};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use ulid::Ulid;

const FEEDBACK_MIGRATION_VERSION: i64 = 1;

const SCHEMA_FEEDBACK_V1: &str = r"
CREATE TABLE IF NOT EXISTS feedback_records (
  feedback_seq INTEGER PRIMARY KEY AUTOINCREMENT,
  feedback_id TEXT NOT NULL UNIQUE,
  source TEXT NOT NULL,
  variant TEXT NOT NULL CHECK (variant IN ('trace', 'extract')),
  recorded_at TEXT NOT NULL,
  triage_status TEXT NOT NULL DEFAULT 'open' CHECK (
    triage_status IN ('open', 'accepted', 'applied', 'dismissed')
  ),
  triaged_at TEXT,
  extraction_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_records_status_seq
  ON feedback_records(triage_status, feedback_seq);
";

const SELECT_RECORD_COLUMNS: &str = "SELECT
    feedback_id, source, recorded_at, triage_status, triaged_at, extraction_json
 FROM feedback_records";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TriageStatus {
    Open,
    Accepted,
    Applied,
    Dismissed,
}

impl TriageStatus {
    pub const ALL: [Self; 4] = [Self::Open, Self::Accepted, Self::Applied, Self::Dismissed];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Accepted => "accepted",
            Self::Applied => "applied",
            Self::Dismissed => "dismissed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "accepted" => Some(Self::Accepted),
            "applied" => Some(Self::Applied),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRecord {
    pub feedback_id: Ulid,
    pub source: String,
    pub recorded_at: String,
    pub triage_status: TriageStatus,
    pub triaged_at: Option<String>,
    pub extraction: TranscriptExtraction,
}

/// Listing view of a record without the detail lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSummary {
    pub feedback_id: Ulid,
    pub source: String,
    pub recorded_at: String,
    pub triage_status: TriageStatus,
    pub variant: String,
    pub error_count: usize,
    pub correction_count: usize,
    pub backtrack_count: usize,
    pub top_target: Option<String>,
}

impl FeedbackRecord {
    #[must_use]
    pub fn summary(&self) -> FeedbackSummary {
        let metrics = &self.extraction.metrics;
        FeedbackSummary {
            feedback_id: self.feedback_id,
            source: self.source.clone(),
            recorded_at: self.recorded_at.clone(),
            triage_status: self.triage_status,
            variant: self.extraction.variant.as_str().to_string(),
            error_count: metrics.error_count,
            correction_count: metrics.correction_count,
            backtrack_count: metrics.backtrack_count,
            top_target: self
                .extraction
                .improvement_targets
                .as_ref()
                .and_then(|targets| targets.first())
                .map(|entry| entry.target.to_string()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> FeedbackSnapshot {
        FeedbackSnapshot::from_extraction(self.feedback_id.to_string(), &self.extraction)
    }
}

struct StoredRow {
    feedback_id: String,
    source: String,
    recorded_at: String,
    triage_status: String,
    triaged_at: Option<String>,
    extraction_json: String,
}

impl StoredRow {
    fn decode(self) -> Result<FeedbackRecord> {
        let feedback_id = Ulid::from_string(&self.feedback_id)
            .with_context(|| format!("invalid ULID feedback_id: {}", self.feedback_id))?;
        let triage_status = TriageStatus::parse(&self.triage_status)
            .ok_or_else(|| anyhow!("invalid triage_status: {}", self.triage_status))?;
        let extraction = serde_json::from_str(&self.extraction_json)
            .with_context(|| format!("failed to decode extraction_json for {feedback_id}"))?;

        Ok(FeedbackRecord {
            feedback_id,
            source: self.source,
            recorded_at: self.recorded_at,
            triage_status,
            triaged_at: self.triaged_at,
            extraction,
        })
    }
}

pub struct SqliteFeedbackStore {
    conn: Connection,
}

impl SqliteFeedbackStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_FEEDBACK_V1)
            .context("failed to apply feedback schema")?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![FEEDBACK_MIGRATION_VERSION, now_rfc3339()?],
            )
            .context("failed to register feedback schema migration")?;

        Ok(())
    }

    /// Stores one extraction as a new `open` feedback record.
    pub fn record_extraction(
        &self,
        source: &str,
        extraction: &TranscriptExtraction,
    ) -> Result<FeedbackRecord> {
        let feedback_id = Ulid::new();
        let recorded_at = now_rfc3339()?;
        let extraction_json =
            serde_json::to_string(extraction).context("failed to serialize extraction")?;

        self.conn
            .execute(
                "INSERT INTO feedback_records(
                    feedback_id, source, variant, recorded_at, triage_status, extraction_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    feedback_id.to_string(),
                    source,
                    extraction.variant.as_str(),
                    recorded_at,
                    TriageStatus::Open.as_str(),
                    extraction_json,
                ],
            )
            .context("failed to insert feedback record")?;

        info!(%feedback_id, source, "recorded feedback");

        Ok(FeedbackRecord {
            feedback_id,
            source: source.to_string(),
            recorded_at,
            triage_status: TriageStatus::Open,
            triaged_at: None,
            extraction: extraction.clone(),
        })
    }

    pub fn get(&self, feedback_id: Ulid) -> Result<Option<FeedbackRecord>> {
        let query = format!("{SELECT_RECORD_COLUMNS} WHERE feedback_id = ?1");
        let row = self
            .conn
            .query_row(&query, params![feedback_id.to_string()], parse_stored_row)
            .optional()
            .with_context(|| format!("failed to load feedback {feedback_id}"))?;

        row.map(StoredRow::decode).transpose()
    }

    /// Records in insertion order. Rows that no longer decode are skipped
    /// with a warning.
    pub fn list(
        &self,
        status: Option<TriageStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<FeedbackRecord>> {
        let mut query = SELECT_RECORD_COLUMNS.to_string();
        if status.is_some() {
            query.push_str(" WHERE triage_status = ?1");
        }
        query.push_str(" ORDER BY feedback_seq ASC");
        if let Some(raw_limit) = limit {
            query.push_str(" LIMIT ");
            query.push_str(&raw_limit.to_string());
        }

        let mut stmt = self.conn.prepare(&query)?;
        let rows = match status {
            Some(status) => stmt.query_map(params![status.as_str()], parse_stored_row)?,
            None => stmt.query_map([], parse_stored_row)?,
        };

        let mut records = Vec::new();
        for row in collect_rows(rows)? {
            let feedback_id = row.feedback_id.clone();
            match row.decode() {
                Ok(record) => records.push(record),
                Err(err) => warn!(%feedback_id, error = %format!("{err:#}"), "skipping undecodable feedback row"),
            }
        }
        Ok(records)
    }

    pub fn set_triage_status(
        &self,
        feedback_id: Ulid,
        status: TriageStatus,
    ) -> Result<FeedbackRecord> {
        let changed = self
            .conn
            .execute(
                "UPDATE feedback_records SET triage_status = ?1, triaged_at = ?2 WHERE feedback_id = ?3",
                params![status.as_str(), now_rfc3339()?, feedback_id.to_string()],
            )
            .context("failed to update triage status")?;

        if changed == 0 {
            return Err(anyhow!("unknown feedback id {feedback_id}"));
        }
        debug!(%feedback_id, status = status.as_str(), "updated triage status");

        self.get(feedback_id)?
            .ok_or_else(|| anyhow!("feedback {feedback_id} vanished after update"))
    }

    /// Snapshots of every decodable record with `status`, for the report
    /// stage.
    pub fn load_snapshots(&self, status: TriageStatus) -> Result<Vec<FeedbackSnapshot>> {
        Ok(self
            .list(Some(status), None)?
            .iter()
            .map(FeedbackRecord::snapshot)
            .collect())
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn parse_stored_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        feedback_id: row.get(0)?,
        source: row.get(1)?,
        recorded_at: row.get(2)?,
        triage_status: row.get(3)?,
        triaged_at: row.get(4)?,
        extraction_json: row.get(5)?,
    })
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use skill_feedback_core::{scan_lines, CorrectionDetector, KeywordCatalog, TargetLinker};

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    fn must_some<T>(value: Option<T>) -> T {
        match value {
            Some(inner) => inner,
            None => panic!("expected Some(..), got None"),
        }
    }

    fn fixture_store() -> SqliteFeedbackStore {
        let store = must(SqliteFeedbackStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    fn fixture_extraction() -> TranscriptExtraction {
        let detector = must(CorrectionDetector::new().map_err(anyhow::Error::from));
        let linker = TargetLinker::new(KeywordCatalog::builtin());
        let lines = [
            json!({"type": "assistant", "message": {"content": [
                {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "git push"}}
            ]}})
            .to_string(),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "t1", "is_error": true, "content": "rejected: git push"}
            ]}})
            .to_string(),
            json!({"type": "user", "message": {"content": "I said to rebase first"}}).to_string(),
        ];
        must(
            scan_lines(lines.iter().map(String::as_str), &detector, Some(&linker))
                .map_err(anyhow::Error::from),
        )
    }

    #[test]
    fn recorded_extraction_round_trips_through_get() {
        let store = fixture_store();
        let extraction = fixture_extraction();
        let recorded = must(store.record_extraction("session-1.jsonl", &extraction));

        assert_eq!(recorded.triage_status, TriageStatus::Open);
        let loaded = must_some(must(store.get(recorded.feedback_id)));
        assert_eq!(loaded, recorded);

        let summary = loaded.summary();
        assert_eq!(summary.variant, "extract");
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.correction_count, 1);
        assert_eq!(
            summary.top_target.as_deref(),
            Some("claude_md:RULES.md### Git Workflow")
        );
    }

    #[test]
    fn unknown_feedback_id_is_none_or_error() {
        let store = fixture_store();
        assert!(must(store.get(Ulid::new())).is_none());
        assert!(store
            .set_triage_status(Ulid::new(), TriageStatus::Accepted)
            .is_err());
    }

    #[test]
    fn triage_changes_which_snapshots_load() {
        let store = fixture_store();
        let extraction = fixture_extraction();
        let first = must(store.record_extraction("a.jsonl", &extraction));
        let second = must(store.record_extraction("b.jsonl", &extraction));

        let updated = must(store.set_triage_status(first.feedback_id, TriageStatus::Dismissed));
        assert_eq!(updated.triage_status, TriageStatus::Dismissed);
        assert!(updated.triaged_at.is_some());

        let open = must(store.load_snapshots(TriageStatus::Open));
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].feedback_id, second.feedback_id.to_string());
        assert!(!open[0].improvement_targets.is_empty());

        let dismissed = must(store.list(Some(TriageStatus::Dismissed), None));
        assert_eq!(dismissed.len(), 1);
        assert_eq!(must(store.list(None, None)).len(), 2);
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let store = fixture_store();
        let good = must(store.record_extraction("good.jsonl", &fixture_extraction()));

        let insert = store.connection().execute(
            "INSERT INTO feedback_records(feedback_id, source, variant, recorded_at, extraction_json)
             VALUES (?1, 'bad.jsonl', 'trace', '2026-01-01T00:00:00Z', '{\"contract_version\":1}')",
            params![Ulid::new().to_string()],
        );
        if let Err(err) = insert {
            panic!("test failure: {err}");
        }

        let records = must(store.list(None, None));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].feedback_id, good.feedback_id);
        assert_eq!(must(store.load_snapshots(TriageStatus::Open)).len(), 1);
    }

    #[test]
    fn schema_rejects_unknown_triage_status() {
        let store = fixture_store();
        let result = store.connection().execute(
            "INSERT INTO feedback_records(feedback_id, source, variant, recorded_at, triage_status, extraction_json)
             VALUES (?1, 'x', 'trace', '2026-01-01T00:00:00Z', 'wontfix', '{}')",
            params![Ulid::new().to_string()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn migration_is_idempotent_and_preserves_records() {
        let store = fixture_store();
        let recorded = must(store.record_extraction("a.jsonl", &fixture_extraction()));
        must(store.migrate());
        assert!(must(store.get(recorded.feedback_id)).is_some());

        let migrations = match store.connection().query_row(
            "SELECT COUNT(*) FROM schema_migrations",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to count migrations: {err}"),
        };
        assert_eq!(migrations, 1);
    }

    #[test]
    fn triage_status_names_are_stable() {
        for status in TriageStatus::ALL {
            assert_eq!(TriageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TriageStatus::parse("closed"), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_list_respects_limit_and_order(count in 1_usize..8, limit in 0_usize..10) {
            let store = fixture_store();
            let extraction = fixture_extraction();
            let mut ids = Vec::new();
            for n in 0..count {
                ids.push(must(store.record_extraction(&format!("s{n}.jsonl"), &extraction)).feedback_id);
            }

            let listed = must(store.list(None, Some(limit)));
            prop_assert_eq!(listed.len(), count.min(limit));
            for (record, expected) in listed.iter().zip(ids.iter()) {
                prop_assert_eq!(record.feedback_id, *expected);
            }
        }
    }
}
