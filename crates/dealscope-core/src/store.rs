//! On-disk record store: one directory per client under the output root.
//!
//! ```text
//! <root>/
//!   overview.json  overview.csv  action_plan.json  executive_report.md
//!   <client_id>/
//!     analysis.json  summary.md  scorecard.md  follow_up.md  next_steps.md  coaching.md
//! ```
//!
//! Every file is written to a hidden temp file and renamed into place. Views
//! go first and `analysis.json` last, so the authoritative record is always
//! either the previous one or the new one, never absent or partial.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::StoreError,
    format::{
        format_coaching, format_executive_report, format_follow_up, format_next_steps,
        format_scorecard, format_summary,
    },
    overview::{ActionPlan, ExecutiveReport, OverviewEntry, render_csv, sort_entries},
    rubric::Rubric,
    types::{AnalysisRecord, ClientId},
};

pub const RECORD_FILE: &str = "analysis.json";
pub const SUMMARY_FILE: &str = "summary.md";
pub const SCORECARD_FILE: &str = "scorecard.md";
pub const FOLLOW_UP_FILE: &str = "follow_up.md";
pub const NEXT_STEPS_FILE: &str = "next_steps.md";
pub const COACHING_FILE: &str = "coaching.md";
pub const OVERVIEW_JSON: &str = "overview.json";
pub const OVERVIEW_CSV: &str = "overview.csv";
pub const ACTION_PLAN_FILE: &str = "action_plan.json";
pub const EXECUTIVE_REPORT_FILE: &str = "executive_report.md";

type ClientLock = Arc<tokio::sync::Mutex<()>>;

pub struct RecordStore {
    root: PathBuf,
    rubric: Arc<Rubric>,
    locks: Mutex<HashMap<ClientId, ClientLock>>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, rubric: Arc<Rubric>) -> Self {
        Self {
            root: root.into(),
            rubric,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn client_dir(&self, client_id: &ClientId) -> PathBuf {
        self.root.join(client_id.as_str())
    }

    pub fn record_path(&self, client_id: &ClientId) -> PathBuf {
        self.client_dir(client_id).join(RECORD_FILE)
    }

    fn client_lock(&self, client_id: &ClientId) -> ClientLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(client_id.clone()).or_default().clone()
    }

    /// Forget a client's lock once no other save holds or awaits it.
    fn release_lock(&self, client_id: &ClientId, lock: ClientLock) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // ours plus the map's
        if Arc::strong_count(&lock) == 2 {
            locks.remove(client_id);
        }
    }

    /// Write the record and its views, replacing whatever was stored for the client.
    pub async fn save(&self, record: &AnalysisRecord) -> Result<PathBuf, StoreError> {
        let client_id = &record.client_id;
        let dir = self.client_dir(client_id);

        let lock = self.client_lock(client_id);
        let guard = lock.lock().await;
        let result = self.write_files(record, &dir).await;
        drop(guard);
        self.release_lock(client_id, lock);
        result?;

        info!(client_id = %client_id, path = %dir.display(), "Saved analysis");
        Ok(dir)
    }

    async fn write_files(&self, record: &AnalysisRecord, dir: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        let views = [
            (SUMMARY_FILE, format_summary(record)),
            (SCORECARD_FILE, format_scorecard(record, &self.rubric)),
            (FOLLOW_UP_FILE, format_follow_up(record)),
            (NEXT_STEPS_FILE, format_next_steps(record)),
            (COACHING_FILE, format_coaching(record)),
        ];
        for (name, content) in views {
            atomic_write(&dir.join(name), content.as_bytes()).await?;
        }
        atomic_write(&dir.join(RECORD_FILE), json.as_bytes()).await
    }

    /// Stored record for a client, `None` when nothing has been saved yet.
    pub async fn load(&self, client_id: &ClientId) -> Result<Option<AnalysisRecord>, StoreError> {
        read_record(&self.record_path(client_id)).await
    }

    /// Every stored record. Unreadable records are logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            let path = entry.path().join(RECORD_FILE);
            match read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(path = %path.display(), "Directory without a record"),
                Err(e) => warn!(error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }

    /// Overview rows for every stored record, highest priority first.
    pub async fn list_all(&self) -> Result<Vec<OverviewEntry>, StoreError> {
        let mut entries: Vec<OverviewEntry> = self
            .load_all()
            .await?
            .iter()
            .map(OverviewEntry::from_record)
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    pub async fn write_overview(&self, entries: &[OverviewEntry]) -> Result<(), StoreError> {
        let now = Utc::now();
        let plan = ActionPlan::build(entries, now);
        let report = ExecutiveReport::build(entries, now);
        atomic_write(
            &self.root.join(OVERVIEW_JSON),
            serde_json::to_string_pretty(entries)?.as_bytes(),
        )
        .await?;
        atomic_write(&self.root.join(OVERVIEW_CSV), render_csv(entries).as_bytes()).await?;
        atomic_write(
            &self.root.join(ACTION_PLAN_FILE),
            serde_json::to_string_pretty(&plan)?.as_bytes(),
        )
        .await?;
        atomic_write(
            &self.root.join(EXECUTIVE_REPORT_FILE),
            format_executive_report(&report).as_bytes(),
        )
        .await?;
        info!(clients = entries.len(), root = %self.root.display(), "Overview written");
        Ok(())
    }

    /// Re-read the store and rewrite the overview files from scratch.
    pub async fn rebuild_overview(&self) -> Result<Vec<OverviewEntry>, StoreError> {
        let entries = self.list_all().await?;
        self.write_overview(&entries).await?;
        Ok(entries)
    }
}

async fn read_record(path: &Path) -> Result<Option<AnalysisRecord>, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write data atomically using temp file + rename
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()));
    let written = match fs::write(&temp_path, data).await {
        Ok(()) => fs::rename(&temp_path, path)
            .await
            .map_err(|e| StoreError::io(path, e)),
        Err(e) => Err(StoreError::io(&temp_path, e)),
    };
    if written.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Narrative, Scores, Temperature};

    fn record(id: &str, urgency: f64) -> AnalysisRecord {
        AnalysisRecord {
            client_id: ClientId::new(id).unwrap(),
            rubric_version: "2025.1".into(),
            analysis_date: Utc::now(),
            executive_summary: Narrative::Identified(format!("{} summary", id)),
            highlights: vec![],
            scores: Scores {
                urgency,
                need: 0.5,
                fit: 0.5,
                confidence: 0.5,
            },
            temperature: Temperature::Warm,
            frameworks: vec![],
            stakeholders: vec![],
            objections: vec![],
            next_steps: vec![],
            strategic_recommendations: vec![],
            follow_up_email: Narrative::NotIdentified,
            call_script: Narrative::NotIdentified,
            diagnostics: vec![],
            seller_performance: None,
        }
    }

    fn store(dir: &Path) -> RecordStore {
        RecordStore::new(dir, Arc::new(Rubric::standard()))
    }

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .filter(|name| name.ends_with(".tmp"))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn tracked_locks(store: &RecordStore) -> usize {
        store.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_save_writes_record_and_views() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let rec = record("Acme", 0.7);

        let client_dir = store.save(&rec).await.unwrap();
        for file in [
            RECORD_FILE,
            SUMMARY_FILE,
            SCORECARD_FILE,
            FOLLOW_UP_FILE,
            NEXT_STEPS_FILE,
            COACHING_FILE,
        ] {
            assert!(client_dir.join(file).is_file(), "{file}");
        }
        assert_eq!(store.load(&rec.client_id).await.unwrap(), Some(rec));
        assert!(leftover_temp_files(&client_dir).is_empty());
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let rec = record("Acme", 0.7);

        store.save(&rec).await.unwrap();
        let first = std::fs::read_to_string(store.record_path(&rec.client_id)).unwrap();
        store.save(&rec).await.unwrap();
        let second = std::fs::read_to_string(store.record_path(&rec.client_id)).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list_all().await.unwrap().len(), 1);
        assert!(leftover_temp_files(&store.client_dir(&rec.client_id)).is_empty());
    }

    #[tokio::test]
    async fn test_reanalysis_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.save(&record("Acme", 0.2)).await.unwrap();
        store.save(&record("Acme", 0.9)).await.unwrap();

        let loaded = store
            .load(&ClientId::new("Acme").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.scores.urgency, 0.9);
    }

    #[tokio::test]
    async fn test_concurrent_saves_for_one_client_leave_one_valid_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let (a, b) = (record("Acme", 0.1), record("Acme", 0.9));

        let (ra, rb) = tokio::join!(store.save(&a), store.save(&b));
        ra.unwrap();
        rb.unwrap();

        let loaded = store.load(&a.client_id).await.unwrap().unwrap();
        assert!(loaded == a || loaded == b);
        assert!(leftover_temp_files(&store.client_dir(&a.client_id)).is_empty());
        assert_eq!(tracked_locks(&store), 0);
    }

    #[tokio::test]
    async fn test_locks_are_dropped_after_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for i in 0..20 {
            store.save(&record(&format!("Client {i}"), 0.5)).await.unwrap();
        }
        assert_eq!(tracked_locks(&store), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_record_file_is_never_absent_during_resave() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(dir.path()));
        let first = record("Acme", 0.2);
        store.save(&first).await.unwrap();

        let path = store.record_path(&first.client_id);
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    store.save(&record("Acme", i as f64 / 25.0)).await.unwrap();
                }
            })
        };
        while !writer.is_finished() {
            let content = tokio::fs::read_to_string(&path).await.unwrap();
            serde_json::from_str::<AnalysisRecord>(&content).unwrap();
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_all_returns_one_entry_per_saved_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for (id, urgency) in [("Beta", 0.3), ("Alpha", 0.9), ("Gamma", 0.6)] {
            store.save(&record(id, urgency)).await.unwrap();
        }
        std::fs::create_dir_all(dir.path().join("empty-dir")).unwrap();
        std::fs::create_dir_all(dir.path().join("Broken")).unwrap();
        std::fs::write(dir.path().join("Broken").join(RECORD_FILE), "{oops").unwrap();

        let entries = store.list_all().await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.client_id.as_str()).collect();
        assert_eq!(ids, ["Alpha", "Gamma", "Beta"]);

        for entry in &entries {
            let saved = store.load(&entry.client_id).await.unwrap().unwrap();
            assert_eq!(entry.urgency, saved.scores.urgency);
            assert_eq!(entry.need, saved.scores.need);
            assert_eq!(entry.fit, saved.scores.fit);
            assert_eq!(entry.confidence, saved.scores.confidence);
            assert_eq!(entry.temperature, saved.temperature);
            assert_eq!(entry.priority, saved.scores.priority());
        }
    }

    #[tokio::test]
    async fn test_load_missing_client_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("not-created-yet"));
        assert!(store.load(&ClientId::new("Nobody").unwrap()).await.unwrap().is_none());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_overview_writes_aggregate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.save(&record("Acme", 0.9)).await.unwrap();
        store.save(&record("Initech", 0.1)).await.unwrap();

        let entries = store.rebuild_overview().await.unwrap();
        assert_eq!(entries.len(), 2);

        let json = std::fs::read_to_string(dir.path().join(OVERVIEW_JSON)).unwrap();
        let parsed: Vec<OverviewEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entries);

        let csv = std::fs::read_to_string(dir.path().join(OVERVIEW_CSV)).unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(dir.path().join(ACTION_PLAN_FILE).is_file());
        let report = std::fs::read_to_string(dir.path().join(EXECUTIVE_REPORT_FILE)).unwrap();
        assert!(report.contains("• Clients analyzed: 2"));
        assert!(report.contains("1. Acme: "));
        assert!(leftover_temp_files(dir.path()).is_empty());
    }
}
