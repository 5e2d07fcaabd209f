//! Run store: the append-only per-run directory tree.
//!
//! Layout: `<runs-root>/<run_id>/run.json` plus `output.log`. The record is
//! rewritten after every mutation by writing a temp sibling and renaming, so
//! a crash mid-write leaves either the previous or the new content intact.
//! `output.log` is opened once per run and only ever appended.

use orc_core::prompt::truncate_summary;
use orc_core::{Decision, RunRecord};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run not found: {0}")]
    RunNotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Listing entry for the run-history surface.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct RunListEntry {
    pub run_id: String,
    #[serde(rename = "startTime")]
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "endTime")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

impl RunStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the runs root if missing and return it.
    pub fn ensure_root(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        Ok(self.root.clone())
    }

    pub fn run_dir_path(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Create the run directory, persist the initial record, and open the
    /// output log.
    pub fn create(&self, record: &RunRecord) -> Result<RunDir> {
        let dir = self.run_dir_path(record.run_id.as_ref());
        fs::create_dir_all(&dir)?;
        write_record_atomic(&dir, record)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("output.log"))?;
        Ok(RunDir { dir, log })
    }

    pub fn load(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.run_dir_path(run_id).join("run.json");
        if !path.is_file() {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Merge a delivered decision into an already-finalized record.
    pub fn merge_decision(&self, run_id: &str, decision: Decision) -> Result<()> {
        let mut record = self.load(run_id)?;
        record.decision = Some(decision);
        write_record_atomic(&self.run_dir_path(run_id), &record)?;
        Ok(())
    }

    /// All runs, newest first. Run ids sort lexicographically in start order.
    pub fn list(&self) -> Result<Vec<RunListEntry>> {
        let mut entries = Vec::new();
        let read = match fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        for entry in read.flatten() {
            let run_id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&run_id) {
                Ok(record) => entries.push(RunListEntry {
                    run_id,
                    start_time: record.start_time,
                    end_time: record.end_time,
                    exit_code: record.exit_code,
                }),
                Err(e) => warn!(run_id, error = %e, "skipping unreadable run directory"),
            }
        }
        entries.sort_by(|a, b| b.run_id.cmp(&a.run_id));
        Ok(entries)
    }

    /// Planner-facing summary of the most recent run, by directory mtime.
    ///
    /// Returns `None` when no prior run exists or the newest record is
    /// unreadable.
    pub fn last_run_summary(&self) -> Option<String> {
        let read = fs::read_dir(&self.root).ok()?;
        let newest = read
            .flatten()
            .filter(|e| e.path().join("run.json").is_file())
            .max_by_key(|e| {
                e.path()
                    .join("run.json")
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
            })?;
        let run_id = newest.file_name().to_string_lossy().into_owned();
        let record = self.load(&run_id).ok()?;
        Some(truncate_summary(&summarize(&record)))
    }
}

/// The open handle a run executor holds for the life of one run.
#[derive(Debug)]
pub struct RunDir {
    dir: PathBuf,
    log: File,
}

impl RunDir {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Append one line to `output.log`. Best-effort: losing a log line must
    /// not end the run.
    pub fn append_log(&mut self, text: &str) {
        if let Err(e) = writeln!(self.log, "{text}") {
            warn!(error = %e, "failed to append to output.log");
        }
    }

    /// Atomically rewrite `run.json` with the current record state.
    pub fn rewrite(&self, record: &RunRecord) -> Result<()> {
        write_record_atomic(&self.dir, record)
    }
}

fn write_record_atomic(dir: &Path, record: &RunRecord) -> Result<()> {
    let target = dir.join("run.json");
    let tmp = dir.join("run.json.tmp");
    let json = serde_json::to_string_pretty(record)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, &target)?;
    Ok(())
}

/// Compact JSON of the planner-relevant fields of a run.
fn summarize(record: &RunRecord) -> String {
    let mut value = serde_json::json!({
        "plan": record.plan.name,
        "stepsCount": record.plan.steps_count,
        "exitCode": record.exit_code,
    });
    let obj = value.as_object_mut().unwrap();
    if record.blocked_by_policy == Some(true) {
        obj.insert("blocked_by_policy".to_string(), true.into());
    }
    if record.timeout == Some(true) {
        obj.insert("timeout".to_string(), true.into());
    }
    if record.cancelled == Some(true) {
        obj.insert("cancelled".to_string(), true.into());
    }
    if record.decision_pending == Some(true) {
        obj.insert("decision_pending".to_string(), true.into());
    }
    if let Some(eval) = record.last_evaluation() {
        obj.insert(
            "evaluation".to_string(),
            serde_json::json!({
                "has_changes": eval.has_changes,
                "changed_files": eval.changed_files,
                "suspicious_no_change": eval.suspicious_no_change,
                "no_op": eval.no_op,
                "retried": eval.retried,
            }),
        );
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::{PlanSummary, RunId};

    fn record(run_id: &str) -> RunRecord {
        let mut record = RunRecord::new(
            "/ws".to_string(),
            "do the thing".to_string(),
            PlanSummary {
                name: "plan".to_string(),
                steps_count: 1,
            },
        );
        record.run_id = RunId::from_string(run_id);
        record
    }

    #[test]
    fn create_writes_record_and_log() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().to_path_buf());
        let mut dir = store.create(&record("r1")).unwrap();
        dir.append_log("hello");
        dir.append_log("world");

        let loaded = store.load("r1").unwrap();
        assert_eq!(loaded.requirement, "do the thing");
        let log = std::fs::read_to_string(dir.path().join("output.log")).unwrap();
        assert_eq!(log, "hello\nworld\n");
    }

    #[test]
    fn rewrite_is_atomic_and_leaves_no_temp_file() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().to_path_buf());
        let mut rec = record("r1");
        let dir = store.create(&rec).unwrap();

        rec.exit_code = Some(0);
        rec.end_time = Some(chrono::Utc::now());
        dir.rewrite(&rec).unwrap();

        assert_eq!(store.load("r1").unwrap().exit_code, Some(0));
        assert!(!dir.path().join("run.json.tmp").exists());
    }

    #[test]
    fn load_unknown_run_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().to_path_buf());
        assert!(matches!(
            store.load("missing"),
            Err(StoreError::RunNotFound(_))
        ));
    }

    #[test]
    fn merge_decision_updates_finalized_record() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().to_path_buf());
        let mut rec = record("r1");
        rec.decision_pending = Some(true);
        rec.end_time = Some(chrono::Utc::now());
        store.create(&rec).unwrap();

        let decision = orc_core::Decision::dependency_change(
            orc_core::DecisionResult::Approved,
            vec!["package.json".to_string()],
        );
        store.merge_decision("r1", decision).unwrap();

        let loaded = store.load("r1").unwrap();
        assert_eq!(
            loaded.decision.unwrap().result,
            orc_core::DecisionResult::Approved
        );
        // The rest of the record is untouched.
        assert_eq!(loaded.decision_pending, Some(true));
    }

    #[test]
    fn list_is_newest_first_and_skips_junk() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().to_path_buf());
        store.create(&record("a-run")).unwrap();
        store.create(&record("b-run")).unwrap();
        std::fs::create_dir(root.path().join("not-a-run")).unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].run_id, "b-run");
        assert_eq!(entries[1].run_id, "a-run");
    }

    #[test]
    fn list_with_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn last_run_summary_prefers_most_recently_modified() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().to_path_buf());
        assert!(store.last_run_summary().is_none());

        store.create(&record("r-old")).unwrap();
        // Ensure a distinct mtime for the second record.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut newer = record("r-new");
        newer.plan.name = "newer-plan".to_string();
        newer.exit_code = Some(0);
        store.create(&newer).unwrap();

        let summary = store.last_run_summary().unwrap();
        assert!(summary.contains("newer-plan"));
        assert!(summary.len() <= orc_core::prompt::LAST_RUN_SUMMARY_LIMIT);
    }

    #[test]
    fn summary_carries_evaluation_of_last_executor_step() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().to_path_buf());
        let mut rec = record("r1");
        let now = chrono::Utc::now();
        rec.steps.push(orc_core::StepRecord {
            step_index: 1,
            step_type: "executor".to_string(),
            started_at: now,
            ended_at: now,
            exit_code: 0,
            cancelled: false,
            timeout: false,
            blocked_by_policy: None,
            tool: Some("codex".to_string()),
            instructions_length: Some(10),
            evaluation: Some(orc_core::Evaluation {
                has_changes: false,
                suspicious_no_change: true,
                ..orc_core::Evaluation::default()
            }),
            evidence: None,
        });
        store.create(&rec).unwrap();

        let summary = store.last_run_summary().unwrap();
        assert!(summary.contains("suspicious_no_change"));
    }

    #[test]
    fn ensure_root_creates_directories() {
        let root = tempfile::tempdir().unwrap();
        let store = RunStore::new(root.path().join("a/b/runs"));
        let created = store.ensure_root().unwrap();
        assert!(created.is_dir());
    }
}
