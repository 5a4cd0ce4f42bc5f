use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

use super::record::{VerificationRecord, CURRENT_SCHEMA_VERSION};
use crate::error::StoreError;
use crate::stage::StageId;

const JOURNAL_FILE: &str = "journal.jsonl";
const TEMP_PREFIX: &str = ".tmp-";

/// Durable, per-stage verification records.
///
/// `<dir>/<stage_id>.json` holds the canonical record and is only ever
/// replaced by an atomic rename; `<dir>/journal.jsonl` keeps every write.
/// Readers never need the merge lock.
#[derive(Debug, Clone)]
pub struct VerificationStore {
    dir: PathBuf,
}

impl VerificationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<state_dir>/<dir_name>`.
    pub fn from_config(state_dir: &Path, cfg: &crate::config::StoreConfig) -> Self {
        Self::new(state_dir.join(&cfg.dir_name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, stage_id: &StageId) -> Result<PathBuf, StoreError> {
        if !stage_id.is_path_safe() {
            return Err(StoreError::InvalidStageId(stage_id.clone()));
        }
        Ok(self.dir.join(format!("{}.json", stage_id.as_str())))
    }

    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Replace the canonical record atomically, then append it to the journal.
    ///
    /// The canonical file is the source of truth: once it is renamed into
    /// place a failed journal append is logged, not returned.
    pub fn save(&self, record: &VerificationRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.stage_id)?;
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        let mut tmp: NamedTempFile = Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".json")
            .tempfile_in(&self.dir)
            .map_err(|e| StoreError::io(&self.dir, e))?;
        tmp.write_all(&body)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;

        if let Err(e) = self.append_journal(record) {
            warn!(stage_id = %record.stage_id, error = %e, "journal append failed after canonical write");
        }

        debug!(
            stage_id = %record.stage_id,
            result = ?record.result,
            attempt = record.attempt,
            "verification record saved"
        );
        Ok(())
    }

    fn append_journal(&self, record: &VerificationRecord) -> Result<(), StoreError> {
        let path = self.journal_path();
        let mut line =
            serde_json::to_string(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        // Keep a torn tail from swallowing this entry.
        if ends_without_newline(&mut file).map_err(|e| StoreError::io(&path, e))? {
            line.insert(0, '\n');
        }

        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| StoreError::io(&path, e))
    }

    pub fn load(&self, stage_id: &StageId) -> Result<VerificationRecord, StoreError> {
        let path = self.record_path(stage_id)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(stage_id.clone()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        parse_record(stage_id, &bytes)
    }

    /// Whether a canonical record exists and says `Pass`.
    pub fn is_verified(&self, stage_id: &StageId) -> Result<bool, StoreError> {
        match self.load(stage_id) {
            Ok(record) => Ok(record.passed()),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every canonical record. Temp files and the journal are skipped.
    ///
    /// Fails on the first unreadable record; see [`Self::scan`] for a per-stage
    /// view.
    pub fn load_all(&self) -> Result<BTreeMap<StageId, VerificationRecord>, StoreError> {
        self.scan()?
            .into_iter()
            .map(|(id, record)| record.map(|r| (id, r)))
            .collect()
    }

    /// Every canonical record with its own load result, so one corrupt file
    /// does not hide the others. Only a directory read failure is fatal.
    pub fn scan(
        &self,
    ) -> Result<BTreeMap<StageId, Result<VerificationRecord, StoreError>>, StoreError> {
        let mut out = BTreeMap::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };

            let stage_id = StageId::from(stem);
            let record = self.load(&stage_id);
            out.insert(stage_id, record);
        }

        Ok(out)
    }

    /// Journal entries for `stage_id` in write order.
    ///
    /// Lines torn by a crash mid-append are skipped.
    pub fn history(&self, stage_id: &StageId) -> Result<Vec<VerificationRecord>, StoreError> {
        let path = self.journal_path();
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<VerificationRecord>(&line) {
                Ok(record) if &record.stage_id == stage_id => out.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), line = idx + 1, error = %e, "skipping torn journal line");
                }
            }
        }
        Ok(out)
    }

    /// Remove temp files left behind by writers that crashed before the rename.
    pub fn sweep_temp_files(&self) -> Result<usize, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let is_temp = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(TEMP_PREFIX));
            if !is_temp {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(entry.path(), e)),
            }
        }

        if removed > 0 {
            warn!(dir = %self.dir.display(), removed, "removed leftover verification temp files");
        }
        Ok(removed)
    }
}

fn ends_without_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn parse_record(stage_id: &StageId, bytes: &[u8]) -> Result<VerificationRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        stage_id: stage_id.clone(),
        reason,
    };

    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;

    let version = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| corrupt("missing schema_version".into()))?;
    if version > u64::from(CURRENT_SCHEMA_VERSION) {
        return Err(StoreError::UnsupportedSchema {
            stage_id: stage_id.clone(),
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    let record: VerificationRecord =
        serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
    if &record.stage_id != stage_id {
        return Err(corrupt(format!(
            "record names stage '{}'",
            record.stage_id
        )));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FailureClass;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, VerificationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VerificationStore::new(dir.path().join("verification"));
        (dir, store)
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, store) = store();
        let record = VerificationRecord::pass("build", 1, vec!["cargo test ok".into()])
            .with_merged_commit("abc123");
        store.save(&record).unwrap();

        assert_eq!(store.load(&"build".into()).unwrap(), record);
        assert!(store.is_verified(&"build".into()).unwrap());
        assert!(!store.is_verified(&"other".into()).unwrap());
    }

    #[test]
    fn test_missing_record() {
        let (_dir, store) = store();
        assert!(store.load(&"nope".into()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let (_dir, store) = store();
        store
            .save(&VerificationRecord::pass("lint", 1, vec![]))
            .unwrap();
        let path = store.record_path(&"lint".into()).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            store.load(&"lint".into()),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_newer_schema_rejected() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(
            store.dir().join("docs.json"),
            r#"{"schema_version": 9, "stage_id": "docs", "future_field": true}"#,
        )
        .unwrap();

        match store.load(&"docs".into()) {
            Err(StoreError::UnsupportedSchema { found, supported, .. }) => {
                assert_eq!((found, supported), (9, CURRENT_SCHEMA_VERSION))
            }
            other => panic!("expected unsupported schema, got {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_stage_id_is_corrupt() {
        let (_dir, store) = store();
        store.save(&VerificationRecord::pass("a", 1, vec![])).unwrap();
        fs::copy(
            store.record_path(&"a".into()).unwrap(),
            store.dir().join("b.json"),
        )
        .unwrap();
        assert!(matches!(
            store.load(&"b".into()),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_path_unsafe_id_rejected() {
        let (_dir, store) = store();
        let record = VerificationRecord::pass(StageId::new("../x"), 1, vec![]);
        assert!(matches!(
            store.save(&record),
            Err(StoreError::InvalidStageId(_))
        ));
    }

    #[test]
    fn test_load_all_skips_temp_files_and_sweep() {
        let (_dir, store) = store();
        store.save(&VerificationRecord::pass("a", 1, vec![])).unwrap();
        store
            .save(&VerificationRecord::fail("b", 2, FailureClass::Permanent, vec![]))
            .unwrap();
        fs::write(store.dir().join(".tmp-crashed.json"), b"{\"schema_ver").unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(
            all.keys().cloned().collect::<Vec<_>>(),
            vec![StageId::from("a"), StageId::from("b")]
        );
        assert_eq!(store.sweep_temp_files().unwrap(), 1);
        assert_eq!(store.sweep_temp_files().unwrap(), 0);
    }

    #[test]
    fn test_scan_reports_corrupt_records_per_stage() {
        let (_dir, store) = store();
        store.save(&VerificationRecord::pass("a", 1, vec![])).unwrap();
        fs::write(store.dir().join("b.json"), b"{\"schema_version\": 1, \"stage_").unwrap();

        let scanned = store.scan().unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(scanned[&StageId::from("a")].as_ref().unwrap().passed());
        assert!(matches!(
            scanned[&StageId::from("b")],
            Err(StoreError::Corrupt { .. })
        ));
        assert!(matches!(store.load_all(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_journal_failure_keeps_canonical_write() {
        let (_dir, store) = store();
        fs::create_dir_all(store.journal_path()).unwrap();

        let record = VerificationRecord::pass("a", 1, vec!["ok".into()]);
        store.save(&record).unwrap();
        assert_eq!(store.load(&"a".into()).unwrap(), record);
    }

    #[test]
    fn test_history_skips_torn_tail() {
        let (_dir, store) = store();
        store
            .save(&VerificationRecord::fail("a", 1, FailureClass::Network, vec![]))
            .unwrap();
        store.save(&VerificationRecord::pass("b", 1, vec![])).unwrap();
        store.save(&VerificationRecord::pass("a", 2, vec![])).unwrap();

        let mut journal = OpenOptions::new()
            .append(true)
            .open(store.journal_path())
            .unwrap();
        journal.write_all(b"{\"schema_version\":1,\"stage_id\":\"a\"").unwrap();

        let history = store.history(&"a".into()).unwrap();
        assert_eq!(
            history.iter().map(|r| r.attempt).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(history[1].passed());

        // a later append is not merged into the torn line
        store.save(&VerificationRecord::pass("a", 3, vec![])).unwrap();
        assert_eq!(store.history(&"a".into()).unwrap().len(), 3);
    }
}
