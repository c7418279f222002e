// ============================================================================
// ConsoleDb - Embedded Database (redb)
// ============================================================================
// Local storage for console settings and the recent run history. Values are
// serialized JSON strings under fixed keys, the same layout the browser
// console kept in localStorage.
// Default path: ~/.macroscout/console.redb (override via MACROSCOUT_DB_PATH)
// ============================================================================

pub mod types;

pub use types::{merge_runs, RunRecord, Settings, MAX_RUNS};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LOCAL_STORAGE: TableDefinition<&str, &str> = TableDefinition::new("local_storage");

/// Key holding the serialized `Settings`
pub const SETTINGS_KEY: &str = "fairfetch-demo-settings";
/// Key holding the serialized run list
pub const RUNS_KEY: &str = "fairfetch-demo-runs";

/// Embedded database for the helper console
pub struct ConsoleDb {
    db: Database,
    path: PathBuf,
}

impl ConsoleDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses MACROSCOUT_DB_PATH env var or ~/.macroscout/console.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("MACROSCOUT_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let scout_dir = home.join(".macroscout");
            std::fs::create_dir_all(&scout_dir)
                .map_err(|e| anyhow!("Failed to create .macroscout directory: {}", e))?;
            scout_dir.join("console.redb")
        };

        info!("Opening console store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(LOCAL_STORAGE)
                .map_err(|e| anyhow!("Failed to create local_storage table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Raw Key Access
    // ========================================================================

    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(LOCAL_STORAGE)
            .map_err(|e| anyhow!("Failed to open local_storage table: {}", e))?;

        let value = table
            .get(key)
            .map_err(|e| anyhow!("Failed to get {}: {}", key, e))?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(LOCAL_STORAGE)
                .map_err(|e| anyhow!("Failed to open local_storage table: {}", e))?;
            table.insert(key, value)
                .map_err(|e| anyhow!("Failed to insert {}: {}", key, e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Stored settings. A value that no longer parses is treated as absent.
    pub fn load_settings(&self) -> Result<Option<Settings>> {
        let Some(raw) = self.get_raw(SETTINGS_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Settings>(&raw) {
            Ok(settings) => Ok(Some(settings)),
            Err(e) => {
                warn!("Ignoring unreadable stored settings: {}", e);
                Ok(None)
            }
        }
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let value = serde_json::to_string(settings)
            .map_err(|e| anyhow!("Failed to serialize settings: {}", e))?;
        self.put_raw(SETTINGS_KEY, &value)?;
        debug!("Stored console settings");
        Ok(())
    }

    // ========================================================================
    // Run History
    // ========================================================================

    /// Recent runs, most recent first, at most `MAX_RUNS`
    pub fn list_runs(&self) -> Result<Vec<RunRecord>> {
        Ok(self
            .get_raw(RUNS_KEY)?
            .map(|raw| decode_runs(&raw))
            .unwrap_or_default())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        Ok(self.list_runs()?.into_iter().find(|run| run.id == id))
    }

    /// Insert `run` at the head of history, replacing any entry with the same
    /// id and keeping at most `MAX_RUNS`. Returns the stored list.
    pub fn persist_run(&self, run: &RunRecord) -> Result<Vec<RunRecord>> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let merged;
        {
            let mut table = write_txn.open_table(LOCAL_STORAGE)
                .map_err(|e| anyhow!("Failed to open local_storage table: {}", e))?;

            let existing = table
                .get(RUNS_KEY)
                .map_err(|e| anyhow!("Failed to get runs: {}", e))?
                .map(|guard| decode_runs(guard.value()))
                .unwrap_or_default();

            merged = merge_runs(existing, run.clone());
            let value = serde_json::to_string(&merged)
                .map_err(|e| anyhow!("Failed to serialize runs: {}", e))?;
            table.insert(RUNS_KEY, value.as_str())
                .map_err(|e| anyhow!("Failed to insert runs: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored run {} ({} in history)", run.id, merged.len());
        Ok(merged)
    }

    /// Forget all stored runs. Returns how many were removed.
    pub fn clear_runs(&self) -> Result<usize> {
        let count = self.list_runs()?.len();

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(LOCAL_STORAGE)
                .map_err(|e| anyhow!("Failed to open local_storage table: {}", e))?;
            table.remove(RUNS_KEY)
                .map_err(|e| anyhow!("Failed to remove runs: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if count > 0 {
            info!("Cleared {} stored runs", count);
        }
        Ok(count)
    }
}

fn decode_runs(raw: &str) -> Vec<RunRecord> {
    match serde_json::from_str::<Vec<RunRecord>>(raw) {
        Ok(mut runs) => {
            let mut seen = HashSet::new();
            runs.retain(|run| seen.insert(run.id.clone()));
            runs.truncate(MAX_RUNS);
            runs
        }
        Err(e) => {
            warn!("Ignoring unreadable stored runs: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::types::fixtures::run;
    use super::*;

    fn temp_db() -> ConsoleDb {
        let path = std::env::temp_dir().join(format!("macroscout-{}.redb", uuid::Uuid::new_v4()));
        ConsoleDb::open(path.to_str()).expect("open temp db")
    }

    #[test]
    fn test_empty_store() {
        let db = temp_db();
        assert!(db.load_settings().unwrap().is_none());
        assert!(db.list_runs().unwrap().is_empty());
        assert!(db.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_settings_roundtrip() {
        let db = temp_db();
        let settings = Settings {
            backend_url: "https://ff.example".to_string(),
            api_key: "ff_key_123456".to_string(),
            ..Settings::default()
        };
        db.save_settings(&settings).unwrap();
        assert_eq!(db.load_settings().unwrap(), Some(settings));
    }

    #[test]
    fn test_unreadable_values_ignored() {
        let db = temp_db();
        db.put_raw(SETTINGS_KEY, "{not json").unwrap();
        db.put_raw(RUNS_KEY, "42").unwrap();
        assert!(db.load_settings().unwrap().is_none());
        assert!(db.list_runs().unwrap().is_empty());

        // A broken list is replaced by the next persisted run
        let stored = db.persist_run(&run("tx_1", "t1")).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn test_persist_run_history_bounds() {
        let db = temp_db();
        for i in 0..8 {
            db.persist_run(&run(&format!("tx_{}", i), "t")).unwrap();
        }
        db.persist_run(&run("tx_5", "t")).unwrap();

        let runs = db.list_runs().unwrap();
        assert_eq!(runs.len(), MAX_RUNS);
        assert_eq!(runs[0].id, "tx_5-t");
        assert_eq!(runs.iter().filter(|r| r.id == "tx_5-t").count(), 1);
        assert!(db.get_run("tx_7-t").unwrap().is_some());
    }

    #[test]
    fn test_oversized_stored_list_truncated_on_load() {
        let db = temp_db();
        let runs: Vec<_> = (0..7).map(|i| run(&format!("tx_{}", i), "t")).collect();
        db.put_raw(RUNS_KEY, &serde_json::to_string(&runs).unwrap()).unwrap();
        assert_eq!(db.list_runs().unwrap().len(), MAX_RUNS);
    }

    #[test]
    fn test_duplicate_ids_dropped_on_load() {
        let db = temp_db();
        let mut newer = run("tx_1", "t1");
        newer.content_preview = "newer".to_string();
        let runs = vec![newer, run("tx_1", "t1"), run("tx_2", "t2"), run("tx_1", "t1")];
        db.put_raw(RUNS_KEY, &serde_json::to_string(&runs).unwrap()).unwrap();

        let loaded = db.list_runs().unwrap();
        let ids: Vec<_> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["tx_1-t1", "tx_2-t2"]);
        assert_eq!(loaded[0].content_preview, "newer");

        // The next persist starts from the cleaned list
        let stored = db.persist_run(&run("tx_3", "t3")).unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[test]
    fn test_clear_runs() {
        let db = temp_db();
        db.persist_run(&run("tx_1", "t1")).unwrap();
        db.persist_run(&run("tx_2", "t2")).unwrap();
        assert_eq!(db.clear_runs().unwrap(), 2);
        assert!(db.list_runs().unwrap().is_empty());
        assert_eq!(db.clear_runs().unwrap(), 0);
    }
}
