//! Point-in-time backup and restore for the payline store.
//!
//! Backups are consistent snapshots taken through SQLite's online backup
//! API (safe under concurrent writers, unlike a raw file copy). Every
//! snapshot is verified before it is accepted, and verification gates any
//! restore: a backup that fails the schema/row-count/integrity checks is
//! never allowed to replace the live store.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use rusqlite::{backup::Backup, Connection};

use crate::error::{AppError, Result};

/// Tables that must be present in any restorable backup.
const REQUIRED_TABLES: &[&str] = &["orders", "payments", "webhook_events", "subscriptions"];

/// Pages copied per backup step; the pause between steps lets writers
/// make progress on a live store.
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 256;
const BACKUP_STEP_PAUSE: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug)]
pub struct VerifyReport {
    /// Row counts per required table.
    pub row_counts: Vec<(String, i64)>,
}

/// Create a verified backup of the live store.
///
/// The snapshot lands at `backup_dir/backup_{label}_{timestamp}.db`. A
/// snapshot that fails verification is deleted and reported as an error.
pub fn create_backup(db_path: &str, backup_dir: &str, label: &str) -> Result<PathBuf> {
    if !Path::new(db_path).exists() {
        return Err(AppError::NotFound(format!("database not found: {}", db_path)));
    }
    fs::create_dir_all(backup_dir)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup_name = format!("backup_{}_{}.db", label, timestamp);
    let backup_path = Path::new(backup_dir).join(&backup_name);

    let src = Connection::open(db_path)?;
    {
        let mut dst = Connection::open(&backup_path)?;
        let backup = Backup::new(&src, &mut dst)?;
        backup.run_to_completion(BACKUP_PAGES_PER_STEP, BACKUP_STEP_PAUSE, None)?;
    }

    match verify_backup(&backup_path) {
        Ok(report) => {
            let size_mb = fs::metadata(&backup_path)?.len() as f64 / (1024.0 * 1024.0);
            tracing::info!("backup created: {} ({:.2} MB)", backup_name, size_mb);
            for (table, count) in &report.row_counts {
                tracing::debug!("  {} rows in {}", count, table);
            }
            Ok(backup_path)
        }
        Err(e) => {
            tracing::error!("backup verification failed: {}: {}", backup_name, e);
            let _ = fs::remove_file(&backup_path);
            Err(e)
        }
    }
}

/// Verify a backup file: required tables present, rows countable, and a
/// clean `PRAGMA integrity_check`.
pub fn verify_backup(backup_path: &Path) -> Result<VerifyReport> {
    // Plain open rather than read-only: a WAL-mode snapshot without its
    // -shm file can refuse a read-only connection. Verification only reads.
    let conn = Connection::open(backup_path)
        .map_err(|e| AppError::Internal(format!("cannot open backup: {}", e)))?;

    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .filter(|t| !tables.iter().any(|have| have == *t))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Internal(format!(
            "backup missing required tables: {}",
            missing.join(", ")
        )));
    }

    let mut row_counts = Vec::new();
    for table in REQUIRED_TABLES {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        row_counts.push((table.to_string(), count));
    }

    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if integrity != "ok" {
        return Err(AppError::Internal(format!("integrity check failed: {}", integrity)));
    }

    Ok(VerifyReport { row_counts })
}

/// Restore the live store from a backup.
///
/// The backup is verified first; the current store is kept next to the
/// live path as `.pre_restore` so a bad restore can be undone by hand.
/// The caller is responsible for ensuring no pool holds open connections.
pub fn restore_backup(backup_path: &Path, db_path: &str) -> Result<VerifyReport> {
    if !backup_path.exists() {
        return Err(AppError::NotFound(format!(
            "backup file not found: {}",
            backup_path.display()
        )));
    }

    let report = verify_backup(backup_path)?;

    if Path::new(db_path).exists() {
        let pre_restore = format!("{}.pre_restore", db_path);
        fs::copy(db_path, &pre_restore)?;
        tracing::info!("current store saved to {}", pre_restore);
    }

    fs::copy(backup_path, db_path)?;
    // Stale WAL/SHM files would resurrect pre-restore pages.
    let _ = fs::remove_file(format!("{}-wal", db_path));
    let _ = fs::remove_file(format!("{}-shm", db_path));

    tracing::info!("store restored from {}", backup_path.display());
    Ok(report)
}

/// List available backups, newest first.
pub fn list_backups(backup_dir: &str) -> Result<Vec<BackupInfo>> {
    let dir = Path::new(backup_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with("backup_") || !name.ends_with(".db") {
            continue;
        }
        let metadata = entry.metadata()?;
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        backups.push(BackupInfo {
            name,
            path: entry.path(),
            size_bytes: metadata.len(),
            modified,
        });
    }

    backups.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(backups)
}

/// Remove backups older than the retention window. Returns the number of
/// files removed.
pub fn cleanup_old_backups(backup_dir: &str, retention_days: i64) -> Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let mut removed = 0;

    for backup in list_backups(backup_dir)? {
        if backup.modified < cutoff {
            fs::remove_file(&backup.path)?;
            tracing::info!("removed old backup: {}", backup.name);
            removed += 1;
        }
    }

    Ok(removed)
}
