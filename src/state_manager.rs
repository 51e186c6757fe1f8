// State Manager for published analyses
// SQLite-based persistence with JSON backup
//
// Stores every published outcome for display and audit. Nothing here is
// read back by the analysis pipeline.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::engine::AnalysisOutcome;

// =============================================================================
// Data Models
// =============================================================================

/// One row of the analysis history, without the full payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: i64,
    pub generated_at: String,
    pub underlying: String,
    pub regime: String,
    pub composite: f64,
    pub confidence: f64,
    pub vetoed: bool,
    pub template: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub id: i64,
    pub created_at: String,
    pub config_hash: String,
    pub outcome: AnalysisOutcome,
}

// =============================================================================
// State Manager Implementation
// =============================================================================

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
    json_backup_path: PathBuf,
    auto_backup: bool,
}

impl SqliteStateManager {
    pub fn new<P: AsRef<Path>>(db_path: P, json_backup_path: P, auto_backup: bool) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = json_backup_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path: json_backup_path.as_ref().to_path_buf(),
            auto_backup,
        };

        manager.create_tables()?;
        info!("SQLite state manager initialized at {}", db_path.display());

        Ok(manager)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("state database lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                generated_at TEXT NOT NULL,
                underlying TEXT NOT NULL,
                regime TEXT NOT NULL,
                composite REAL NOT NULL,
                confidence REAL NOT NULL,
                vetoed INTEGER NOT NULL,
                template TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                config_hash TEXT,
                outcome TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_analyses_generated ON analyses(generated_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_analyses_fingerprint ON analyses(fingerprint)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    /// Persist a published outcome, returning its row id
    pub fn save_outcome(&self, outcome: &AnalysisOutcome, config_hash: &str) -> Result<i64> {
        let conn = self.conn()?;
        let mandate = &outcome.mandate;
        let payload = serde_json::to_string(outcome)?;

        conn.execute(
            "INSERT INTO analyses
             (generated_at, underlying, regime, composite, confidence, vetoed,
              template, fingerprint, config_hash, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                mandate.generated_at.to_rfc3339(),
                mandate.underlying.as_str(),
                mandate.regime.label.to_string(),
                mandate.regime.composite,
                mandate.regime.confidence,
                mandate.gate.vetoed,
                mandate.template.name(),
                mandate.fingerprint,
                config_hash,
                payload,
            ],
        )?;
        let id = conn.last_insert_rowid();

        debug!(
            "Saved analysis {}: {} {} ({})",
            id,
            mandate.regime.label,
            mandate.template.name(),
            &mandate.fingerprint[..mandate.fingerprint.len().min(12)]
        );

        if self.auto_backup {
            drop(conn);
            self.export_json()?;
        }

        Ok(id)
    }

    pub fn latest(&self) -> Result<Option<StoredAnalysis>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, config_hash, outcome FROM analyses ORDER BY id DESC LIMIT 1",
        )?;

        let row = stmt.query_row([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, String>(3)?,
            ))
        });

        match row {
            Ok((id, created_at, config_hash, payload)) => Ok(Some(StoredAnalysis {
                id,
                created_at,
                config_hash,
                outcome: serde_json::from_str(&payload)
                    .with_context(|| format!("Corrupt outcome payload in analysis {}", id))?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent analyses, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<AnalysisSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, generated_at, underlying, regime, composite, confidence,
                    vetoed, template, fingerprint
             FROM analyses ORDER BY id DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AnalysisSummary {
                    id: row.get(0)?,
                    generated_at: row.get(1)?,
                    underlying: row.get(2)?,
                    regime: row.get(3)?,
                    composite: row.get(4)?,
                    confidence: row.get(5)?,
                    vetoed: row.get(6)?,
                    template: row.get(7)?,
                    fingerprint: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Loaded {} analyses", rows.len());
        Ok(rows)
    }

    pub fn export_json(&self) -> Result<()> {
        let latest = self.latest()?;
        let history = self.recent(50)?;

        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "latest": latest,
            "history": history,
        });

        std::fs::write(&self.json_backup_path, serde_json::to_string_pretty(&state)?)?;
        debug!("State exported to: {}", self.json_backup_path.display());
        Ok(())
    }
}

// =============================================================================
// Factory Function
// =============================================================================

/// Database at `db_path` with a JSON backup next to it
pub fn create_state_manager<P: AsRef<Path>>(db_path: P) -> Result<SqliteStateManager> {
    let db_path = db_path.as_ref();
    let json_path = db_path.with_extension("json");
    SqliteStateManager::new(db_path.to_path_buf(), json_path, true)
}
