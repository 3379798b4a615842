use duckdb::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};

/// Owns one DuckDB connection per facility, opened lazily on first use and
/// kept for the lifetime of the process (spec.md §3, "embedded, single-writer
/// analytical store per facility"). DuckDB serializes writers internally, but
/// the `Mutex` also gives every caller a stable place to run multi-statement
/// transactions without another task's query interleaving mid-transaction.
pub struct LakeStore {
    storage: StorageConfig,
    connections: RwLock<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl LakeStore {
    pub fn new(storage: StorageConfig) -> Self {
        Self {
            storage,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Return the connection for `facility`, opening and schema-initializing
    /// it on first access. Double-checked locking avoids serializing every
    /// request behind the write lock once the map is warm.
    pub fn get(&self, facility: &str) -> AppResult<Arc<Mutex<Connection>>> {
        if let Some(conn) = self.connections.read().unwrap().get(facility) {
            return Ok(conn.clone());
        }

        let mut guard = self.connections.write().unwrap();
        if let Some(conn) = guard.get(facility) {
            return Ok(conn.clone());
        }

        let path = self.storage.lake_path(facility);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Internal(format!("creating lake dir: {e}")))?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| AppError::StoreUnavailable(format!("opening lake for {facility}: {e}")))?;
        init_schema(&conn)?;

        let conn = Arc::new(Mutex::new(conn));
        guard.insert(facility.to_string(), conn.clone());
        tracing::info!(facility, path = %path.display(), "opened analytical store");
        Ok(conn)
    }

    /// Liveness probe for `GET /health`: open (or reuse) a facility's lake
    /// and run a trivial query against it.
    pub fn ping(&self, facility: &str) -> AppResult<()> {
        let conn = self.get(facility)?;
        let conn = conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| AppError::StoreUnavailable(format!("pinging lake for {facility}: {e}")))?;
        Ok(())
    }

    /// Facilities with an on-disk lake, discovered from the lake directory
    /// rather than tracked in memory, so a freshly restarted process still
    /// finds every facility for scheduled jobs (mart refresh, retention).
    pub fn known_facilities(&self) -> AppResult<Vec<String>> {
        let dir = self.storage.base_dir.join("lake");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut facilities = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| AppError::Internal(e.to_string()))? {
            let entry = entry.map_err(|e| AppError::Internal(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("duckdb") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    facilities.push(stem.to_string());
                }
            }
        }
        facilities.sort();
        Ok(facilities)
    }
}

fn init_schema(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS inspection_raw (
            product_id        VARCHAR NOT NULL,
            panel_id          VARCHAR NOT NULL,
            panel_addr        VARCHAR NOT NULL,
            panel_x           VARCHAR NOT NULL,
            panel_y           VARCHAR NOT NULL,
            process_code      VARCHAR NOT NULL,
            equipment_line_id VARCHAR NOT NULL,
            model_code        VARCHAR NOT NULL,
            defect_term       VARCHAR NOT NULL,
            defect_name       VARCHAR NOT NULL,
            defect_x          DOUBLE NOT NULL,
            defect_y          DOUBLE NOT NULL,
            defect_count      BIGINT NOT NULL,
            inspection_end_ts TIMESTAMP NOT NULL
        );

        CREATE TABLE IF NOT EXISTS history_raw (
            product_id                    VARCHAR NOT NULL,
            lot_id                        VARCHAR NOT NULL,
            process_code                  VARCHAR NOT NULL,
            equipment_line_id             VARCHAR NOT NULL,
            equipment_machine_id          VARCHAR NOT NULL,
            equipment_path_id             VARCHAR NOT NULL,
            move_in_ts                    TIMESTAMP NOT NULL,
            equipment_hierarchy_type_code VARCHAR NOT NULL
        );

        CREATE TABLE IF NOT EXISTS glass_stats (
            product_id     VARCHAR NOT NULL,
            lot_id         VARCHAR NOT NULL,
            model_code     VARCHAR NOT NULL,
            work_date      DATE NOT NULL,
            defect_name    VARCHAR NOT NULL,
            total_defects  BIGINT NOT NULL,
            panel_addrs    VARCHAR[] NOT NULL,
            panel_map      BIGINT[] NOT NULL
        );
        ",
    )
    .map_err(|e| AppError::Internal(format!("initializing lake schema: {e}")))?;
    Ok(())
}
