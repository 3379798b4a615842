use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;

/// The operational store: job bookkeeping, the result cache, retention
/// watermarks and the mart-refresh audit log. One SQLite file per process,
/// shared across all facilities (the analytical data itself lives in the
/// per-facility DuckDB lakes managed by `store.rs`).
pub struct ConfigDb {
    conn: Mutex<Connection>,
}

/// A cached analysis result plus its expiry, as stored under a fingerprinted
/// cache key (spec.md §5, "Caching").
pub struct CacheEntry {
    pub result_json: String,
    pub expires_at: String,
}

/// A persisted row of the `jobs` table (spec.md §3, AnalysisJob).
pub struct JobRow {
    pub job_id: String,
    pub status: String,
    pub cache_key: String,
    pub facility: String,
    pub progress: u8,
    pub error_message: Option<String>,
    pub result_json: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConfigDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                job_id        TEXT PRIMARY KEY,
                status        TEXT NOT NULL CHECK(status IN ('pending','running','completed','failed')),
                cache_key     TEXT NOT NULL,
                facility      TEXT NOT NULL,
                progress      INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                result_json   TEXT,
                created_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_cache_key ON jobs(cache_key);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_key   TEXT PRIMARY KEY,
                facility    TEXT NOT NULL,
                result_json TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                expires_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);

            CREATE TABLE IF NOT EXISTS facility_retention_state (
                facility                 TEXT PRIMARY KEY,
                last_cleanup_at          TEXT,
                rows_deleted_inspection  INTEGER NOT NULL DEFAULT 0,
                rows_deleted_history     INTEGER NOT NULL DEFAULT 0,
                updated_at               TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS mart_refresh_log (
                id           TEXT PRIMARY KEY,
                facility     TEXT NOT NULL,
                started_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                finished_at  TEXT,
                rows_created INTEGER,
                status       TEXT NOT NULL DEFAULT 'running' CHECK(status IN ('running','success','failed')),
                error_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_mart_refresh_facility ON mart_refresh_log(facility, started_at DESC);
            ",
        )?;
        Ok(())
    }

    // ── Job operations ──

    pub fn create_job(&self, job_id: &str, cache_key: &str, facility: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (job_id, status, cache_key, facility) VALUES (?1, 'pending', ?2, ?3)",
            params![job_id, cache_key, facility],
        )?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> anyhow::Result<Option<JobRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, status, cache_key, facility, progress, error_message, result_json, created_at, updated_at \
             FROM jobs WHERE job_id = ?1",
        )?;
        let row = stmt
            .query_row(params![job_id], |row| {
                Ok(JobRow {
                    job_id: row.get(0)?,
                    status: row.get(1)?,
                    cache_key: row.get(2)?,
                    facility: row.get(3)?,
                    progress: row.get(4)?,
                    error_message: row.get(5)?,
                    result_json: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn mark_job_running(&self, job_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'running', updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    pub fn update_job_progress(&self, job_id: &str, progress: u8) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET progress = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE job_id = ?1",
            params![job_id, progress],
        )?;
        Ok(())
    }

    pub fn mark_job_completed(&self, job_id: &str, result_json: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'completed', progress = 100, result_json = ?2, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE job_id = ?1",
            params![job_id, result_json],
        )?;
        Ok(())
    }

    pub fn mark_job_failed(&self, job_id: &str, error_message: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'failed', error_message = ?2, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE job_id = ?1",
            params![job_id, error_message],
        )?;
        Ok(())
    }

    /// The most recent non-failed job for a cache key, used to short-circuit
    /// duplicate submissions of the same analysis while one is in flight.
    pub fn find_active_job_by_cache_key(&self, cache_key: &str) -> anyhow::Result<Option<JobRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, status, cache_key, facility, progress, error_message, result_json, created_at, updated_at \
             FROM jobs WHERE cache_key = ?1 AND status IN ('pending','running') \
             ORDER BY created_at DESC LIMIT 1",
        )?;
        let row = stmt
            .query_row(params![cache_key], |row| {
                Ok(JobRow {
                    job_id: row.get(0)?,
                    status: row.get(1)?,
                    cache_key: row.get(2)?,
                    facility: row.get(3)?,
                    progress: row.get(4)?,
                    error_message: row.get(5)?,
                    result_json: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn delete_jobs_older_than(&self, cutoff: &str) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute("DELETE FROM jobs WHERE created_at < ?1", params![cutoff])?;
        Ok(count)
    }

    // ── Cache operations ──

    pub fn get_cache_entry(&self, cache_key: &str) -> anyhow::Result<Option<CacheEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT result_json, expires_at FROM cache_entries \
             WHERE cache_key = ?1 AND expires_at > strftime('%Y-%m-%dT%H:%M:%SZ','now')",
        )?;
        let row = stmt
            .query_row(params![cache_key], |row| {
                Ok(CacheEntry {
                    result_json: row.get(0)?,
                    expires_at: row.get(1)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn put_cache_entry(
        &self,
        cache_key: &str,
        facility: &str,
        result_json: &str,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cache_entries (cache_key, facility, result_json, expires_at) \
             VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%SZ', 'now', ?4)) \
             ON CONFLICT(cache_key) DO UPDATE SET result_json = ?3, \
             expires_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now', ?4), created_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![cache_key, facility, result_json, format!("+{ttl_secs} seconds")],
        )?;
        Ok(())
    }

    pub fn purge_expired_cache(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            [],
        )?;
        Ok(count)
    }

    // ── Retention state operations ──

    pub fn get_retention_state(&self, facility: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT last_cleanup_at FROM facility_retention_state WHERE facility = ?1")?;
        let row = stmt
            .query_row(params![facility], |row| row.get::<_, Option<String>>(0))
            .optional()?
            .flatten();
        Ok(row)
    }

    pub fn record_retention_run(
        &self,
        facility: &str,
        rows_deleted_inspection: u64,
        rows_deleted_history: u64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO facility_retention_state (facility, last_cleanup_at, rows_deleted_inspection, rows_deleted_history) \
             VALUES (?1, strftime('%Y-%m-%dT%H:%M:%SZ','now'), ?2, ?3) \
             ON CONFLICT(facility) DO UPDATE SET last_cleanup_at = strftime('%Y-%m-%dT%H:%M:%SZ','now'), \
             rows_deleted_inspection = facility_retention_state.rows_deleted_inspection + ?2, \
             rows_deleted_history = facility_retention_state.rows_deleted_history + ?3, \
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![facility, rows_deleted_inspection, rows_deleted_history],
        )?;
        Ok(())
    }

    // ── Mart refresh log operations ──

    pub fn start_mart_refresh(&self, id: &str, facility: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO mart_refresh_log (id, facility, status) VALUES (?1, ?2, 'running')",
            params![id, facility],
        )?;
        Ok(())
    }

    pub fn finish_mart_refresh(&self, id: &str, rows_created: u64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE mart_refresh_log SET status = 'success', rows_created = ?2, \
             finished_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?1",
            params![id, rows_created],
        )?;
        Ok(())
    }

    pub fn fail_mart_refresh(&self, id: &str, error_message: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE mart_refresh_log SET status = 'failed', error_message = ?2, \
             finished_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?1",
            params![id, error_message],
        )?;
        Ok(())
    }

    /// Liveness probe for `GET /health` (spec.md §6).
    pub fn ping(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(())).map_err(Into::into)
    }

    pub fn last_successful_mart_refresh(&self, facility: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT finished_at FROM mart_refresh_log WHERE facility = ?1 AND status = 'success' \
             ORDER BY finished_at DESC LIMIT 1",
        )?;
        let row = stmt
            .query_row(params![facility], |row| row.get::<_, Option<String>>(0))
            .optional()?
            .flatten();
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_db() -> ConfigDb {
        ConfigDb::open(":memory:").unwrap()
    }

    #[test]
    fn job_lifecycle() {
        let db = open_test_db();
        db.create_job("job-1", "key-1", "fab1").unwrap();
        let job = db.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, "pending");

        db.mark_job_running("job-1").unwrap();
        assert_eq!(db.get_job("job-1").unwrap().unwrap().status, "running");

        db.update_job_progress("job-1", 42).unwrap();
        assert_eq!(db.get_job("job-1").unwrap().unwrap().progress, 42);

        db.mark_job_completed("job-1", "{\"ok\":true}").unwrap();
        let job = db.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.result_json.as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn cache_roundtrip_and_expiry() {
        let db = open_test_db();
        db.put_cache_entry("key-1", "fab1", "{\"v\":1}", 3600).unwrap();
        let entry = db.get_cache_entry("key-1").unwrap().unwrap();
        assert_eq!(entry.result_json, "{\"v\":1}");

        db.put_cache_entry("key-expired", "fab1", "{\"v\":2}", 0).unwrap();
        assert!(db.get_cache_entry("key-expired").unwrap().is_none());
    }

    #[test]
    fn retention_state_accumulates() {
        let db = open_test_db();
        assert!(db.get_retention_state("fab1").unwrap().is_none());
        db.record_retention_run("fab1", 10, 20).unwrap();
        db.record_retention_run("fab1", 5, 5).unwrap();
        assert!(db.get_retention_state("fab1").unwrap().is_some());
    }

    #[test]
    fn ping_succeeds_against_fresh_db() {
        let db = open_test_db();
        db.ping().unwrap();
    }

    #[test]
    fn mart_refresh_log_tracks_success_and_failure() {
        let db = open_test_db();
        db.start_mart_refresh("run-1", "fab1").unwrap();
        assert!(db.last_successful_mart_refresh("fab1").unwrap().is_none());
        db.finish_mart_refresh("run-1", 1234).unwrap();
        assert!(db.last_successful_mart_refresh("fab1").unwrap().is_some());

        db.start_mart_refresh("run-2", "fab1").unwrap();
        db.fail_mart_refresh("run-2", "boom").unwrap();
    }
}
