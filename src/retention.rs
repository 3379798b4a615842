use std::sync::Arc;
use std::time::Duration;

use crate::config::RetentionConfig;
use crate::config_db::ConfigDb;
use crate::store::LakeStore;

/// Scheduled cleanup: purge raw rows past `data_days`, expired cache entries
/// and stale job rows past `analysis_days`/TTL, one facility at a time. Modeled
/// directly on `retention_enforcer.rs`'s spawn/tick/enforce shape, re-targeted
/// at the per-facility DuckDB lakes and the operational SQLite store instead
/// of ClickHouse `ALTER TABLE ... DELETE`.
pub fn spawn_retention_sweep(store: Arc<LakeStore>, config_db: Arc<ConfigDb>, config: RetentionConfig) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        tracing::info!(
            interval_secs = config.cleanup_interval_secs,
            data_days = config.data_days,
            analysis_days = config.analysis_days,
            "retention sweep: started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = sweep(&store, &config_db, &config) {
                tracing::error!("retention sweep error: {e}");
            }
        }
    });
}

/// One sweep pass, also exposed directly for `POST /api/cleanup` to call
/// synchronously (spec.md §6).
pub fn sweep(store: &LakeStore, config_db: &ConfigDb, config: &RetentionConfig) -> anyhow::Result<()> {
    for facility in store.known_facilities()? {
        let conn = store.get(&facility)?;
        let (inspection_deleted, history_deleted) = {
            let conn = conn.lock().unwrap();
            let cutoff = format!("current_date - INTERVAL {} DAY", config.data_days);
            let inspection_deleted = conn.execute(
                &format!("DELETE FROM inspection_raw WHERE CAST(inspection_end_ts AS DATE) < {cutoff}"),
                [],
            )?;
            let history_deleted = conn.execute(
                &format!("DELETE FROM history_raw WHERE CAST(move_in_ts AS DATE) < {cutoff}"),
                [],
            )?;
            (inspection_deleted as u64, history_deleted as u64)
        };
        config_db.record_retention_run(&facility, inspection_deleted, history_deleted)?;
        tracing::info!(facility, inspection_deleted, history_deleted, "retention sweep: facility done");
    }

    let cutoff = (chrono::Utc::now() - chrono::Duration::days(config.analysis_days as i64))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let jobs_purged = config_db.delete_jobs_older_than(&cutoff)?;
    let cache_purged = config_db.purge_expired_cache()?;
    tracing::info!(jobs_purged, cache_purged, "retention sweep: operational store trimmed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    #[test]
    fn sweep_runs_cleanly_against_empty_stores() {
        let dir = tempfile::tempdir().unwrap();
        let store = LakeStore::new(StorageConfig {
            base_dir: dir.path().to_path_buf(),
        });
        store.get("fab1").unwrap();
        let config_db = ConfigDb::open(":memory:").unwrap();
        let config = RetentionConfig {
            data_days: 90,
            analysis_days: 14,
            cleanup_interval_secs: 3600,
        };

        sweep(&store, &config_db, &config).unwrap();
        assert!(config_db.get_retention_state("fab1").unwrap().is_some());
    }
}
