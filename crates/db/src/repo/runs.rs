use mediatrend_core::report::JobReport;
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: String,
    pub job_key: String,
    pub platform: String,
    pub media_type: String,
    pub country: String,
    pub trigger: String,
    pub status: String,
    pub started_ts: i64,
    pub finished_ts: Option<i64>,
    pub added: i64,
    pub already_present: i64,
    pub unresolved: i64,
    pub failed: i64,
    pub failure_kind: Option<String>,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunTitleRow {
    pub run_id: String,
    pub rank: i64,
    pub raw_title: String,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub canonical_title: Option<String>,
    pub year: Option<i64>,
    pub status: String,
    pub failure_kind: Option<String>,
    pub reason: Option<String>,
}

type RunTuple = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<i64>,
    i64,
    i64,
    i64,
    i64,
    Option<String>,
    Option<String>,
);

const RUN_COLUMNS: &str = "id, job_key, platform, media_type, country, trigger, status, \
     started_ts, finished_ts, added, already_present, unresolved, failed, \
     failure_kind, failure_message";

/// Record the start of a run. The row stays `running` until [`finish_run`].
pub async fn insert_run(pool: &SqlitePool, report: &JobReport) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO job_run (id, job_key, platform, media_type, country, trigger, status, started_ts) \
         VALUES (?, ?, ?, ?, ?, ?, 'running', ?)",
    )
    .bind(&report.run_id)
    .bind(report.job.to_string())
    .bind(&report.job.platform)
    .bind(report.job.media_type.as_str())
    .bind(&report.job.country)
    .bind(report.trigger.as_str())
    .bind(report.started_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Store the final counts and per-title outcomes of a run in one transaction.
///
/// Upserts the run row, so a report whose start was never recorded is still kept.
pub async fn finish_run(pool: &SqlitePool, report: &JobReport) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let finished_ts = report
        .finished_at
        .unwrap_or_else(chrono::Utc::now)
        .timestamp();
    let (failure_kind, failure_message) = match &report.failure {
        Some(f) => (Some(f.kind.as_str()), Some(f.message.as_str())),
        None => (None, None),
    };

    sqlx::query(
        "INSERT INTO job_run (id, job_key, platform, media_type, country, trigger, status, \
             started_ts, finished_ts, added, already_present, unresolved, failed, \
             failure_kind, failure_message) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET status = excluded.status, \
             finished_ts = excluded.finished_ts, added = excluded.added, \
             already_present = excluded.already_present, unresolved = excluded.unresolved, \
             failed = excluded.failed, failure_kind = excluded.failure_kind, \
             failure_message = excluded.failure_message",
    )
    .bind(&report.run_id)
    .bind(report.job.to_string())
    .bind(&report.job.platform)
    .bind(report.job.media_type.as_str())
    .bind(&report.job.country)
    .bind(report.trigger.as_str())
    .bind(report.status().as_str())
    .bind(report.started_at.timestamp())
    .bind(finished_ts)
    .bind(i64::from(report.counts.added))
    .bind(i64::from(report.counts.already_present))
    .bind(i64::from(report.counts.unresolved))
    .bind(i64::from(report.counts.failed))
    .bind(failure_kind)
    .bind(failure_message)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM job_run_title WHERE run_id = ?")
        .bind(&report.run_id)
        .execute(&mut *tx)
        .await?;

    for t in &report.titles {
        let canonical = t.canonical.as_ref();
        sqlx::query(
            "INSERT INTO job_run_title (run_id, rank, raw_title, tmdb_id, tvdb_id, \
                 canonical_title, year, status, failure_kind, reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.run_id)
        .bind(i64::from(t.rank))
        .bind(&t.raw_title)
        .bind(canonical.map(|c| c.tmdb_id as i64))
        .bind(canonical.and_then(|c| c.tvdb_id).map(|id| id as i64))
        .bind(canonical.map(|c| c.title.as_str()))
        .bind(canonical.and_then(|c| c.year).map(i64::from))
        .bind(t.status.as_str())
        .bind(t.failure_kind.map(|k| k.as_str()))
        .bind(t.reason.as_deref())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Latest runs first, optionally restricted to one job.
pub async fn list_runs(
    pool: &SqlitePool,
    job_key: Option<&str>,
    limit: i64,
) -> Result<Vec<RunRow>, sqlx::Error> {
    let rows: Vec<RunTuple> = match job_key {
        Some(key) => {
            sqlx::query_as(&format!(
                "SELECT {RUN_COLUMNS} FROM job_run WHERE job_key = ? \
                 ORDER BY started_ts DESC, rowid DESC LIMIT ?"
            ))
            .bind(key)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(&format!(
                "SELECT {RUN_COLUMNS} FROM job_run ORDER BY started_ts DESC, rowid DESC LIMIT ?"
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(row_to_run).collect())
}

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<RunRow>, sqlx::Error> {
    let row: Option<RunTuple> =
        sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM job_run WHERE id = ?"))
            .bind(run_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(row_to_run))
}

pub async fn list_run_titles(
    pool: &SqlitePool,
    run_id: &str,
) -> Result<Vec<RunTitleRow>, sqlx::Error> {
    let rows: Vec<(
        String,
        i64,
        String,
        Option<i64>,
        Option<i64>,
        Option<String>,
        Option<i64>,
        String,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT run_id, rank, raw_title, tmdb_id, tvdb_id, canonical_title, year, status, \
             failure_kind, reason \
         FROM job_run_title WHERE run_id = ? ORDER BY rank",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| RunTitleRow {
            run_id: r.0,
            rank: r.1,
            raw_title: r.2,
            tmdb_id: r.3,
            tvdb_id: r.4,
            canonical_title: r.5,
            year: r.6,
            status: r.7,
            failure_kind: r.8,
            reason: r.9,
        })
        .collect())
}

/// Most recent finished run of every job that has one.
pub async fn latest_finished_per_job(pool: &SqlitePool) -> Result<Vec<RunRow>, sqlx::Error> {
    let rows: Vec<RunTuple> = sqlx::query_as(&format!(
        "SELECT {RUN_COLUMNS} FROM job_run r \
         WHERE finished_ts IS NOT NULL AND rowid = ( \
             SELECT rowid FROM job_run i \
             WHERE i.job_key = r.job_key AND i.finished_ts IS NOT NULL \
             ORDER BY i.started_ts DESC, i.rowid DESC LIMIT 1)"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_run).collect())
}

/// Close out runs left `running` by a previous process.
pub async fn fail_interrupted_runs(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "UPDATE job_run SET status = 'failed', finished_ts = ?, failure_kind = 'internal', \
             failure_message = 'interrupted by shutdown' \
         WHERE status = 'running'",
    )
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Finished runs started before the cutoff, minus each job's newest finished run.
const PRUNABLE_RUNS: &str = "SELECT id FROM job_run r \
     WHERE r.finished_ts IS NOT NULL AND r.status != 'running' AND r.finished_ts < ? \
       AND r.rowid != ( \
           SELECT rowid FROM job_run i \
           WHERE i.job_key = r.job_key AND i.finished_ts IS NOT NULL \
           ORDER BY i.started_ts DESC, i.rowid DESC LIMIT 1)";

/// Delete finished runs older than `cutoff` together with their titles.
/// Returns the number of runs removed.
pub async fn prune_finished_before(
    pool: &SqlitePool,
    cutoff: chrono::DateTime<chrono::Utc>,
) -> Result<u64, sqlx::Error> {
    let cutoff = cutoff.timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        "DELETE FROM job_run_title WHERE run_id IN ({PRUNABLE_RUNS})"
    ))
    .bind(cutoff)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(&format!("DELETE FROM job_run WHERE id IN ({PRUNABLE_RUNS})"))
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}

fn row_to_run(r: RunTuple) -> RunRow {
    RunRow {
        id: r.0,
        job_key: r.1,
        platform: r.2,
        media_type: r.3,
        country: r.4,
        trigger: r.5,
        status: r.6,
        started_ts: r.7,
        finished_ts: r.8,
        added: r.9,
        already_present: r.10,
        unresolved: r.11,
        failed: r.12,
        failure_kind: r.13,
        failure_message: r.14,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mediatrend_core::error::FailureKind;
    use mediatrend_core::report::{SubmissionOutcome, Trigger};
    use mediatrend_core::types::{CanonicalId, JobKey, MediaType};

    async fn pool() -> SqlitePool {
        let pool = crate::connect(":memory:").await.unwrap();
        crate::migrate::run(&pool).await.unwrap();
        pool
    }

    fn report(key: &JobKey, started: chrono::DateTime<Utc>) -> JobReport {
        JobReport::new(key.clone(), Trigger::Scheduled, started)
    }

    #[tokio::test]
    async fn run_lifecycle_round_trips_titles() {
        let pool = pool().await;
        let key = JobKey::new("netflix", MediaType::Movie, "US");
        let mut r = report(&key, Utc::now());
        insert_run(&pool, &r).await.unwrap();

        let row = get_run(&pool, &r.run_id).await.unwrap().unwrap();
        assert_eq!(row.status, "running");
        assert_eq!(row.job_key, "netflix.movie.US");
        assert!(row.finished_ts.is_none());

        let id = CanonicalId {
            tmdb_id: 603,
            tvdb_id: None,
            title: "The Matrix".into(),
            year: Some(1999),
        };
        r.record_submission(1, "The Matrix", Some(id), SubmissionOutcome::Added);
        r.record_unresolved(2, "Obscure Show Ep 2", "no candidate above threshold");
        let r = r.finish(Utc::now());
        finish_run(&pool, &r).await.unwrap();

        let row = get_run(&pool, &r.run_id).await.unwrap().unwrap();
        assert_eq!(row.status, "succeeded");
        assert_eq!((row.added, row.unresolved), (1, 1));

        let titles = list_run_titles(&pool, &r.run_id).await.unwrap();
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[0].tmdb_id, Some(603));
        assert_eq!(titles[0].year, Some(1999));
        assert_eq!(titles[1].status, "unresolved");
        assert!(titles[1].reason.is_some());
    }

    #[tokio::test]
    async fn finish_without_start_still_records() {
        let pool = pool().await;
        let key = JobKey::new("hbo", MediaType::Series, "DE");
        let mut r = report(&key, Utc::now());
        r.fail(FailureKind::SourceFormatChanged, "no ranked list");
        let r = r.finish(Utc::now());
        finish_run(&pool, &r).await.unwrap();

        let row = get_run(&pool, &r.run_id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.failure_kind.as_deref(), Some("source_format_changed"));
    }

    #[tokio::test]
    async fn latest_per_job_picks_newest_finished() {
        let pool = pool().await;
        let a = JobKey::new("netflix", MediaType::Movie, "US");
        let b = JobKey::new("disney", MediaType::Movie, "WORLD");
        let t0 = Utc::now() - Duration::hours(3);

        let old = report(&a, t0).finish(t0 + Duration::minutes(1));
        finish_run(&pool, &old).await.unwrap();
        let new = report(&a, t0 + Duration::hours(1)).finish(t0 + Duration::hours(1));
        finish_run(&pool, &new).await.unwrap();
        // Still running, must not shadow the finished one.
        insert_run(&pool, &report(&a, t0 + Duration::hours(2)))
            .await
            .unwrap();
        let other = report(&b, t0).finish(t0);
        finish_run(&pool, &other).await.unwrap();

        let mut latest = latest_finished_per_job(&pool).await.unwrap();
        latest.sort_by(|x, y| x.job_key.cmp(&y.job_key));
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].job_key, "disney.movie.WORLD");
        assert_eq!(latest[1].id, new.run_id);
    }

    #[tokio::test]
    async fn list_runs_orders_and_filters() {
        let pool = pool().await;
        let a = JobKey::new("netflix", MediaType::Movie, "US");
        let b = JobKey::new("netflix", MediaType::Series, "US");
        let t0 = Utc::now() - Duration::hours(1);
        for (i, key) in [&a, &b, &a].into_iter().enumerate() {
            let started = t0 + Duration::minutes(i as i64);
            finish_run(&pool, &report(key, started).finish(started))
                .await
                .unwrap();
        }

        let all = list_runs(&pool, None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].started_ts >= all[1].started_ts);

        let only_a = list_runs(&pool, Some("netflix.movie.US"), 10).await.unwrap();
        assert_eq!(only_a.len(), 2);

        let limited = list_runs(&pool, None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn prune_keeps_recent_and_newest_per_job() {
        let pool = pool().await;
        let a = JobKey::new("netflix", MediaType::Movie, "US");
        let b = JobKey::new("hbo", MediaType::Series, "DE");
        let now = Utc::now();
        let long_ago = now - Duration::days(200);

        let mut stale = report(&a, long_ago);
        stale.record_unresolved(1, "Old Title", "no search results");
        let stale = stale.finish(long_ago);
        finish_run(&pool, &stale).await.unwrap();
        let recent = report(&a, now - Duration::days(1)).finish(now - Duration::days(1));
        finish_run(&pool, &recent).await.unwrap();
        // Only run of its job, kept however old.
        let lone = report(&b, long_ago).finish(long_ago);
        finish_run(&pool, &lone).await.unwrap();
        let running = report(&b, long_ago);
        insert_run(&pool, &running).await.unwrap();

        let removed = prune_finished_before(&pool, now - Duration::days(90))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(get_run(&pool, &stale.run_id).await.unwrap().is_none());
        assert!(list_run_titles(&pool, &stale.run_id).await.unwrap().is_empty());
        assert!(get_run(&pool, &recent.run_id).await.unwrap().is_some());
        assert!(get_run(&pool, &lone.run_id).await.unwrap().is_some());
        assert!(get_run(&pool, &running.run_id).await.unwrap().is_some());
        assert_eq!(
            prune_finished_before(&pool, now - Duration::days(90))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn interrupted_runs_are_closed() {
        let pool = pool().await;
        let key = JobKey::new("netflix", MediaType::Movie, "US");
        let r = report(&key, Utc::now());
        insert_run(&pool, &r).await.unwrap();

        assert_eq!(fail_interrupted_runs(&pool).await.unwrap(), 1);
        let row = get_run(&pool, &r.run_id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.failure_kind.as_deref(), Some("internal"));
        assert_eq!(fail_interrupted_runs(&pool).await.unwrap(), 0);
    }
}
