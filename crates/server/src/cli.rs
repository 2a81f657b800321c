//! Interactive text menu for `--cli`.

use std::io::Write;
use std::time::Duration;

use mediatrend_core::types::JobKey;
use mediatrend_db::repo::runs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::scheduler::JobView;
use crate::state::AppState;

const MENU: &str = "\
1) List jobs
2) Run a job now
3) Show recent runs
4) Show recent logs
0) Exit";

/// Read menu choices from `input` until exit or end of input.
pub async fn run_menu<R, W>(state: &AppState, input: R, mut out: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        writeln!(out, "\n{MENU}")?;
        write!(out, "> ")?;
        out.flush()?;

        let Some(choice) = lines.next_line().await? else {
            break;
        };
        match choice.trim() {
            "1" => print_jobs(&mut out, &state.scheduler.job_views())?,
            "2" => {
                let jobs = state.scheduler.job_views();
                print_jobs(&mut out, &jobs)?;
                write!(out, "Job number: ")?;
                out.flush()?;
                let Some(answer) = lines.next_line().await? else {
                    break;
                };
                run_selected(state, &mut out, &jobs, answer.trim()).await?;
            }
            "3" => print_runs(state, &mut out).await?,
            "4" => {
                for line in state.logs.recent(50) {
                    writeln!(
                        out,
                        "{} {:5} {}",
                        line.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        line.level,
                        line.message
                    )?;
                }
            }
            "0" | "q" | "exit" => break,
            "" => {}
            other => writeln!(out, "Unknown choice '{other}'")?,
        }
    }
    writeln!(out, "Bye")?;
    Ok(())
}

fn print_jobs<W: Write>(out: &mut W, jobs: &[JobView]) -> std::io::Result<()> {
    if jobs.is_empty() {
        return writeln!(out, "No jobs configured");
    }
    for (i, job) in jobs.iter().enumerate() {
        let state = if job.running {
            "running"
        } else if job.enabled && job.source_enabled {
            "enabled"
        } else {
            "disabled"
        };
        let last = job
            .last_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "never run".into());
        writeln!(out, "{:>3}) {:<28} {:<9} last: {}", i + 1, job.key, state, last)?;
    }
    Ok(())
}

async fn run_selected<W: Write>(
    state: &AppState,
    out: &mut W,
    jobs: &[JobView],
    answer: &str,
) -> anyhow::Result<()> {
    let Some(job) = answer
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| jobs.get(i))
    else {
        writeln!(out, "No job '{answer}'")?;
        return Ok(());
    };
    let key: JobKey = job.key.parse().map_err(anyhow::Error::msg)?;

    if let Err(e) = state.scheduler.run_now(&key) {
        writeln!(out, "Cannot run {}: {e}", job.key)?;
        return Ok(());
    }
    writeln!(out, "Running {} ...", job.key)?;
    while state.scheduler.is_running(&key) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    match state
        .scheduler
        .job_views()
        .into_iter()
        .find(|v| v.key == job.key)
        .and_then(|v| v.last_status)
    {
        Some(status) => writeln!(out, "Finished: {status}")?,
        None => writeln!(out, "Run did not complete")?,
    }
    Ok(())
}

async fn print_runs<W: Write>(state: &AppState, out: &mut W) -> anyhow::Result<()> {
    let rows = runs::list_runs(&state.db, None, 10).await?;
    if rows.is_empty() {
        writeln!(out, "No runs yet")?;
    }
    for r in rows {
        let started = chrono::DateTime::from_timestamp(r.started_ts, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        writeln!(
            out,
            "{started} {:<28} {:<16} +{} ={} ?{} !{}{}",
            r.job_key,
            r.status,
            r.added,
            r.already_present,
            r.unresolved,
            r.failed,
            r.failure_message
                .map(|m| format!("  ({m})"))
                .unwrap_or_default()
        )?;
    }
    Ok(())
}
