//! The worker poll loop.

use std::time::{Duration, Instant};

use tracing::{error, info};

use brandbrain_compile::{CompileWorker, PollOutcome};

use crate::shutdown::ShutdownFlag;

pub struct RunnerOptions {
    pub poll_interval_s: u64,
    pub stale_check_interval_s: u64,
    pub max_jobs: Option<u64>,
    pub once: bool,
    pub dry_run: bool,
}

/// Poll for jobs until shutdown, `--once` completes a job, or `--max-jobs`
/// is reached. A stale-lease sweep runs on its own interval in between
/// polls; in-progress jobs are never interrupted.
pub async fn run(
    worker: &CompileWorker,
    options: &RunnerOptions,
    shutdown: &ShutdownFlag,
) -> anyhow::Result<()> {
    let poll_interval = Duration::from_secs(options.poll_interval_s.max(1));
    let stale_interval = Duration::from_secs(options.stale_check_interval_s.max(1));
    let mut last_sweep = Instant::now();
    let mut processed: u64 = 0;

    while !shutdown.is_requested() {
        if last_sweep.elapsed() >= stale_interval {
            match worker.sweep_stale().await {
                Ok(0) => {}
                Ok(released) => info!("Stale sweep released {} job(s)", released),
                Err(e) => error!("Stale sweep failed: {}", e),
            }
            last_sweep = Instant::now();
        }

        match worker.poll_once(options.dry_run).await {
            Ok(PollOutcome::Processed { job_id, status }) => {
                processed += 1;
                info!("Processed job {} -> {} ({} total)", job_id, status, processed);
                if options.once {
                    break;
                }
                if let Some(max) = options.max_jobs {
                    if processed >= max {
                        info!("Reached max-jobs {}", max);
                        break;
                    }
                }
            }
            Ok(PollOutcome::Idle) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = wait_for(shutdown) => {}
                }
            }
            Err(e) => {
                error!("Worker poll failed: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = wait_for(shutdown) => {}
                }
            }
        }
    }

    Ok(())
}

/// Resolve once the shutdown flag is set; lets idle sleeps end early.
async fn wait_for(shutdown: &ShutdownFlag) {
    while !shutdown.is_requested() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_resolves_on_request() {
        let flag = ShutdownFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { wait_for(&flag).await })
        };
        flag.request();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_for must resolve after request")
            .unwrap();
    }
}
