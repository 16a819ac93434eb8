//! Poll-mode trigger: start a run on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::server::RunRegistry;
use crate::workflow::{RunContext, RunState, WorkflowEngine};

/// Spawn a background task that starts one run per tick.
///
/// Ticks are not overlapped: a tick that comes due while a run is still in
/// progress is skipped. Returns a `JoinHandle` and a shutdown flag. Set the
/// flag to stop polling.
pub fn spawn_poll_loop(
    engine: Arc<WorkflowEngine>,
    registry: Arc<RunRegistry>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Poll trigger started, running every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poll trigger shutting down");
                return;
            }

            poll_once(&engine, &registry).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run a single triage pass and log how it ended.
async fn poll_once(engine: &WorkflowEngine, registry: &RunRegistry) {
    let ctx = RunContext::new();
    registry.register(ctx.clone()).await;
    debug!(run_id = %ctx.id(), "Poll tick, starting run");

    match engine.run_with(RunState::default(), &ctx).await {
        Ok(report) => {
            let status = ctx.status().await;
            info!(
                run_id = %report.run_id,
                replied = status.replied,
                skipped = status.skipped,
                escalated = status.escalated,
                "Poll run finished"
            );
        }
        Err(e) => error!(run_id = %ctx.id(), error = %e, "Poll run failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ports::scripted::Scripted;
    use crate::workflow::state::{Category, EmailRecord};

    #[tokio::test]
    async fn poll_loop_runs_and_stops() {
        let scripted = Scripted::new(
            vec![EmailRecord {
                id: "1".into(),
                sender: "jo@client.com".into(),
                body: "Repay on maturity".into(),
                ..Default::default()
            }],
            Category::MaturityRepayment,
            1,
        );
        let engine = Arc::new(WorkflowEngine::new(
            scripted.capabilities(),
            EngineConfig::default(),
        ));
        let registry = Arc::new(RunRegistry::new());

        let (handle, shutdown) =
            spawn_poll_loop(engine, registry.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(90)).await;
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(scripted.inbox.log.calls() >= 2);
        assert_eq!(scripted.dispatcher.sent().len(), 1);
        assert!(!registry.is_empty().await);
    }

    #[tokio::test]
    async fn failed_poll_does_not_stop_the_loop() {
        let scripted = Scripted::new(Vec::new(), Category::MaturityRepayment, 1);
        scripted.inbox.log.fail_next(1);
        let engine = Arc::new(WorkflowEngine::new(
            scripted.capabilities(),
            EngineConfig::default(),
        ));
        let registry = Arc::new(RunRegistry::new());

        let (handle, shutdown) =
            spawn_poll_loop(engine, registry.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(90)).await;
        shutdown.store(true, Ordering::Relaxed);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(scripted.inbox.log.calls() >= 2);
    }
}
