//! Tracks run handles so status and cancellation can be served by id.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::workflow::{RunContext, RunState, WorkflowEngine};

/// Run handles kept before the oldest are forgotten.
const MAX_TRACKED_RUNS: usize = 256;

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, RunContext>,
    order: VecDeque<Uuid>,
}

/// Registry of run handles. Holds no run state, only status and
/// cancellation handles.
#[derive(Default)]
pub struct RunRegistry {
    inner: RwLock<Inner>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, ctx: RunContext) {
        let mut inner = self.inner.write().await;
        let id = ctx.id();
        inner.runs.insert(id, ctx);
        inner.order.push_back(id);
        while inner.order.len() > MAX_TRACKED_RUNS {
            if let Some(oldest) = inner.order.pop_front() {
                inner.runs.remove(&oldest);
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<RunContext> {
        self.inner.read().await.runs.get(&id).cloned()
    }

    /// Most recently started run.
    pub async fn latest(&self) -> Option<RunContext> {
        let inner = self.inner.read().await;
        inner.order.back().and_then(|id| inner.runs.get(id)).cloned()
    }

    /// Request cancellation; `false` when the run is unknown.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.get(id).await {
            Some(ctx) => {
                ctx.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.runs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Start a run in the background and return its id.
pub async fn spawn_run(
    engine: Arc<WorkflowEngine>,
    registry: Arc<RunRegistry>,
    seed: RunState,
) -> Uuid {
    let ctx = RunContext::new();
    let run_id = ctx.id();
    registry.register(ctx.clone()).await;

    tokio::spawn(async move {
        match engine.run_with(seed, &ctx).await {
            Ok(report) => info!(
                run_id = %run_id,
                outcomes = report.outcomes().len(),
                cancelled = report.cancelled,
                "Background run finished"
            ),
            Err(e) => error!(run_id = %run_id, error = %e, "Background run failed"),
        }
    });
    run_id
}
