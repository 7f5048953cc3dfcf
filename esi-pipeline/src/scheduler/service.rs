//! Per-source timer loops.
//!
//! Each enabled source gets an independent task: startup jitter, then one
//! cycle per update interval. Cancelling a loop stops its timer; a cycle that
//! is already running is allowed to finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SourceTask;
use crate::pipeline::{PipelineContext, run_cycle};

/// Outcome of stopping all loops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub total_tasks: usize,
    pub graceful_stops: usize,
    pub forced_terminations: usize,
}

impl ShutdownReport {
    pub fn all_graceful(&self) -> bool {
        self.forced_terminations == 0
    }
}

pub struct Scheduler {
    ctx: Arc<PipelineContext>,
    root_token: Mutex<CancellationToken>,
    tasks: Mutex<HashMap<String, SourceTask>>,
    /// Loops cancelled individually that may still be finishing a cycle.
    retired: Mutex<Vec<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            root_token: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the cache sweep and a loop per enabled source, highest priority
    /// first. Returns the number of loops started.
    pub fn start(&self) -> usize {
        let root = CancellationToken::new();
        *self.root_token.lock() = root.clone();

        let sweeper = self
            .ctx
            .cache
            .spawn_sweeper(self.ctx.config.cache_sweep_interval(), root.child_token());
        if let Some(previous) = self.sweeper.lock().replace(sweeper) {
            previous.abort();
        }

        let mut started = 0;
        for id in self.ctx.sources.enabled_by_priority() {
            if self.schedule(&id) {
                started += 1;
            }
        }
        info!(started, total = self.ctx.sources.len(), "Scheduled sources");
        started
    }

    fn startup_jitter(&self) -> Duration {
        let max_ms = self.ctx.config.max_startup_jitter_ms;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis((rand::random::<f64>() * max_ms as f64) as u64)
    }

    /// Spawn the loop for a source unless one is already active.
    pub fn schedule(&self, source_id: &str) -> bool {
        if self.ctx.sources.get(source_id).is_none() {
            return false;
        }

        let mut tasks = self.tasks.lock();
        if tasks
            .get(source_id)
            .is_some_and(|t| !t.is_cancelled() && !t.is_finished())
        {
            return false;
        }

        let token = self.root_token.lock().child_token();
        let jitter = self.startup_jitter();
        debug!(source_id, jitter_ms = jitter.as_millis() as u64, "Scheduling source");

        let handle = tokio::spawn(source_loop(
            Arc::clone(&self.ctx),
            source_id.to_string(),
            token.clone(),
            jitter,
        ));
        if let Some(previous) = tasks.insert(
            source_id.to_string(),
            SourceTask::new(source_id.to_string(), token, handle),
        ) {
            self.retire(previous);
        }
        true
    }

    /// Stop a source's timer. Returns whether a loop was active.
    pub fn cancel(&self, source_id: &str) -> bool {
        let Some(task) = self.tasks.lock().remove(source_id) else {
            return false;
        };
        task.cancel();
        debug!(source_id, "Cancelled source loop");
        self.retire(task);
        true
    }

    fn retire(&self, task: SourceTask) {
        task.cancel();
        let mut retired = self.retired.lock();
        retired.retain(|h| !h.is_finished());
        retired.push(task.into_handle());
    }

    pub fn scheduled_count(&self) -> usize {
        self.tasks.lock().values().filter(|t| !t.is_finished()).count()
    }

    /// Cancel every loop and wait up to `timeout` for in-flight cycles.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.root_token.lock().cancel();

        let mut handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .drain()
            .map(|(_, task)| task.into_handle())
            .collect();
        handles.append(&mut self.retired.lock());
        if let Some(sweeper) = self.sweeper.lock().take() {
            handles.push(sweeper);
        }

        let mut report = ShutdownReport {
            total_tasks: handles.len(),
            ..Default::default()
        };

        if tokio::time::timeout(timeout, join_all(handles.iter_mut()))
            .await
            .is_ok()
        {
            report.graceful_stops = report.total_tasks;
        } else {
            // Handles that completed inside the timed-out join have already
            // yielded their output and must not be polled again.
            let mut aborted = Vec::new();
            for handle in handles {
                if handle.is_finished() {
                    report.graceful_stops += 1;
                } else {
                    handle.abort();
                    aborted.push(handle);
                }
            }
            report.forced_terminations = aborted.len();
            // Wait for the aborted tasks to drop their in-flight guards.
            join_all(aborted).await;
        }

        if report.all_graceful() {
            info!(tasks = report.total_tasks, "Scheduler stopped");
        } else {
            warn!(
                forced = report.forced_terminations,
                timeout_secs = timeout.as_secs(),
                "Scheduler stopped with in-flight cycles aborted"
            );
        }
        report
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root_token.lock().cancel();
    }
}

async fn source_loop(
    ctx: Arc<PipelineContext>,
    source_id: String,
    token: CancellationToken,
    initial_delay: Duration,
) {
    let Some(slot) = ctx.sources.get(&source_id) else {
        return;
    };

    let mut delay = initial_delay;
    loop {
        let next = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        slot.set_next_update(Some(Utc::now() + next));

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        if !ctx.is_running() || !slot.is_enabled() {
            break;
        }

        run_cycle(&ctx, slot).await;

        if token.is_cancelled() || !ctx.is_running() || !slot.is_enabled() {
            break;
        }
        delay = slot.source.update_interval();
    }

    slot.set_next_update(None);
    debug!(source_id = %source_id, "Source loop exited");
}
