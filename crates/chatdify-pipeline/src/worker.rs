// SPDX-FileCopyrightText: 2026 Chatdify Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution side of the task scheduler.
//!
//! Workers pull due tasks from the shared [`TaskQueue`], run them under a
//! soft and a hard time limit, and translate the result into complete,
//! retry with backoff, defer, or give up. Workers share no memory; every
//! coordination point lives in the queue and the conversation store.

use std::sync::Arc;
use std::time::Duration;

use chatdify_config::model::QueueConfig;
use chatdify_core::{BridgeError, FailOutcome, QueuedTask, TaskQueue};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pipeline::{DispatchPipeline, RunOutcome, RunReport};
use crate::retry::RetryPolicy;
use crate::tasks::BridgeTask;

/// How often expired task locks are returned to the queue.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Grace added to the hard time limit when locking a task, so a run that is
/// still inside its limit is never reclaimed.
const LOCK_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub time_limit: Duration,
    pub soft_time_limit: Duration,
    pub backoff: RetryPolicy,
    pub lease_conflict_delay: Duration,
    pub max_deferrals: u32,
}

impl WorkerSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            time_limit: Duration::from_secs(config.time_limit_secs),
            soft_time_limit: Duration::from_secs(config.soft_time_limit_secs),
            backoff: RetryPolicy::from_queue(config),
            lease_conflict_delay: Duration::from_millis(config.lease_conflict_delay_ms),
            max_deferrals: config.max_deferrals,
        }
    }

    fn lock_for(&self) -> Duration {
        self.time_limit + LOCK_GRACE
    }
}

/// What happened to one dequeued task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDisposition {
    Completed(String),
    Retrying { attempts: u32, delay: Duration },
    Deferred,
    Dead(String),
}

/// Runs single tasks. Shared by every worker of a pool.
pub struct TaskExecutor {
    pipeline: Arc<DispatchPipeline>,
    queue: Arc<dyn TaskQueue>,
    settings: WorkerSettings,
}

impl TaskExecutor {
    pub fn new(
        pipeline: Arc<DispatchPipeline>,
        queue: Arc<dyn TaskQueue>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            pipeline,
            queue,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Claim and execute the next due task. `None` when nothing is due.
    pub async fn run_once(&self) -> Result<Option<TaskDisposition>, BridgeError> {
        let Some(task) = self.queue.dequeue(self.settings.lock_for()).await? else {
            return Ok(None);
        };
        self.execute(task).await.map(Some)
    }

    /// Execute due tasks until none is left. Delayed tasks are not waited for.
    pub async fn drain(&self) -> Result<Vec<TaskDisposition>, BridgeError> {
        let mut dispositions = Vec::new();
        while let Some(disposition) = self.run_once().await? {
            dispositions.push(disposition);
        }
        Ok(dispositions)
    }

    async fn execute(&self, task: QueuedTask) -> Result<TaskDisposition, BridgeError> {
        let task_id = task.id;
        debug!(task_id, task = %task.task_name, attempts = task.attempts, "task started");

        let work = match BridgeTask::from_payload(&task.payload) {
            Ok(work) => work,
            Err(e) => {
                error!(task_id, error = %e, "dropping undecodable task");
                let reason = e.to_string();
                self.queue.fail(task_id, &reason, None).await?;
                return Ok(TaskDisposition::Dead(reason));
            }
        };

        match self.run_with_limits(task_id, &work).await {
            Ok(Some(RunReport {
                outcome: outcome @ RunOutcome::Partial { .. },
                ..
            })) => {
                let reason = outcome.to_string();
                warn!(task_id, reason = %reason, "task finished with failed mutations");
                self.queue.fail(task_id, &reason, None).await?;
                Ok(TaskDisposition::Dead(reason))
            }
            Ok(report) => {
                let result = report
                    .map(|r| r.outcome.to_string())
                    .unwrap_or_else(|| "done".to_string());
                self.queue.complete(task_id, Some(&result)).await?;
                debug!(task_id, result = %result, "task completed");
                Ok(TaskDisposition::Completed(result))
            }
            Err(BridgeError::LeaseConflict { conversation_id })
                if task.deferrals < self.settings.max_deferrals =>
            {
                debug!(task_id, conversation_id, deferrals = task.deferrals, "deferring behind in-flight run");
                self.queue
                    .defer(task_id, self.settings.lease_conflict_delay)
                    .await?;
                Ok(TaskDisposition::Deferred)
            }
            Err(e) if e.is_retryable() => {
                let delay = self.settings.backoff.delay_for(task.attempts + 1);
                let reason = e.to_string();
                match self.queue.fail(task_id, &reason, Some(delay)).await? {
                    FailOutcome::Retrying { attempts } => {
                        warn!(task_id, attempts, delay_ms = delay.as_millis() as u64, error = %e, "task will retry");
                        Ok(TaskDisposition::Retrying { attempts, delay })
                    }
                    FailOutcome::Dead { attempts } => {
                        error!(task_id, attempts, error = %e, "task exhausted its attempts");
                        self.give_up(&work, &e).await;
                        Ok(TaskDisposition::Dead(reason))
                    }
                }
            }
            Err(e) => {
                let reason = e.to_string();
                error!(task_id, error = %e, class = %e.class(), "task failed terminally");
                self.queue.fail(task_id, &reason, None).await?;
                self.give_up(&work, &e).await;
                Ok(TaskDisposition::Dead(reason))
            }
        }
    }

    /// Run a task under the soft and hard time limits.
    async fn run_with_limits(
        &self,
        task_id: i64,
        work: &BridgeTask,
    ) -> Result<Option<RunReport>, BridgeError> {
        let time_limit = self.settings.time_limit;
        let soft_limit = self.settings.soft_time_limit.min(time_limit);

        let fut = self.perform(work);
        tokio::pin!(fut);
        tokio::select! {
            result = &mut fut => result,
            _ = tokio::time::sleep(soft_limit) => {
                warn!(task_id, soft_limit_secs = soft_limit.as_secs(), "task exceeded its soft time limit");
                match tokio::time::timeout(time_limit.saturating_sub(soft_limit), &mut fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        error!(task_id, time_limit_secs = time_limit.as_secs(), "task aborted at hard time limit");
                        Err(BridgeError::Timeout { duration: time_limit })
                    }
                }
            }
        }
    }

    async fn perform(&self, work: &BridgeTask) -> Result<Option<RunReport>, BridgeError> {
        match work {
            BridgeTask::ProcessEvent { event } => self.pipeline.run(event).await.map(Some),
            BridgeTask::DeleteDifyConversation {
                conversation_id,
                dify_conversation_id,
            } => {
                self.pipeline
                    .completion()
                    .delete_conversation(dify_conversation_id)
                    .await?;
                self.pipeline
                    .store()
                    .set_dify_conversation_id(*conversation_id, None)
                    .await?;
                info!(conversation_id, dify_conversation_id = %dify_conversation_id, "Dify conversation deleted");
                Ok(None)
            }
        }
    }

    async fn give_up(&self, work: &BridgeTask, error: &BridgeError) {
        let BridgeTask::ProcessEvent { event } = work else {
            return;
        };
        match self.pipeline.handle_failure(event, error).await {
            Ok(report) => info!(
                conversation_id = event.conversation_id,
                outcome = %report.outcome,
                "failure fallback applied"
            ),
            Err(e) => error!(
                conversation_id = event.conversation_id,
                error = %e,
                "failure fallback could not be applied"
            ),
        }
    }
}

/// A fixed-size pool of workers over one [`TaskExecutor`].
pub struct WorkerPool {
    executor: Arc<TaskExecutor>,
}

impl WorkerPool {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }

    /// Run until `cancel` fires. In-flight tasks finish before a worker exits.
    pub async fn run(&self, cancel: CancellationToken) {
        let concurrency = self.executor.settings.concurrency;
        info!(concurrency, "starting workers");

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { worker_loop(worker_id, executor, cancel).await });
        }
        let queue = self.executor.queue.clone();
        let reclaim_cancel = cancel.clone();
        workers.spawn(async move { reclaim_loop(queue, reclaim_cancel).await });

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task panicked");
            }
        }
        info!("all workers stopped");
    }
}

async fn worker_loop(worker_id: usize, executor: Arc<TaskExecutor>, cancel: CancellationToken) {
    let poll_interval = executor.settings.poll_interval;
    debug!(worker_id, "worker started");
    while !cancel.is_cancelled() {
        let idle = match executor.run_once().await {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                warn!(worker_id, error = %e, "queue unavailable");
                true
            }
        };
        if idle {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

async fn reclaim_loop(queue: Arc<dyn TaskQueue>, cancel: CancellationToken) {
    loop {
        match queue.reclaim_expired().await {
            Ok(0) => {}
            Ok(count) => warn!(count, "reclaimed tasks from crashed workers"),
            Err(e) => warn!(error = %e, "task reclaim failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECLAIM_INTERVAL) => {}
        }
    }
}
