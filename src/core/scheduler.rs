//! Background task scheduling
//!
//! Every asynchronous continuation (scanner polls, hard-delete steps, ban
//! cascade batches) is expressed as a [`ScheduledTask`] handed to a
//! [`TaskScheduler`]. Delivery is at-least-once with no ordering guarantee,
//! so every task handler is idempotent.

use crate::core::hard_delete::HardDeletePhase;
use crate::core::model::{SkillId, UserId, VersionId};
use crate::core::service::{ModerationService, ServiceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum ScheduledTask {
    ScanFileReputation {
        version_id: VersionId,
        attempt: u32,
    },
    ScanLlmJudge {
        version_id: VersionId,
        attempt: u32,
    },
    HardDelete {
        skill_id: SkillId,
        phase: HardDeletePhase,
        actor: Option<UserId>,
    },
    BanCascade {
        user_id: UserId,
        cursor: Option<Uuid>,
    },
}

impl ScheduledTask {
    pub fn name(&self) -> &'static str {
        match self {
            ScheduledTask::ScanFileReputation { .. } => "scan_file_reputation",
            ScheduledTask::ScanLlmJudge { .. } => "scan_llm_judge",
            ScheduledTask::HardDelete { .. } => "hard_delete",
            ScheduledTask::BanCascade { .. } => "ban_cascade",
        }
    }
}

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Run `task` after at least `delay`
    async fn schedule(&self, task: ScheduledTask, delay: Duration) -> Result<(), ServiceError>;
}

/// In-process FIFO queue; tasks run only when drained explicitly
#[derive(Default)]
pub struct QueueScheduler {
    queue: Mutex<VecDeque<(ScheduledTask, Duration)>>,
    history: Mutex<Vec<ScheduledTask>>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<ScheduledTask> {
        self.queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .map(|(task, _)| task)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending tasks with their requested delays
    pub fn pending(&self) -> Vec<(ScheduledTask, Duration)> {
        self.queue
            .lock()
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every task ever scheduled, in scheduling order
    pub fn history(&self) -> Vec<ScheduledTask> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut q) = self.queue.lock() {
            q.clear();
        }
    }

    /// Run queued tasks (including ones they schedule) until the queue is
    /// empty or `max_tasks` have run. Returns the number of tasks run.
    pub async fn run_until_idle(
        &self,
        service: &ModerationService,
        max_tasks: usize,
    ) -> Result<usize, ServiceError> {
        let mut ran = 0;
        while ran < max_tasks {
            let Some(task) = self.pop() else {
                break;
            };
            service.run_task(task).await?;
            ran += 1;
        }
        Ok(ran)
    }
}

#[async_trait]
impl TaskScheduler for QueueScheduler {
    async fn schedule(&self, task: ScheduledTask, delay: Duration) -> Result<(), ServiceError> {
        debug!("Queued {} after {:?}", task.name(), delay);
        if let Ok(mut history) = self.history.lock() {
            history.push(task.clone());
        }
        self.queue
            .lock()
            .map_err(|_| ServiceError::Storage("task queue poisoned".to_string()))?
            .push_back((task, delay));
        Ok(())
    }
}

/// Tokio timers feeding a channel drained by a [`TaskRunner`]
#[derive(Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<ScheduledTask>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskScheduler for TokioScheduler {
    async fn schedule(&self, task: ScheduledTask, delay: Duration) -> Result<(), ServiceError> {
        if delay.is_zero() {
            return self
                .tx
                .send(task)
                .map_err(|e| ServiceError::Storage(format!("task runner stopped: {}", e)));
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tx.send(task) {
                error!("Dropped delayed task, runner stopped: {}", e);
            }
        });
        Ok(())
    }
}

/// Executes tasks delivered by a [`TokioScheduler`]
pub struct TaskRunner {
    rx: mpsc::UnboundedReceiver<ScheduledTask>,
    service: Arc<ModerationService>,
}

impl TaskRunner {
    pub fn new(rx: mpsc::UnboundedReceiver<ScheduledTask>, service: Arc<ModerationService>) -> Self {
        Self { rx, service }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!("Task runner started");
        while let Some(task) = self.rx.recv().await {
            let service = self.service.clone();
            tokio::spawn(async move {
                let name = task.name();
                if let Err(e) = service.run_task(task).await {
                    error!("Task {} failed: {}", name, e);
                }
            });
        }
        info!("Task runner stopped");
    }
}
