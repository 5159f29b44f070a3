//! Named periodic tasks with per-task overlap policies.
//!
//! Every task gets its own timer loop; firings are dispatched to the blocking
//! pool so a long-running invocation never stalls the timer. Overlap between
//! two firings of the same task is resolved by that task's policy: `Skip`
//! drops the newer firing, `Wait` queues it on the task's lock. An action that
//! fails or panics is logged and never takes the scheduler down with it.

use crate::utils::errors::{BackupError, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPolicy {
    /// Drop a firing while a previous invocation of the same task still runs
    Skip,
    /// Serialize firings: block on the task's lock until it frees up
    Wait,
}

pub type TaskAction = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

struct ScheduledTask {
    name: String,
    action: TaskAction,
    policy: TaskPolicy,
    run_lock: Mutex<()>,
}

struct TaskHandle {
    cancel: CancellationToken,
}

/// Owned registry of scheduled tasks.
pub struct Scheduler {
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule `action` for the next occurrence of `time_of_day` (today if
    /// still ahead, else tomorrow) and every 24 hours after that.
    pub fn add_daily_task(
        &self,
        name: &str,
        action: TaskAction,
        time_of_day: NaiveTime,
        policy: TaskPolicy,
    ) -> Result<()> {
        let due = next_daily_due(Local::now().naive_local(), time_of_day);
        self.add_task(name, action, due, Duration::from_secs(24 * 60 * 60), policy)
    }

    /// Schedule `action` to first run after `due` and every `period` after.
    pub fn add_task(
        &self,
        name: &str,
        action: TaskAction,
        due: Duration,
        period: Duration,
        policy: TaskPolicy,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock();

        if tasks.contains_key(name) {
            return Err(BackupError::AlreadyExists(format!(
                "task {name} is already scheduled"
            )));
        }

        let task = Arc::new(ScheduledTask {
            name: name.to_string(),
            action,
            policy,
            run_lock: Mutex::new(()),
        });
        let cancel = CancellationToken::new();
        tokio::spawn(run_timer(task, due, period, cancel.clone()));
        tasks.insert(name.to_string(), TaskHandle { cancel });

        debug!(task = name, ?due, ?period, "task scheduled");
        Ok(())
    }

    /// Cancel all future firings of a task. In-flight invocations finish on
    /// their own.
    pub fn remove_task(&self, name: &str) -> Result<()> {
        let handle = self
            .tasks
            .lock()
            .remove(name)
            .ok_or_else(|| BackupError::NotFound(format!("task {name} is not scheduled")))?;
        handle.cancel.cancel();

        debug!(task = name, "task removed");
        Ok(())
    }

    pub fn remove_all(&self) {
        let mut tasks = self.tasks.lock();
        for (name, handle) in tasks.drain() {
            handle.cancel.cancel();
            debug!(task = %name, "task removed");
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Time until the next occurrence of `time_of_day`, seen from `now`.
fn next_daily_due(now: NaiveDateTime, time_of_day: NaiveTime) -> Duration {
    let mut next = now.date().and_time(time_of_day);
    if next <= now {
        next += ChronoDuration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

async fn run_timer(
    task: Arc<ScheduledTask>,
    due: Duration,
    period: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = time::sleep(due) => {}
    }

    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        fire(Arc::clone(&task));

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
    }
}

/// Dispatch one firing to the blocking pool. The timer keeps ticking while
/// the invocation runs; overlap with the previous invocation is left to the
/// task's policy to resolve.
fn fire(task: Arc<ScheduledTask>) {
    tokio::spawn(async move {
        let name = task.name.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || run_once(&task)).await {
            error!(task = %name, error = %e, "task panicked");
        }
    });
}

fn run_once(task: &ScheduledTask) {
    let _guard = match task.policy {
        TaskPolicy::Skip => match task.run_lock.try_lock() {
            Some(guard) => guard,
            None => {
                debug!(task = %task.name, "previous invocation still running, skipping");
                return;
            }
        },
        TaskPolicy::Wait => task.run_lock.lock(),
    };

    debug!(task = %task.name, "starting");

    if let Err(e) = (task.action)() {
        error!(task = %task.name, error = format!("{e:#}"), "task run failed");
    }

    debug!(task = %task.name, "done");
}
