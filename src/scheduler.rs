use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::automessage::dispatcher::{DispatchReport, DispatcherService};
use crate::automessage::planner::PlannerService;
use crate::error::{AppError, Result};

/// Upper bound on how long shutdown waits for in-flight ticks.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// Re-entrancy guard and counters for one scheduled task. A tick that
/// arrives while the previous one is still running is skipped, not queued.
pub struct TaskGuard {
    name: &'static str,
    running: AtomicBool,
    ticks: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
}

impl TaskGuard {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Claims the task for one run. Returns false when a run is already in
    /// flight.
    fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn end(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn note_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        warn!("Scheduler: {} tick skipped, previous run still active", self.name);
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub name: String,
    pub is_scheduled: bool,
    pub is_running: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub ticks: u64,
    pub skipped: u64,
    pub failures: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub planner: TaskStatus,
    pub dispatcher: TaskStatus,
}

/// Cron runner driving the planner and dispatcher in a configured
/// timezone. Task failures are counted and logged; the schedule always
/// continues.
pub struct PipelineScheduler {
    scheduler: Mutex<Option<JobScheduler>>,
    planner: PlannerService,
    dispatcher: DispatcherService,
    timezone: Tz,
    planner_cron: String,
    dispatcher_cron: String,
    planner_guard: Arc<TaskGuard>,
    dispatcher_guard: Arc<TaskGuard>,
    planner_job: Mutex<Option<Uuid>>,
    dispatcher_job: Mutex<Option<Uuid>>,
}

impl PipelineScheduler {
    pub fn new(
        planner: PlannerService,
        dispatcher: DispatcherService,
        timezone: Tz,
        planner_cron: String,
        dispatcher_cron: String,
    ) -> Self {
        Self {
            scheduler: Mutex::new(None),
            planner,
            dispatcher,
            timezone,
            planner_cron,
            dispatcher_cron,
            planner_guard: Arc::new(TaskGuard::new("planner")),
            dispatcher_guard: Arc::new(TaskGuard::new("dispatcher")),
            planner_job: Mutex::new(None),
            dispatcher_job: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;

        let planner_expr = normalize_cron(&self.planner_cron);
        let planner = self.planner.clone();
        let planner_guard = Arc::clone(&self.planner_guard);
        let planner_job = Job::new_async_tz(
            planner_expr.as_str(),
            self.timezone,
            move |_uuid, _lock| {
                let planner = planner.clone();
                let guard = Arc::clone(&planner_guard);
                Box::pin(async move {
                    run_guarded(&guard, planner.plan_automatic_messages()).await;
                })
            },
        )
        .map_err(|e| AppError::Scheduler(e.to_string()))?;

        let dispatcher_expr = normalize_cron(&self.dispatcher_cron);
        let dispatcher = self.dispatcher.clone();
        let dispatcher_guard = Arc::clone(&self.dispatcher_guard);
        let dispatcher_job = Job::new_async_tz(
            dispatcher_expr.as_str(),
            self.timezone,
            move |_uuid, _lock| {
                let dispatcher = dispatcher.clone();
                let guard = Arc::clone(&dispatcher_guard);
                Box::pin(async move {
                    run_guarded(&guard, dispatcher.process_pending_messages()).await;
                })
            },
        )
        .map_err(|e| AppError::Scheduler(e.to_string()))?;

        let planner_id = scheduler
            .add(planner_job)
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;
        let dispatcher_id = scheduler
            .add(dispatcher_job)
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;

        scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;

        *self.planner_job.lock().await = Some(planner_id);
        *self.dispatcher_job.lock().await = Some(dispatcher_id);
        *self.scheduler.lock().await = Some(scheduler);

        info!(
            "Scheduler started: planner '{}', dispatcher '{}', timezone {}",
            planner_expr, dispatcher_expr, self.timezone
        );
        Ok(())
    }

    /// Stops pending ticks, then waits for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            if let Err(e) = scheduler.shutdown().await {
                error!("Scheduler shutdown error: {e}");
            }
        }
        *self.planner_job.lock().await = None;
        *self.dispatcher_job.lock().await = None;

        let deadline = tokio::time::Instant::now() + SHUTDOWN_WAIT;
        while self.planner_guard.is_running() || self.dispatcher_guard.is_running() {
            if tokio::time::Instant::now() >= deadline {
                warn!("Scheduler: giving up waiting for in-flight tasks");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("Scheduler stopped");
    }

    /// Manual planner trigger, sharing the cron tick's guard. Returns
    /// `None` when a run is already in flight.
    pub async fn trigger_planner(&self) -> Result<Option<u64>> {
        if !self.planner_guard.try_begin() {
            self.planner_guard.note_skipped();
            return Ok(None);
        }

        let result = self.planner.plan_automatic_messages().await;
        if result.is_err() {
            self.planner_guard.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.planner_guard.ticks.fetch_add(1, Ordering::Relaxed);
        self.planner_guard.end();
        result.map(Some)
    }

    /// Manual dispatcher trigger, sharing the cron tick's guard.
    pub async fn trigger_dispatcher(&self) -> Result<Option<DispatchReport>> {
        if !self.dispatcher_guard.try_begin() {
            self.dispatcher_guard.note_skipped();
            return Ok(None);
        }

        let result = self.dispatcher.process_pending_messages().await;
        if result.is_err() {
            self.dispatcher_guard.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.dispatcher_guard.ticks.fetch_add(1, Ordering::Relaxed);
        self.dispatcher_guard.end();
        result.map(Some)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let mut scheduler = self.scheduler.lock().await;
        let is_scheduled = scheduler.is_some();

        let planner_next = match (&mut *scheduler, *self.planner_job.lock().await) {
            (Some(sched), Some(job_id)) => {
                sched.next_tick_for_job(job_id).await.ok().flatten()
            }
            _ => None,
        };
        let dispatcher_next = match (&mut *scheduler, *self.dispatcher_job.lock().await) {
            (Some(sched), Some(job_id)) => {
                sched.next_tick_for_job(job_id).await.ok().flatten()
            }
            _ => None,
        };

        SchedulerStatus {
            planner: task_status(&self.planner_guard, is_scheduled, planner_next),
            dispatcher: task_status(&self.dispatcher_guard, is_scheduled, dispatcher_next),
        }
    }
}

fn task_status(
    guard: &TaskGuard,
    is_scheduled: bool,
    next_execution: Option<DateTime<Utc>>,
) -> TaskStatus {
    TaskStatus {
        name: guard.name.to_string(),
        is_scheduled,
        is_running: guard.is_running(),
        next_execution,
        ticks: guard.ticks.load(Ordering::Relaxed),
        skipped: guard.skipped.load(Ordering::Relaxed),
        failures: guard.failures.load(Ordering::Relaxed),
    }
}

/// Runs one guarded tick: skipped when already running, failures counted,
/// errors never propagate into the scheduler.
async fn run_guarded<T, F>(guard: &TaskGuard, task: F)
where
    F: std::future::Future<Output = Result<T>>,
{
    if !guard.try_begin() {
        guard.note_skipped();
        return;
    }

    guard.ticks.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = task.await {
        guard.failures.fetch_add(1, Ordering::Relaxed);
        error!("Scheduler: {} tick failed: {e}", guard.name);
    }
    guard.end();
}

/// The configuration accepts classic five-field cron; the scheduler
/// library wants a seconds field, so five-field expressions run at second
/// zero.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gains_a_seconds_field() {
        assert_eq!(normalize_cron("0 2 * * *"), "0 0 2 * * *");
        assert_eq!(normalize_cron("* * * * *"), "0 * * * * *");
    }

    #[test]
    fn six_field_cron_is_untouched() {
        assert_eq!(normalize_cron("30 0 2 * * *"), "30 0 2 * * *");
    }

    #[test]
    fn guard_excludes_overlapping_runs() {
        let guard = TaskGuard::new("test");

        assert!(guard.try_begin());
        assert!(guard.is_running());
        assert!(!guard.try_begin());

        guard.end();
        assert!(guard.try_begin());
        guard.end();
    }

    #[tokio::test]
    async fn run_guarded_counts_ticks_and_failures() {
        let guard = TaskGuard::new("test");

        run_guarded(&guard, async { Ok::<_, AppError>(1u64) }).await;
        run_guarded(&guard, async {
            Err::<u64, _>(AppError::InternalError)
        })
        .await;

        assert_eq!(guard.ticks.load(Ordering::Relaxed), 2);
        assert_eq!(guard.failures.load(Ordering::Relaxed), 1);
        assert!(!guard.is_running());
    }

    #[tokio::test]
    async fn run_guarded_skips_while_held() {
        let guard = TaskGuard::new("test");
        assert!(guard.try_begin());

        run_guarded(&guard, async { Ok::<_, AppError>(()) }).await;

        assert_eq!(guard.skipped.load(Ordering::Relaxed), 1);
        assert_eq!(guard.ticks.load(Ordering::Relaxed), 0);
        guard.end();
    }
}
