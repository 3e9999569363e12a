//! Scheduler — drives the compound cycle and the earnings sweep on timers.
//!
//! Each job is a [`PeriodicTask`] that is either idle or running. A timer
//! fire that finds its job still running is dropped rather than queued, so a
//! slow cycle never causes a pile-up of cycles behind it.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::engine::ledger::cycle::CycleReport;
use crate::engine::ledger::Ledger;
use crate::notify::{LedgerEvent, Notifier};

/// How many cycle reports are kept for inspection.
pub const CYCLE_HISTORY: usize = 100;

/// Recent cycle reports, oldest first.
pub type CycleLog = Arc<RwLock<VecDeque<CycleReport>>>;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" for the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never goes backwards. If the system time steps back,
/// the last value handed out is repeated until the wall clock catches up.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_millis: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn clamp(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let millis = wall.timestamp_millis();
        let prev = self.last_millis.fetch_max(millis, Ordering::SeqCst);
        if prev > millis {
            DateTime::from_timestamp_millis(prev).unwrap_or(wall)
        } else {
            wall
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        self.clamp(Utc::now())
    }
}

/// Clock moved by hand. Used to replay time in tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: std::sync::Mutex::new(start) }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Periodic task state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
}

/// Run-state of one scheduled job.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    running: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
}

/// Marks a task as running until dropped.
#[derive(Debug)]
pub struct TaskGuard {
    task: Arc<PeriodicTask>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.task.running.store(false, Ordering::SeqCst);
    }
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> TaskState {
        if self.running.load(Ordering::SeqCst) {
            TaskState::Running
        } else {
            TaskState::Idle
        }
    }

    /// Move Idle → Running. `None` when already running; that fire is
    /// counted as skipped.
    pub fn try_begin(self: &Arc<Self>) -> Option<TaskGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Some(TaskGuard { task: Arc::clone(self) })
        } else {
            self.skipped.fetch_add(1, Ordering::SeqCst);
            debug!(task = self.name, "Previous run still in progress, skipping");
            None
        }
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    ledger: Arc<Ledger>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    rng: Mutex<StdRng>,
    compound: Arc<PeriodicTask>,
    sweep: Arc<PeriodicTask>,
    history: CycleLog,
}

impl Scheduler {
    pub fn new(ledger: Arc<Ledger>, notifier: Arc<dyn Notifier>, config: SchedulerConfig) -> Self {
        Self {
            ledger,
            notifier,
            clock: Arc::new(SystemClock::new()),
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            compound: PeriodicTask::new("compound"),
            sweep: PeriodicTask::new("notify-sweep"),
            history: Arc::new(RwLock::new(VecDeque::with_capacity(CYCLE_HISTORY))),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fix the drift RNG so runs are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn history(&self) -> CycleLog {
        Arc::clone(&self.history)
    }

    pub fn compound_task(&self) -> &Arc<PeriodicTask> {
        &self.compound
    }

    pub fn sweep_task(&self) -> &Arc<PeriodicTask> {
        &self.sweep
    }

    /// Run one compound cycle unless one is already running.
    ///
    /// The task is marked idle again before reallocation notices go out, so
    /// a slow notifier never causes the next cycle to be skipped.
    pub async fn run_compound_once(&self) -> Option<CycleReport> {
        let guard = self.compound.try_begin()?;

        let report = {
            let mut rng = self.rng.lock().await;
            self.ledger.run_compound_cycle(self.clock.now(), &mut *rng).await
        };

        {
            let mut history = self.history.write().await;
            if history.len() == CYCLE_HISTORY {
                history.pop_front();
            }
            history.push_back(report.clone());
        }
        drop(guard);

        if let Some(source_id) = &report.optimal_source {
            let sends = report.moved_by_user.iter().map(|(user_id, moved)| {
                let event = LedgerEvent::Reallocated {
                    cycle_number: report.cycle_number,
                    positions_moved: *moved,
                    source_id: source_id.clone(),
                };
                async move { self.deliver(user_id, &event).await }
            });
            join_all(sends).await;
        }

        Some(report)
    }

    /// Send an earnings update to every user above the threshold. Returns
    /// how many were delivered, or `None` when a sweep is already running.
    pub async fn run_sweep_once(&self) -> Option<usize> {
        let _guard = self.sweep.try_begin()?;

        let updates = self
            .ledger
            .earnings_report(self.config.notify_earnings_threshold)
            .await;
        let sends = updates.iter().map(|update| {
            let event = LedgerEvent::from(update);
            async move { self.deliver(&update.user_id, &event).await }
        });
        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();

        info!(
            candidates = updates.len(),
            delivered,
            notifier = self.notifier.name(),
            "Earnings sweep complete"
        );
        Some(delivered)
    }

    async fn deliver(&self, user_id: &str, event: &LedgerEvent) -> bool {
        match self.notifier.notify(user_id, event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    user_id,
                    notifier = self.notifier.name(),
                    error = %e,
                    "Notification failed"
                );
                false
            }
        }
    }

    /// Drive both jobs until `shutdown` resolves, then wait for any job in
    /// flight to finish.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let compound_every = Duration::from_secs(self.config.compound_interval_secs.max(1));
        let sweep_every = Duration::from_secs(self.config.notify_interval_secs.max(1));

        let mut compound_tick = interval_at(Instant::now() + compound_every, compound_every);
        compound_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_tick = interval_at(Instant::now() + sweep_every, sweep_every);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            compound_secs = compound_every.as_secs(),
            sweep_secs = sweep_every.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = compound_tick.tick() => {
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move {
                        this.run_compound_once().await;
                    });
                }
                _ = sweep_tick.tick() => {
                    let this = Arc::clone(&self);
                    in_flight.spawn(async move {
                        this.run_sweep_once().await;
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Scheduled job panicked");
                    }
                }
                _ = &mut shutdown => {
                    info!("Scheduler stopping");
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Scheduled job panicked");
            }
        }
        info!(
            cycles = self.compound.runs(),
            skipped = self.compound.skipped(),
            "Scheduler stopped"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
