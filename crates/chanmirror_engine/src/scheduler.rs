//! Timer-driven auto-sync scheduler.

use crate::config::{validate_interval_ms, SchedulerSettings, MIN_SYNC_SPACING};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent, SyncEventKind};
use crate::executor::{SyncExecutor, SyncOutcome};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle state of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer is armed.
    Stopped,
    /// `start` is in progress.
    Starting,
    /// A timer is armed or a timer-driven pass is running.
    Running,
    /// `stop` is in progress.
    Stopping,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Stopped => "stopped",
            SchedulerState::Starting => "starting",
            SchedulerState::Running => "running",
            SchedulerState::Stopping => "stopping",
        };
        f.pad(name)
    }
}

/// Mutable scheduler state. Only changed under one lock so observers never
/// see e.g. a stopped scheduler with a next sync time.
struct Timeline {
    state: SchedulerState,
    /// Bumped whenever a timer is armed or cancelled; a firing timer whose
    /// generation is stale does nothing.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    next_sync: Option<SystemTime>,
    last_sync: Option<(Instant, SystemTime)>,
}

struct Shared<E: SyncExecutor + 'static> {
    instance_id: String,
    executor: Arc<E>,
    settings: RwLock<SchedulerSettings>,
    timeline: Mutex<Timeline>,
    events: EventBus,
    runtime: Handle,
}

/// Periodically runs a [`SyncExecutor`] with retry, backoff and timeout.
///
/// # State Machine
///
/// ```text
/// stopped --start()--> starting --> running --stop()--> stopping --> stopped
/// ```
///
/// `start` on a running scheduler and `stop` on a stopped one are no-ops.
///
/// # Timer Cycle
///
/// Each time the timer fires the scheduler:
///
/// 1. Ignores the firing if it was cancelled by `stop`
/// 2. Skips the cycle if the executor reports a pass in progress
/// 3. Re-arms for the remainder of [`MIN_SYNC_SPACING`] if the last
///    completed pass was too recent
/// 4. Otherwise runs a pass and re-arms for the full interval, whatever the
///    outcome
///
/// A pass emits `Start`, one `Error` per failed attempt, then `Complete`
/// or gives up. Each executor call runs on its own task; when it exceeds
/// the timeout the scheduler stops waiting but the call keeps running.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = AutoSyncScheduler::new(executor, settings)?;
/// let mut events = scheduler.subscribe();
/// scheduler.start();
/// scheduler.force_sync_now(&[]).await?;
/// ```
pub struct AutoSyncScheduler<E: SyncExecutor + 'static> {
    shared: Arc<Shared<E>>,
}

impl<E: SyncExecutor + 'static> AutoSyncScheduler<E> {
    /// Creates a stopped scheduler.
    ///
    /// Must be called from within a tokio runtime; timers are spawned on it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] for invalid settings (including
    /// a zero interval) and [`SyncError::NoRuntime`] outside a runtime.
    pub fn new(executor: Arc<E>, settings: SchedulerSettings) -> SyncResult<Self> {
        settings.validate()?;
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;

        Ok(Self {
            shared: Arc::new(Shared {
                instance_id: Uuid::new_v4().to_string(),
                executor,
                settings: RwLock::new(settings),
                timeline: Mutex::new(Timeline {
                    state: SchedulerState::Stopped,
                    generation: 0,
                    timer: None,
                    next_sync: None,
                    last_sync: None,
                }),
                events: EventBus::new(),
                runtime,
            }),
        })
    }

    /// Id used to tag this scheduler's events.
    pub fn instance_id(&self) -> &str {
        &self.shared.instance_id
    }

    /// Returns the executor.
    pub fn executor(&self) -> &Arc<E> {
        &self.shared.executor
    }

    /// Returns a copy of the current settings.
    pub fn settings(&self) -> SchedulerSettings {
        self.shared.settings.read().clone()
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.shared.timeline.lock().state
    }

    /// Returns true while the scheduler is running.
    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// When the last pass completed successfully.
    pub fn last_sync_time(&self) -> Option<SystemTime> {
        self.shared.timeline.lock().last_sync.map(|(_, at)| at)
    }

    /// When the next timer-driven pass is due. `None` when not running.
    pub fn next_sync_time(&self) -> Option<SystemTime> {
        self.shared.timeline.lock().next_sync
    }

    /// Returns a receiver for this scheduler's events.
    pub fn subscribe(&self) -> UnboundedReceiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Starts the scheduler.
    ///
    /// Arms the first timer one interval from now. With
    /// `initial_sync_on_startup` a manual-tagged pass is also spawned right
    /// away; its failure is logged, never returned.
    pub fn start(&self) {
        {
            let mut timeline = self.shared.timeline.lock();
            if matches!(
                timeline.state,
                SchedulerState::Running | SchedulerState::Starting
            ) {
                return;
            }
            timeline.state = SchedulerState::Starting;
        }

        let settings = self.settings();
        if settings.initial_sync_on_startup {
            let shared = Arc::clone(&self.shared);
            self.shared.runtime.spawn(async move {
                if let Err(e) = shared.run_sync_pass(Vec::new(), false).await {
                    error!(instance = %shared.instance_id, error = %e, "initial sync failed");
                }
            });
        }

        let mut timeline = self.shared.timeline.lock();
        timeline.state = SchedulerState::Running;
        Shared::arm(&self.shared, &mut timeline, settings.interval());

        info!(
            instance = %self.shared.instance_id,
            interval_ms = settings.interval_ms,
            "auto-sync scheduler started"
        );
    }

    /// Stops the scheduler and cancels the pending timer.
    ///
    /// A pass that is already running is not interrupted, but it will not
    /// re-arm the timer when it finishes.
    pub fn stop(&self) {
        let mut timeline = self.shared.timeline.lock();
        if timeline.state == SchedulerState::Stopped {
            return;
        }

        timeline.state = SchedulerState::Stopping;
        if let Some(timer) = timeline.timer.take() {
            timer.abort();
        }
        timeline.generation += 1;
        timeline.next_sync = None;
        timeline.state = SchedulerState::Stopped;

        info!(instance = %self.shared.instance_id, "auto-sync scheduler stopped");
    }

    /// Stops then starts the scheduler.
    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Changes the interval. A running scheduler restarts so the new
    /// interval applies from now.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] for a zero interval.
    pub fn update_interval(&self, interval: Duration) -> SyncResult<()> {
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        validate_interval_ms(interval_ms)?;

        self.shared.settings.write().interval_ms = interval_ms;
        debug!(instance = %self.shared.instance_id, interval_ms, "interval updated");

        if self.is_running() {
            self.restart();
        }
        Ok(())
    }

    /// Replaces all settings. The scheduler is stopped, and started again
    /// only if the new settings are enabled.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] for invalid settings; the old
    /// settings stay in effect.
    pub fn update_settings(&self, settings: SchedulerSettings) -> SyncResult<()> {
        settings.validate()?;

        self.stop();
        let enabled = settings.enabled;
        *self.shared.settings.write() = settings;

        if enabled {
            self.start();
        }
        Ok(())
    }

    /// Runs a manual pass now and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyInProgress`] without touching the executor
    /// if a pass is running, otherwise the pass's final error once retries
    /// are exhausted.
    pub async fn force_sync_now(&self, channels: &[String]) -> SyncResult<SyncOutcome> {
        if self.shared.executor.is_sync_in_progress() {
            return Err(SyncError::AlreadyInProgress);
        }
        self.shared.run_sync_pass(channels.to_vec(), false).await
    }
}

impl<E: SyncExecutor + 'static> Drop for AutoSyncScheduler<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<E: SyncExecutor + 'static> fmt::Debug for AutoSyncScheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSyncScheduler")
            .field("instance_id", &self.shared.instance_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<E: SyncExecutor + 'static> Shared<E> {
    /// Arms the timer to fire after `delay`, replacing any pending one.
    fn arm(shared: &Arc<Self>, timeline: &mut Timeline, delay: Duration) {
        if let Some(timer) = timeline.timer.take() {
            timer.abort();
        }
        timeline.generation += 1;
        timeline.next_sync = Some(SystemTime::now() + delay);

        let generation = timeline.generation;
        let weak: Weak<Self> = Arc::downgrade(shared);
        timeline.timer = Some(shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                Shared::perform_scheduled_sync(&shared, generation).await;
            }
        }));

        debug!(instance = %shared.instance_id, ?delay, "sync timer armed");
    }

    async fn perform_scheduled_sync(shared: &Arc<Self>, generation: u64) {
        let interval = shared.settings.read().interval();

        {
            let mut timeline = shared.timeline.lock();
            if timeline.state != SchedulerState::Running || timeline.generation != generation {
                return;
            }
            timeline.timer = None;
            timeline.next_sync = None;

            if shared.executor.is_sync_in_progress() {
                debug!(instance = %shared.instance_id, "sync in progress, skipping cycle");
                Shared::arm(shared, &mut timeline, interval);
                return;
            }

            if let Some((last, _)) = timeline.last_sync {
                let elapsed = last.elapsed();
                if elapsed < MIN_SYNC_SPACING {
                    let remaining = MIN_SYNC_SPACING - elapsed;
                    debug!(
                        instance = %shared.instance_id,
                        ?remaining,
                        "last sync too recent, deferring"
                    );
                    Shared::arm(shared, &mut timeline, remaining);
                    return;
                }
            }

            timeline.next_sync = Some(SystemTime::now() + interval);
        }

        if let Err(e) = shared.run_sync_pass(Vec::new(), true).await {
            error!(instance = %shared.instance_id, error = %e, "scheduled sync failed");
        }

        let mut timeline = shared.timeline.lock();
        if timeline.state == SchedulerState::Running && timeline.generation == generation {
            Shared::arm(shared, &mut timeline, interval);
        }
    }

    async fn run_sync_pass(
        self: &Arc<Self>,
        channels: Vec<String>,
        is_auto_sync: bool,
    ) -> SyncResult<SyncOutcome> {
        let settings = self.settings.read().clone();
        let policy = settings.retry_policy();
        let timeout = settings.sync_timeout();
        let started = Instant::now();
        let mut retry_count = 0u32;
        let mut timed_out = false;

        self.emit(&channels, is_auto_sync, SyncEventKind::Start);

        loop {
            let result = match self.execute_with_timeout(&channels, timeout).await {
                // The call that timed out is still running and holds the
                // executor; the attempt counts as another timeout.
                Err(SyncError::AlreadyInProgress) if timed_out => Err(SyncError::Timeout(timeout)),
                other => other,
            };
            if matches!(result, Err(SyncError::Timeout(_))) {
                timed_out = true;
            }

            match result {
                Ok(outcome) => {
                    self.timeline.lock().last_sync = Some((Instant::now(), SystemTime::now()));
                    let duration = started.elapsed();

                    info!(
                        instance = %self.instance_id,
                        auto = is_auto_sync,
                        messages = outcome.messages_count,
                        ?duration,
                        "sync completed"
                    );
                    self.emit(
                        &channels,
                        is_auto_sync,
                        SyncEventKind::Complete {
                            messages_count: outcome.messages_count,
                            duration,
                        },
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    self.emit(
                        &channels,
                        is_auto_sync,
                        SyncEventKind::Error {
                            error: e.to_string(),
                            retry_count,
                        },
                    );

                    if !e.is_retryable() || !policy.should_retry(retry_count) {
                        return Err(e);
                    }

                    let delay = policy.calculate_delay(retry_count);
                    retry_count += 1;
                    warn!(
                        instance = %self.instance_id,
                        attempt = retry_count,
                        ?delay,
                        error = %e,
                        "sync failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn execute_with_timeout(
        &self,
        channels: &[String],
        timeout: Duration,
    ) -> SyncResult<SyncOutcome> {
        let executor = Arc::clone(&self.executor);
        let channels = channels.to_vec();
        let task = self
            .runtime
            .spawn(async move { executor.execute_sync(&channels).await });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SyncError::Executor(format!("sync task failed: {e}"))),
            Err(_) => {
                warn!(instance = %self.instance_id, ?timeout, "sync timed out");
                Err(SyncError::Timeout(timeout))
            }
        }
    }

    fn emit(&self, channels: &[String], is_auto_sync: bool, kind: SyncEventKind) {
        self.events.emit(SyncEvent {
            timestamp: SystemTime::now(),
            instance_id: self.instance_id.clone(),
            channels: channels.to_vec(),
            is_auto_sync,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SyncExecutor for CountingExecutor {
        async fn execute_sync(&self, _channels: &[String]) -> SyncResult<SyncOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SyncOutcome::default())
        }

        fn is_sync_in_progress(&self) -> bool {
            false
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings::new(Duration::from_secs(300)).with_enabled(true)
    }

    #[test]
    fn state_names() {
        assert_eq!(SchedulerState::Stopped.to_string(), "stopped");
        assert_eq!(SchedulerState::Running.to_string(), "running");
    }

    #[test]
    fn requires_runtime() {
        let result = AutoSyncScheduler::new(Arc::new(CountingExecutor::default()), settings());
        assert!(matches!(result, Err(SyncError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_rejected_at_construction() {
        let settings = SchedulerSettings::new(Duration::ZERO);
        let result = AutoSyncScheduler::new(Arc::new(CountingExecutor::default()), settings);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let scheduler =
            AutoSyncScheduler::new(Arc::new(CountingExecutor::default()), settings()).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        scheduler.start();
        let first = scheduler.next_sync_time();
        scheduler.start();
        assert!(scheduler.is_running());
        assert_eq!(scheduler.next_sync_time(), first);

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.next_sync_time().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_fire() {
        let executor = Arc::new(CountingExecutor::default());
        let scheduler = AutoSyncScheduler::new(Arc::clone(&executor), settings()).unwrap();

        scheduler.start();
        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(900)).await;

        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn instance_ids_are_unique() {
        let a = AutoSyncScheduler::new(Arc::new(CountingExecutor::default()), settings()).unwrap();
        let b = AutoSyncScheduler::new(Arc::new(CountingExecutor::default()), settings()).unwrap();
        assert_ne!(a.instance_id(), b.instance_id());
    }
}
