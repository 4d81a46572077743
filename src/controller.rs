use crate::config::EngineConfig;
use crate::engine::orchestrator::Orchestrator;
use crate::engine::signal::RunSignal;
use crate::engine::ProgressSink;
use crate::errors::{SimResult, SimulationError};
use crate::risk::limits::{self, MemoryProbe, SystemMemory};
use crate::state::{
    millis, ControllerState, ControllerStatus, ProgressInfo, RunPhase, SimulationParameters,
    SimulationResult, StatusEvent, StatusKind,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

pub type ProgressObserver = Arc<dyn Fn(&ProgressInfo) + Send + Sync>;
pub type StatusObserver = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

/// Start/pause/resume/cancel state machine around one run at a time.
///
/// Cheap to clone; clones share the same run. Pause and resume only move
/// bookkeeping and the pause gate, the run itself stops at its next batch
/// boundary.
#[derive(Clone)]
pub struct SimulationController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    state: Mutex<ControllerState>,
    signal: Mutex<Option<Arc<RunSignal>>>,
    progress_observers: Mutex<Vec<ProgressObserver>>,
    status_observers: Mutex<Vec<StatusObserver>>,
    memory: Arc<dyn MemoryProbe>,
}

/// Poisoned locks are recovered: the bookkeeping stays usable after a
/// panicking observer.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ControllerInner {
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        lock(&self.state)
    }

    fn current_signal(&self) -> Option<Arc<RunSignal>> {
        lock(&self.signal).clone()
    }

    fn notify_status(&self, status: StatusKind, error: Option<&SimulationError>) {
        let (elapsed, run_id) = {
            let st = self.state();
            (millis(st.elapsed(Instant::now())), st.run_id)
        };
        let event = StatusEvent {
            status,
            timestamp: chrono::Utc::now().timestamp_millis(),
            elapsed_time: elapsed,
            run_id,
            error: error.map(|e| e.to_string()),
            error_kind: error.map(SimulationError::kind),
        };
        // Snapshot so observers may register or call back into the controller
        let observers = lock(&self.status_observers).clone();
        for observer in &observers {
            observer(&event);
        }
    }

    fn update_progress(&self, progress: f64, stage: &str) {
        let info = {
            let mut st = self.state();
            st.progress = progress.clamp(0.0, 100.0);
            let now = Instant::now();
            ProgressInfo {
                progress: st.progress,
                stage: stage.to_string(),
                elapsed_time: millis(st.elapsed(now)),
                estimated_time_remaining: millis(st.estimated_remaining(now)),
            }
        };
        let observers = lock(&self.progress_observers).clone();
        for observer in &observers {
            observer(&info);
        }
    }
}

/// Progress adapter handed to a runner. Refuses reports once the run is
/// canceled so the runner unwinds at its next report.
pub struct ProgressReporter {
    inner: Arc<ControllerInner>,
    signal: Arc<RunSignal>,
}

impl ProgressSink for ProgressReporter {
    fn report(&self, progress: f64, stage: &str) -> SimResult<()> {
        if self.signal.is_canceled() {
            return Err(SimulationError::Canceled {
                completed_simulations: 0,
            });
        }
        self.inner.update_progress(progress, stage);
        Ok(())
    }
}

/// Resets the running flags however `start` exits, including when its
/// future is dropped mid-run.
struct RunGuard<'a> {
    inner: &'a ControllerInner,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.inner.state();
        if let Some(paused_at) = st.pause_time.take() {
            st.total_pause_time += Instant::now().saturating_duration_since(paused_at);
        }
        if matches!(st.phase, RunPhase::Running | RunPhase::Paused) {
            st.phase = RunPhase::Canceled;
        }
        st.is_running = false;
        st.is_paused = false;
        drop(st);
        *lock(&self.inner.signal) = None;
    }
}

impl Default for SimulationController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationController {
    pub fn new() -> Self {
        Self::with_memory_probe(Arc::new(SystemMemory))
    }

    pub fn with_memory_probe(memory: Arc<dyn MemoryProbe>) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(ControllerState::default()),
                signal: Mutex::new(None),
                progress_observers: Mutex::new(Vec::new()),
                status_observers: Mutex::new(Vec::new()),
                memory,
            }),
        }
    }

    pub fn on_progress<F>(&self, observer: F)
    where
        F: Fn(&ProgressInfo) + Send + Sync + 'static,
    {
        lock(&self.inner.progress_observers).push(Arc::new(observer));
    }

    pub fn on_status_change<F>(&self, observer: F)
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        lock(&self.inner.status_observers).push(Arc::new(observer));
    }

    pub fn get_status(&self) -> ControllerStatus {
        self.inner.state().snapshot(Instant::now())
    }

    /// Range checks plus the whole-run memory estimate against free memory.
    fn preflight(&self, params: &SimulationParameters) -> SimResult<()> {
        params.validate()?;

        let estimated_mb = limits::estimate_memory_mb(params);
        let available_mb = self
            .inner
            .memory
            .snapshot()
            .map(|s| s.available_mb())
            .unwrap_or(limits::DEFAULT_AVAILABLE_MB);

        if estimated_mb > available_mb * limits::START_USAGE_LIMIT {
            return Err(SimulationError::InsufficientMemory(format!(
                "estimated {estimated_mb:.1}MB, available {available_mb:.1}MB"
            )));
        }
        Ok(())
    }

    /// Run `runner` under this controller.
    ///
    /// The runner receives the parameters, a progress adapter and the run's
    /// signal. A new run may start once the previous one has ended,
    /// whatever its outcome.
    pub async fn start<F, Fut>(
        &self,
        params: SimulationParameters,
        runner: F,
    ) -> SimResult<SimulationResult>
    where
        F: FnOnce(SimulationParameters, ProgressReporter, Arc<RunSignal>) -> Fut,
        Fut: Future<Output = SimResult<SimulationResult>>,
    {
        let signal = Arc::new(RunSignal::new());
        let run_id = {
            let mut st = self.inner.state();
            if st.is_running {
                return Err(SimulationError::AlreadyRunning);
            }
            let run_id = uuid::Uuid::new_v4();
            *st = ControllerState {
                phase: RunPhase::Running,
                is_running: true,
                start_time: Some(Instant::now()),
                run_id: Some(run_id),
                ..ControllerState::default()
            };
            run_id
        };
        *lock(&self.inner.signal) = Some(signal.clone());
        let _guard = RunGuard { inner: &self.inner };

        tracing::info!(%run_id, simulations = params.num_simulations, "run started");
        self.inner.notify_status(StatusKind::Started, None);

        let outcome = match self.preflight(&params) {
            Ok(()) => {
                let reporter = ProgressReporter {
                    inner: self.inner.clone(),
                    signal: signal.clone(),
                };
                runner(params, reporter, signal).await
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(result) => {
                self.inner.state().phase = RunPhase::Completed;
                tracing::info!(
                    %run_id,
                    completed = result.statistics.completed_simulations,
                    "run completed"
                );
                self.inner.notify_status(StatusKind::Completed, None);
            }
            Err(e) if e.is_canceled() => {
                self.inner.state().phase = RunPhase::Canceled;
                tracing::info!(%run_id, error = %e, "run canceled");
            }
            Err(e) => {
                self.inner.state().phase = RunPhase::Failed;
                tracing::error!(%run_id, error = %e, "run failed");
                self.inner.notify_status(StatusKind::Error, Some(e));
            }
        }

        outcome
    }

    /// `start` with the production orchestrator built from `config`.
    pub async fn start_simulation(
        &self,
        params: SimulationParameters,
        config: &EngineConfig,
    ) -> SimResult<SimulationResult> {
        let config = config.clone();
        let memory = self.inner.memory.clone();
        self.start(params, move |params, reporter, signal| async move {
            let mut orchestrator = Orchestrator::from_config(&config).with_memory_probe(memory);
            orchestrator
                .run(
                    &params,
                    Some(&reporter as &dyn ProgressSink),
                    Some(signal.as_ref()),
                )
                .await
        })
        .await
    }

    pub fn pause(&self) -> SimResult<()> {
        let signal = {
            let mut st = self.inner.state();
            if st.phase != RunPhase::Running {
                return Err(SimulationError::InvalidState(format!("cannot pause while {}", st.phase)));
            }
            let Some(signal) = self.inner.current_signal().filter(|s| !s.is_canceled()) else {
                return Err(SimulationError::InvalidState("cannot pause a canceled run".into()));
            };
            st.phase = RunPhase::Paused;
            st.is_paused = true;
            st.pause_time = Some(Instant::now());
            signal
        };
        signal.pause();
        tracing::info!("run paused");
        self.inner.notify_status(StatusKind::Paused, None);
        Ok(())
    }

    pub fn resume(&self) -> SimResult<()> {
        let signal = {
            let mut st = self.inner.state();
            if st.phase != RunPhase::Paused {
                return Err(SimulationError::InvalidState(format!("cannot resume while {}", st.phase)));
            }
            if let Some(paused_at) = st.pause_time.take() {
                st.total_pause_time += Instant::now().saturating_duration_since(paused_at);
            }
            st.phase = RunPhase::Running;
            st.is_paused = false;
            self.inner.current_signal()
        };
        if let Some(signal) = signal {
            signal.resume();
        }
        tracing::info!("run resumed");
        self.inner.notify_status(StatusKind::Resumed, None);
        Ok(())
    }

    /// Signal the running run to stop. The phase becomes `Canceled` once
    /// the runner unwinds. Repeated calls before then are no-ops.
    pub fn cancel(&self) -> SimResult<()> {
        let signal = {
            let mut st = self.inner.state();
            if !st.is_running {
                return Err(SimulationError::InvalidState(format!("cannot cancel while {}", st.phase)));
            }
            let Some(signal) = self.inner.current_signal() else {
                return Err(SimulationError::InvalidState("run has no signal".into()));
            };
            if signal.is_canceled() {
                return Ok(());
            }
            if let Some(paused_at) = st.pause_time.take() {
                st.total_pause_time += Instant::now().saturating_duration_since(paused_at);
            }
            st.is_paused = false;
            if st.phase == RunPhase::Paused {
                st.phase = RunPhase::Running;
            }
            signal
        };
        signal.cancel();
        tracing::info!("run cancel requested");
        self.inner.notify_status(StatusKind::Cancelled, None);
        Ok(())
    }

    /// Cancel any running run and drop every observer.
    pub fn cleanup(&self) {
        if self.inner.state().is_running {
            if let Err(e) = self.cancel() {
                tracing::debug!(error = %e, "cleanup cancel skipped");
            }
        }
        lock(&self.inner.progress_observers).clear();
        lock(&self.inner.status_observers).clear();
    }
}
