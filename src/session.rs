use crate::config::{Settings, SessionSettings, TargetEnvironment};
use crate::driver::{LoadDriver, RunControl, RunPlan};
use crate::error::{Result, StressError};
use crate::executor::{HttpExecutor, PreparedRequest, RequestExecutor};
use crate::stats::LiveLatency;
use crate::types::{ProgressSnapshot, SessionView, TestConfiguration, TestResult, TestStatus};
use crate::url_builder::build_url;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lifecycle of stress-test runs: `Idle -> Running -> Completed | Stopped`.
///
/// State, live progress and the final result are published through a
/// `watch` channel; see [`TestSession::subscribe`]. Must be used inside a
/// Tokio runtime.
pub struct TestSession<E: RequestExecutor> {
    executor: Arc<E>,
    environment: TargetEnvironment,
    settings: SessionSettings,
    view: Arc<watch::Sender<SessionView>>,
    control: Option<RunControl>,
    task: Option<JoinHandle<TestResult>>,
}

impl TestSession<HttpExecutor> {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let executor = HttpExecutor::new(settings.executor)?;
        Ok(Self::new(
            Arc::new(executor),
            settings.environment.clone(),
            settings.session,
        ))
    }
}

impl<E: RequestExecutor> TestSession<E> {
    pub fn new(executor: Arc<E>, environment: TargetEnvironment, settings: SessionSettings) -> Self {
        let (view, _) = watch::channel(SessionView::default());
        Self {
            executor,
            environment,
            settings,
            view: Arc::new(view),
            control: None,
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn status(&self) -> TestStatus {
        self.view.borrow().status
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.view.borrow().progress.clone()
    }

    pub fn result(&self) -> Option<TestResult> {
        self.view.borrow().result.clone()
    }

    /// Starts a run in the background and returns its id.
    ///
    /// Rejected with [`StressError::AlreadyRunning`] while a run is in
    /// progress; the running one is left alone. A finished run is discarded
    /// as if [`reset`](Self::reset) had been called.
    pub fn start(&mut self, config: TestConfiguration) -> Result<Uuid> {
        if self.status() == TestStatus::Running {
            return Err(StressError::AlreadyRunning);
        }
        // Reject bad input before touching the current state
        let planned_requests = self.validate(&config)?;
        let url = build_url(&self.environment, &config.target, &config.custom_parameters)?;
        let mut live = LiveLatency::new()?;

        self.reset();

        let run_id = Uuid::new_v4();
        let plan = RunPlan {
            run_id,
            request: PreparedRequest {
                url,
                method: config.method,
                headers: config.headers,
                timeout: Duration::from_millis(config.timeout_ms),
            },
            concurrency: config.concurrency,
            rounds: config.rounds,
        };
        let control = RunControl::default();

        // Publish the running state before the task gets a chance to run
        self.view.send_replace(SessionView {
            run_id: Some(run_id),
            status: TestStatus::Running,
            progress: ProgressSnapshot {
                planned_requests,
                total_rounds: plan.rounds,
                ..ProgressSnapshot::default()
            },
            result: None,
        });

        // Drive the run in the background
        let driver = LoadDriver::new(Arc::clone(&self.executor));
        let view = Arc::clone(&self.view);
        let task_control = control.clone();
        self.task = Some(tokio::spawn(async move {
            let progress_view = Arc::clone(&view);
            let result = driver
                .run(&plan, &task_control, &mut live, move |snapshot| {
                    publish(&progress_view, run_id, |current| current.progress = snapshot);
                })
                .await;

            let status = if result.termination.is_completed() {
                TestStatus::Completed
            } else {
                TestStatus::Stopped
            };
            let published = result.clone();
            publish(&view, run_id, move |current| {
                current.status = status;
                current.result = Some(published);
            });
            result
        }));
        self.control = Some(control);

        Ok(run_id)
    }

    /// Requests a graceful stop: the round in flight is allowed to finish,
    /// no further round starts. Returns whether a run was stopped.
    pub fn stop(&self) -> bool {
        match (&self.control, self.status()) {
            (Some(control), TestStatus::Running) => {
                info!("⏹️ Stop requested for run {}", self.current_run());
                control.stop.cancel();
                true
            }
            _ => false,
        }
    }

    /// Like [`stop`](Self::stop), but also abandons in-flight requests. Their
    /// outcomes are left out of the result.
    pub fn abort(&self) -> bool {
        match (&self.control, self.status()) {
            (Some(control), TestStatus::Running) => {
                info!("🛑 Abort requested for run {}", self.current_run());
                control.abort.cancel();
                true
            }
            _ => false,
        }
    }

    /// Waits for the current run to end and returns its result.
    pub async fn wait(&mut self) -> Option<TestResult> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => Some(result),
                Err(e) => {
                    error!("Stress test task failed: {}", e);
                    None
                }
            },
            None => self.result(),
        }
    }

    /// Back to `Idle`, dropping configuration, samples and result. A run
    /// still in progress is aborted.
    pub fn reset(&mut self) {
        if let Some(control) = self.control.take() {
            control.abort.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.view.send_replace(SessionView::default());
    }

    fn current_run(&self) -> String {
        self.view
            .borrow()
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_default()
    }

    fn validate(&self, config: &TestConfiguration) -> Result<u64> {
        if config.concurrency < 1 {
            return Err(StressError::InvalidConfiguration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if config.rounds < 1 {
            return Err(StressError::InvalidConfiguration(
                "rounds must be at least 1".to_string(),
            ));
        }
        if config.timeout_ms == 0 {
            return Err(StressError::InvalidConfiguration(
                "timeoutMs must be positive".to_string(),
            ));
        }
        match config.total_requests() {
            Some(total) if total <= self.settings.max_total_requests => Ok(total),
            _ => Err(StressError::InvalidConfiguration(format!(
                "{} x {} requests exceeds the limit of {}",
                config.concurrency, config.rounds, self.settings.max_total_requests
            ))),
        }
    }
}

impl<E: RequestExecutor> Drop for TestSession<E> {
    fn drop(&mut self) {
        if let Some(control) = &self.control {
            control.abort.cancel();
        }
    }
}

/// Applies `update` unless the session has moved on to another run.
fn publish<F>(view: &watch::Sender<SessionView>, run_id: Uuid, update: F)
where
    F: FnOnce(&mut SessionView),
{
    view.send_if_modified(|current| {
        if current.run_id != Some(run_id) {
            return false;
        }
        update(current);
        true
    });
}
