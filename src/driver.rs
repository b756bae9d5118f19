use crate::error::ExecuteError;
use crate::executor::{PreparedRequest, RequestExecutor};
use crate::stats::{summarize, LiveLatency, RunWindow};
use crate::types::{ProgressSnapshot, RequestResult, TestResult, Termination};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One run, already validated: the request to repeat and its shape.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: Uuid,
    pub request: PreparedRequest,
    pub concurrency: u32,
    pub rounds: u32,
}

impl RunPlan {
    pub fn planned_requests(&self) -> u64 {
        u64::from(self.concurrency) * u64::from(self.rounds)
    }
}

/// `stop` ends the run once the current round has settled; `abort` also
/// abandons the requests still in flight.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub stop: CancellationToken,
    pub abort: CancellationToken,
}

impl RunControl {
    fn should_stop(&self) -> bool {
        self.stop.is_cancelled() || self.abort.is_cancelled()
    }
}

#[derive(Default)]
struct RoundOutcome {
    samples: Vec<RequestResult>,
    aborted: bool,
    fatal: Option<String>,
}

pub struct LoadDriver<E> {
    executor: Arc<E>,
}

impl<E: RequestExecutor> LoadDriver<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self { executor }
    }

    /// Runs `plan.rounds` sequential rounds of `plan.concurrency` concurrent
    /// requests and reports progress after every round.
    ///
    /// Request failures never end the run early. Whatever way the run ends,
    /// the returned result covers every sample gathered up to that point.
    pub async fn run<F>(
        &self,
        plan: &RunPlan,
        control: &RunControl,
        live: &mut LiveLatency,
        mut on_progress: F,
    ) -> TestResult
    where
        F: FnMut(ProgressSnapshot) + Send,
    {
        let start_time = Utc::now();
        let started = Instant::now();
        let mut samples: Vec<RequestResult> =
            Vec::with_capacity(plan.planned_requests().min(1 << 16) as usize);
        let mut termination = Termination::Completed;

        info!(
            "Run {}: {} {} x {} rounds against {}",
            plan.run_id, plan.request.method, plan.concurrency, plan.rounds, plan.request.url
        );

        for round in 0..plan.rounds {
            // Stop requested while idle between rounds
            if control.should_stop() {
                termination = self.stopped_by(control);
                break;
            }

            // Fire the round and wait for it to settle
            let outcome = self.run_round(plan, control).await;
            for sample in &outcome.samples {
                live.record(sample);
            }
            samples.extend(outcome.samples);

            // Publish progress once per round
            let snapshot = progress(plan, samples.len() as u64, round + 1, started, live);
            debug!(
                "Run {}: round {}/{} done, {} requests, {:.1} req/s",
                plan.run_id,
                round + 1,
                plan.rounds,
                snapshot.current_requests,
                snapshot.current_rps
            );
            on_progress(snapshot);

            if let Some(message) = outcome.fatal {
                error!("Run {}: aborting after fatal error: {}", plan.run_id, message);
                termination = Termination::Failed(message);
                break;
            }
            if outcome.aborted {
                termination = Termination::Aborted;
                break;
            }
            // A stop during the last round changes nothing, every round ran
            let more_rounds = round + 1 < plan.rounds;
            if more_rounds && control.should_stop() {
                termination = self.stopped_by(control);
                break;
            }
        }

        // Summarize whatever was gathered

        let window = RunWindow {
            run_id: plan.run_id,
            start_time,
            end_time: Utc::now(),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            termination,
        };
        let result = summarize(&samples, &window);

        info!(
            "Run {} finished ({:?}): {}/{} succeeded in {:.2}s, {:.1} req/s",
            plan.run_id,
            result.termination,
            result.success_requests,
            result.total_requests,
            result.duration_ms / 1000.0,
            result.requests_per_second
        );
        result
    }

    fn stopped_by(&self, control: &RunControl) -> Termination {
        if control.abort.is_cancelled() {
            Termination::Aborted
        } else {
            Termination::Stopped
        }
    }

    /// Fires the whole batch, then waits for every request to settle.
    /// Samples come back in completion order.
    async fn run_round(&self, plan: &RunPlan, control: &RunControl) -> RoundOutcome {
        // Launch the whole batch at once
        let mut in_flight: FuturesUnordered<_> = (0..plan.concurrency)
            .map(|_| self.executor.execute(&plan.request, &control.abort))
            .collect();
        let mut outcome = RoundOutcome {
            samples: Vec::with_capacity(plan.concurrency as usize),
            ..RoundOutcome::default()
        };

        // Collect in completion order until drained or aborted
        loop {
            tokio::select! {
                biased;
                _ = control.abort.cancelled() => {
                    outcome.aborted = true;
                    break;
                }
                next = in_flight.next() => match next {
                    None => break,
                    Some(Ok(sample)) => outcome.samples.push(sample),
                    Some(Err(ExecuteError::Cancelled)) => outcome.aborted = true,
                    Some(Err(ExecuteError::Fatal(message))) => {
                        outcome.fatal.get_or_insert(message);
                    }
                },
            }
        }
        if !in_flight.is_empty() {
            warn!(
                "Run {}: abandoned {} in-flight requests",
                plan.run_id,
                in_flight.len()
            );
        }
        outcome
    }
}

fn progress(
    plan: &RunPlan,
    current_requests: u64,
    rounds_completed: u32,
    started: Instant,
    live: &LiveLatency,
) -> ProgressSnapshot {
    let planned_requests = plan.planned_requests();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    ProgressSnapshot {
        current_requests,
        planned_requests,
        rounds_completed,
        total_rounds: plan.rounds,
        progress_percent: if planned_requests == 0 {
            0.0
        } else {
            current_requests as f64 / planned_requests as f64 * 100.0
        },
        elapsed_ms,
        current_rps: if elapsed_ms > 0.0 {
            current_requests as f64 / (elapsed_ms / 1000.0)
        } else {
            0.0
        },
        success_so_far: live.successful_requests,
        failed_so_far: live.failed_requests,
        live_p95: live.p95(),
    }
}
