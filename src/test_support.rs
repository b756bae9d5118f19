use crate::config::ExecutorSettings;
use crate::error::ExecuteError;
use crate::executor::{
    classify_status, classify_transport_failure, PreparedRequest, RequestExecutor, TransportFailure,
};
use crate::types::RequestResult;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    Ok { ms: f64 },
    Status(u16),
    NetworkFailure,
    Timeout,
    Fatal,
    /// Never answers; only cancellation ends it.
    Hang,
}

/// In-memory executor answering from a script. When the script runs out the
/// last reply repeats.
pub struct ScriptedExecutor {
    replies: Vec<Reply>,
    settings: ExecutorSettings,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    entered: Option<mpsc::UnboundedSender<usize>>,
}

impl ScriptedExecutor {
    pub fn sequence(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            settings: ExecutorSettings::default(),
            calls: AtomicUsize::new(0),
            gate: None,
            entered: None,
        }
    }

    pub fn repeating(reply: Reply) -> Self {
        Self::sequence(vec![reply])
    }

    pub fn assume_rate_limited(mut self, enabled: bool) -> Self {
        self.settings.assume_rate_limited_on_network_failure = enabled;
        self
    }

    /// Every call announces itself on `entered`, then waits for a permit.
    pub fn gated(mut self, gate: Arc<Semaphore>, entered: mpsc::UnboundedSender<usize>) -> Self {
        self.gate = Some(gate);
        self.entered = Some(entered);
        self
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: &PreparedRequest,
        cancel: &CancellationToken,
    ) -> Result<RequestResult, ExecuteError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(entered) = &self.entered {
            let _ = entered.send(index);
        }
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecuteError::Cancelled),
                permit = gate.acquire() => permit.map_err(|_| ExecuteError::Cancelled)?.forget(),
            }
        }

        let reply = self
            .replies
            .get(index)
            .or_else(|| self.replies.last())
            .copied()
            .unwrap_or(Reply::Ok { ms: 1.0 });

        match reply {
            Reply::Ok { ms } => Ok(RequestResult::ok(200, ms, Some(2))),
            Reply::Status(code) => {
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Ok(classify_status(status, 5.0, Some(0)))
            }
            Reply::NetworkFailure => Ok(classify_transport_failure(
                TransportFailure::Network("Failed to fetch".to_string()),
                1.0,
                request.timeout,
                &self.settings,
            )),
            Reply::Timeout => Ok(classify_transport_failure(
                TransportFailure::Timeout,
                request.timeout.as_secs_f64() * 1000.0,
                request.timeout,
                &self.settings,
            )),
            Reply::Fatal => Err(ExecuteError::Fatal("invalid header".to_string())),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(ExecuteError::Cancelled)
            }
        }
    }
}
