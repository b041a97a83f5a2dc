use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::openai_api_types::ChatMessage;

/// Why a solver execution stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Error,
    Cancelled,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Error => "error",
            FinishReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Backend,
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
}

/// One unit of solver output. Produced lazily, consumed exactly once and in
/// order by the response framer. `Done` is always the last event of an
/// execution; after a `Failure` the only event that may follow is `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverEvent {
    TokenDelta(String),
    ToolEvent(Value),
    Failure(FailureCause),
    Done(FinishReason),
}

/// The consumer side of the event channel went away, i.e. the client
/// disconnected or the request was torn down.
#[derive(Debug, Error)]
#[error("event consumer dropped")]
pub struct SinkClosed;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The consumer stopped listening; stop producing and release resources.
    #[error("execution cancelled")]
    Cancelled,
    #[error("{0}")]
    Backend(String),
}

impl From<SinkClosed> for PipelineError {
    fn from(_: SinkClosed) -> Self {
        PipelineError::Cancelled
    }
}

/// Producer side of one execution's event stream.
///
/// Backends report cumulative content snapshots; the sink turns each
/// snapshot into the suffix not yet emitted, so that concatenating every
/// `TokenDelta` reconstructs the terminal text exactly. The channel is
/// bounded: a slow transport suspends the producer at `send` instead of
/// buffering events without limit.
pub struct EventSink {
    tx: mpsc::Sender<SolverEvent>,
    emitted: String,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<SolverEvent>) -> Self {
        EventSink {
            tx,
            emitted: String::new(),
        }
    }

    /// Emit the part of `content` that extends what was already emitted.
    /// Snapshots that do not extend the emitted prefix are skipped, which
    /// keeps the concatenation invariant intact.
    pub async fn snapshot(&mut self, content: &str) -> Result<(), SinkClosed> {
        let Some(delta) = content.strip_prefix(self.emitted.as_str()) else {
            return Ok(());
        };
        if delta.is_empty() {
            return Ok(());
        }
        let delta = delta.to_string();
        self.emitted = content.to_string();
        self.send(SolverEvent::TokenDelta(delta)).await
    }

    pub async fn tool(&mut self, event: Value) -> Result<(), SinkClosed> {
        self.send(SolverEvent::ToolEvent(event)).await
    }

    pub(crate) async fn send(&mut self, event: SolverEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }

    /// Everything emitted so far, in emission order.
    pub fn emitted(&self) -> &str {
        &self.emitted
    }
}

#[derive(Debug, Clone, Default)]
pub struct SolverOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub repetition_penalty: Option<f32>,
}

/// One solver execution request: the query is the last user turn, the
/// preceding turns travel along as history.
#[derive(Debug, Clone)]
pub struct SolverRequest {
    pub execution_id: String,
    pub query: String,
    pub history: Vec<ChatMessage>,
    pub options: SolverOptions,
}

/// One configured solver pipeline. Instances are built once per model and
/// shared; every `run` call is an independent execution with no shared
/// mutable session state, so concurrent calls must be safe.
#[async_trait]
pub trait SolverPipeline: Send + Sync {
    /// Drive one execution. Incremental report snapshots flow through
    /// `sink`; the backend's terminal answer text, if it returns one, is
    /// the Ok value. A `SinkClosed` from the sink converts into
    /// `PipelineError::Cancelled` via `?`.
    async fn run(
        &self,
        request: &SolverRequest,
        sink: &mut EventSink,
    ) -> Result<Option<String>, PipelineError>;

    /// Called exactly once after `run` returns or is abandoned, whatever
    /// the outcome. Implementations release backend resources tied to the
    /// execution here.
    async fn release(&self, _execution_id: &str) {}
}
