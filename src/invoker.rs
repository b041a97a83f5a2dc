use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ProjectStore, RemoteSolverPipeline};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::openai_api_types::ChatMessage;
use crate::registry::ProjectRef;
use crate::solver::{
    EventSink, FailureCause, FailureKind, FinishReason, PipelineError, SolverEvent, SolverOptions,
    SolverPipeline, SolverRequest,
};

/// Builds one pipeline instance per project. The invoker caches what this
/// returns, so instances must tolerate many concurrent executions.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    async fn build(&self, project: &ProjectRef) -> Result<Arc<dyn SolverPipeline>, GatewayError>;
}

/// Default factory: fetches the project's configuration from the store and
/// wires a remote reasoner pipeline for it.
pub struct DefaultPipelineFactory {
    store: Arc<dyn ProjectStore>,
    client: reqwest::Client,
    backend_url: String,
}

impl DefaultPipelineFactory {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        client: reqwest::Client,
        backend_url: impl Into<String>,
    ) -> Self {
        DefaultPipelineFactory {
            store,
            client,
            backend_url: backend_url.into(),
        }
    }
}

#[async_trait]
impl PipelineFactory for DefaultPipelineFactory {
    async fn build(&self, project: &ProjectRef) -> Result<Arc<dyn SolverPipeline>, GatewayError> {
        let config = self.store.get_project_config(&project.id).await?;
        if config.solver_pipeline().is_none() {
            return Err(GatewayError::Backend(format!(
                "project '{}' has no solver_pipeline configured",
                project.name
            )));
        }
        info!("built solver pipeline for project {}", project.name);
        Ok(Arc::new(RemoteSolverPipeline::new(
            self.client.clone(),
            self.backend_url.clone(),
            project.id.clone(),
        )))
    }
}

/// Pull side of one execution's event stream.
///
/// Wraps the bounded channel with the idle-between-events guard: when the
/// backend goes silent without signaling `Done`, the stream closes the
/// channel (which cancels the producer at its next send) and synthesizes
/// the `Failure`/`Done(cancelled)` pair instead of hanging the transport.
pub struct SolverStream {
    rx: mpsc::Receiver<SolverEvent>,
    idle_timeout: Duration,
    pending: VecDeque<SolverEvent>,
    finished: bool,
}

impl SolverStream {
    pub(crate) fn new(rx: mpsc::Receiver<SolverEvent>, idle_timeout: Duration) -> Self {
        SolverStream {
            rx,
            idle_timeout,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub async fn next_event(&mut self) -> Option<SolverEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.finished {
            return None;
        }
        match tokio::time::timeout(self.idle_timeout, self.rx.recv()).await {
            Ok(Some(event)) => {
                if matches!(event, SolverEvent::Done(_)) {
                    self.finished = true;
                }
                Some(event)
            }
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(_) => {
                warn!("solver went silent, cancelling execution");
                self.finished = true;
                self.rx.close();
                self.pending
                    .push_back(SolverEvent::Done(FinishReason::Cancelled));
                Some(SolverEvent::Failure(FailureCause {
                    kind: FailureKind::Timeout,
                    message: format!(
                        "no solver output for {} seconds",
                        self.idle_timeout.as_secs()
                    ),
                }))
            }
        }
    }
}

/// Opens solver executions and bridges their output onto per-request event
/// streams.
///
/// Pipeline instances are built once per project id and reused read-only
/// across requests; every `invoke` spawns an independent producer task, so
/// concurrent requests never share mutable execution state.
pub struct PipelineInvoker {
    factory: Arc<dyn PipelineFactory>,
    pipelines: DashMap<String, Arc<dyn SolverPipeline>>,
    request_timeout: Duration,
    idle_timeout: Duration,
    event_buffer: usize,
}

impl PipelineInvoker {
    pub fn new(factory: Arc<dyn PipelineFactory>, config: &GatewayConfig) -> Self {
        PipelineInvoker {
            factory,
            pipelines: DashMap::new(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            event_buffer: config.event_buffer_size,
        }
    }

    async fn pipeline_for(
        &self,
        project: &ProjectRef,
    ) -> Result<Arc<dyn SolverPipeline>, GatewayError> {
        if let Some(cached) = self.pipelines.get(&project.id) {
            return Ok(cached.clone());
        }
        let built = self.factory.build(project).await?;
        // two concurrent misses may both build; the first insert wins and
        // instances are stateless, so the extra build is harmless
        Ok(self
            .pipelines
            .entry(project.id.clone())
            .or_insert(built)
            .value()
            .clone())
    }

    pub async fn invoke(
        &self,
        project: &ProjectRef,
        query: impl Into<String>,
        history: Vec<ChatMessage>,
        options: SolverOptions,
    ) -> Result<SolverStream, GatewayError> {
        let pipeline = self.pipeline_for(project).await?;
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let request = SolverRequest {
            execution_id: Uuid::new_v4().to_string(),
            query: query.into(),
            history,
            options,
        };
        let request_timeout = self.request_timeout;
        let timeout_secs = self.request_timeout.as_secs();

        tokio::spawn(async move {
            let execution_id = request.execution_id.clone();
            let mut sink = EventSink::new(tx);
            // sends after the consumer is gone are deliberately ignored
            match tokio::time::timeout(request_timeout, pipeline.run(&request, &mut sink)).await {
                Ok(Ok(answer)) => {
                    if let Some(text) = answer {
                        let _ = sink.snapshot(&text).await;
                    }
                    let _ = sink.send(SolverEvent::Done(FinishReason::Stop)).await;
                }
                Ok(Err(PipelineError::Cancelled)) => {
                    debug!("execution {} cancelled by consumer", execution_id);
                }
                Ok(Err(PipelineError::Backend(message))) => {
                    warn!("execution {} failed: {}", execution_id, message);
                    let _ = sink
                        .send(SolverEvent::Failure(FailureCause {
                            kind: FailureKind::Backend,
                            message,
                        }))
                        .await;
                    let _ = sink.send(SolverEvent::Done(FinishReason::Error)).await;
                }
                Err(_elapsed) => {
                    warn!("execution {} exceeded {}s", execution_id, timeout_secs);
                    let _ = sink
                        .send(SolverEvent::Failure(FailureCause {
                            kind: FailureKind::Timeout,
                            message: format!("execution exceeded {timeout_secs} seconds"),
                        }))
                        .await;
                    let _ = sink.send(SolverEvent::Done(FinishReason::Cancelled)).await;
                }
            }
            pipeline.release(&execution_id).await;
        });

        Ok(SolverStream::new(rx, self.idle_timeout))
    }
}
