//! Shared fixtures: an in-memory project store and a scripted solver
//! pipeline, wired into an AppState the endpoint tests can serve.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use actix_web::web;
use async_trait::async_trait;
use serde_json::{Value, json};

use kag_gateway::backend::ProjectStore;
use kag_gateway::config::{GatewayConfig, ProjectConfig};
use kag_gateway::error::GatewayError;
use kag_gateway::invoker::PipelineFactory;
use kag_gateway::registry::ProjectRef;
use kag_gateway::server::AppState;
use kag_gateway::solver::{EventSink, PipelineError, SolverPipeline, SolverRequest};

pub struct MockStore {
    projects: Vec<ProjectRef>,
    configs: HashMap<String, Value>,
}

impl MockStore {
    pub fn new(projects: Vec<(&str, &str)>) -> Self {
        MockStore {
            projects: projects
                .into_iter()
                .map(|(name, id)| ProjectRef {
                    name: name.to_string(),
                    id: id.to_string(),
                })
                .collect(),
            configs: HashMap::new(),
        }
    }

    pub fn with_config(mut self, project_id: &str, config: Value) -> Self {
        self.configs.insert(project_id.to_string(), config);
        self
    }
}

#[async_trait]
impl ProjectStore for MockStore {
    async fn get_projects(&self) -> Result<Vec<ProjectRef>, GatewayError> {
        Ok(self.projects.clone())
    }

    async fn get_project_config(&self, project_id: &str) -> Result<ProjectConfig, GatewayError> {
        self.configs
            .get(project_id)
            .cloned()
            .map(ProjectConfig::new)
            .ok_or_else(|| GatewayError::Backend(format!("no config for project {project_id}")))
    }
}

/// A backend configuration that passes every validator rule.
pub fn valid_project_config() -> Value {
    json!({
        "solver_pipeline": {
            "type": "kag_solver_pipeline",
            "llm": {
                "type": "stream_openai_llm",
                "api_key": "sk-test",
                "base_url": "https://llm.example.com/v1",
                "model": "qwen-max",
                "temperature": 0.7,
            }
        }
    })
}

pub enum MockBehavior {
    /// Stream cumulative snapshots, then hand back the terminal answer.
    Answer {
        snapshots: Vec<String>,
        answer: String,
    },
    /// Stream snapshots, then fail.
    Fail {
        snapshots: Vec<String>,
        message: String,
    },
    /// Produce growing snapshots until the consumer goes away.
    Endless,
    /// Stream snapshots, then go silent without ever finishing.
    Stall { snapshots: Vec<String> },
}

pub struct MockPipeline {
    pub behavior: MockBehavior,
    pub invocations: AtomicUsize,
    pub released: AtomicBool,
}

impl MockPipeline {
    pub fn answering(snapshots: &[&str], answer: &str) -> Arc<Self> {
        Arc::new(MockPipeline {
            behavior: MockBehavior::Answer {
                snapshots: snapshots.iter().map(|s| s.to_string()).collect(),
                answer: answer.to_string(),
            },
            invocations: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }

    pub fn failing(snapshots: &[&str], message: &str) -> Arc<Self> {
        Arc::new(MockPipeline {
            behavior: MockBehavior::Fail {
                snapshots: snapshots.iter().map(|s| s.to_string()).collect(),
                message: message.to_string(),
            },
            invocations: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }

    pub fn endless() -> Arc<Self> {
        Arc::new(MockPipeline {
            behavior: MockBehavior::Endless,
            invocations: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }

    pub fn stalling(snapshots: &[&str]) -> Arc<Self> {
        Arc::new(MockPipeline {
            behavior: MockBehavior::Stall {
                snapshots: snapshots.iter().map(|s| s.to_string()).collect(),
            },
            invocations: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }

    /// Poll until the invoker has released this pipeline's execution.
    pub async fn wait_released(&self) -> bool {
        for _ in 0..200 {
            if self.released.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl SolverPipeline for MockPipeline {
    async fn run(
        &self,
        _request: &SolverRequest,
        sink: &mut EventSink,
    ) -> Result<Option<String>, PipelineError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Answer { snapshots, answer } => {
                for snapshot in snapshots {
                    sink.snapshot(snapshot).await?;
                }
                Ok(Some(answer.clone()))
            }
            MockBehavior::Fail { snapshots, message } => {
                for snapshot in snapshots {
                    sink.snapshot(snapshot).await?;
                }
                Err(PipelineError::Backend(message.clone()))
            }
            MockBehavior::Endless => {
                let mut text = String::new();
                loop {
                    text.push_str("tok ");
                    sink.snapshot(&text).await?;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            }
            MockBehavior::Stall { snapshots } => {
                for snapshot in snapshots {
                    sink.snapshot(snapshot).await?;
                }
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }

    async fn release(&self, _execution_id: &str) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub struct MockFactory {
    pipeline: Arc<MockPipeline>,
    pub builds: AtomicUsize,
}

impl MockFactory {
    pub fn new(pipeline: Arc<MockPipeline>) -> Arc<Self> {
        Arc::new(MockFactory {
            pipeline,
            builds: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PipelineFactory for MockFactory {
    async fn build(&self, _project: &ProjectRef) -> Result<Arc<dyn SolverPipeline>, GatewayError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.pipeline.clone())
    }
}

/// One BaiKe project backed by the given pipeline, served with defaults.
pub async fn app_state(pipeline: Arc<MockPipeline>) -> web::Data<AppState> {
    app_state_with_config(pipeline, GatewayConfig::default()).await
}

pub async fn app_state_with_config(
    pipeline: Arc<MockPipeline>,
    config: GatewayConfig,
) -> web::Data<AppState> {
    let store = Arc::new(
        MockStore::new(vec![("BaiKe", "2"), ("CsQa", "3")])
            .with_config("2", valid_project_config()),
    );
    let factory = MockFactory::new(pipeline);
    web::Data::new(AppState::new(&config, store, factory).await)
}

/// Parse SSE data frames out of a response body.
pub fn parse_sse_frames(body: &str) -> Vec<Value> {
    let mut events = Vec::new();
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            if data == "[DONE]" {
                continue;
            }
            if let Ok(json) = serde_json::from_str::<Value>(data) {
                events.push(json);
            }
        }
    }
    events
}
