use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ProjectConfig;
use crate::error::GatewayError;
use crate::registry::ProjectRef;
use crate::solver::{EventSink, PipelineError, SolverPipeline, SolverRequest};

/// The backend's project/configuration store. Supplies the set of named
/// projects and each project's backend client settings.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_projects(&self) -> Result<Vec<ProjectRef>, GatewayError>;
    async fn get_project_config(&self, project_id: &str) -> Result<ProjectConfig, GatewayError>;
}

/// Project store client talking to an OpenSPG service over HTTP.
pub struct SpgProjectStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ProjectRecord {
    id: Value,
    name: String,
    /// Per-project configuration, serialized as a JSON string by the
    /// backend.
    #[serde(default)]
    config: Option<String>,
}

impl SpgProjectStore {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        SpgProjectStore {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_record(&self, project_id: &str) -> Result<ProjectRecord, GatewayError> {
        let url = format!(
            "{}/public/v1/project/get?project_id={}",
            self.base_url, project_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Backend(format!("project store unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(GatewayError::Backend(format!(
                "project store returned {} for project {}",
                resp.status(),
                project_id
            )));
        }
        resp.json::<ProjectRecord>()
            .await
            .map_err(|e| GatewayError::Backend(format!("malformed project record: {e}")))
    }
}

#[async_trait]
impl ProjectStore for SpgProjectStore {
    async fn get_projects(&self) -> Result<Vec<ProjectRef>, GatewayError> {
        let url = format!("{}/public/v1/project/list", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Backend(format!("project store unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(GatewayError::Backend(format!(
                "project store returned {}",
                resp.status()
            )));
        }
        let records = resp
            .json::<Vec<ProjectRecord>>()
            .await
            .map_err(|e| GatewayError::Backend(format!("malformed project list: {e}")))?;
        Ok(records
            .into_iter()
            .map(|r| ProjectRef {
                id: value_to_id(&r.id),
                name: r.name,
            })
            .collect())
    }

    async fn get_project_config(&self, project_id: &str) -> Result<ProjectConfig, GatewayError> {
        let record = self.fetch_record(project_id).await?;
        let raw = record.config.unwrap_or_default();
        let mut config: Value = if raw.is_empty() {
            json!({})
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| GatewayError::Backend(format!("project config is not JSON: {e}")))?
        };
        normalize_config(&mut config, project_id, &self.base_url);
        Ok(ProjectConfig::new(config))
    }
}

/// Ids arrive as numbers from some backend versions and as strings from
/// others.
fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fill in the sections older backends omit: a `project` block naming the
/// owning project, and the `vectorizer` → `vectorize_model` alias.
fn normalize_config(config: &mut Value, project_id: &str, host_addr: &str) {
    let Some(map) = config.as_object_mut() else {
        return;
    };
    if !map.contains_key("project") {
        map.insert(
            "project".to_string(),
            json!({"id": project_id, "host_addr": host_addr}),
        );
    }
    if !map.contains_key("vectorize_model") {
        if let Some(vectorizer) = map.remove("vectorizer") {
            map.insert("vectorize_model".to_string(), vectorizer);
        }
    }
}

// ============= Solver execution =============

/// Drives one solver execution on the remote reasoner and feeds its report
/// stream into the event sink.
///
/// The reasoner answers either with a newline-delimited event stream
/// (`{"event":"changed","data":{"content":...}}` report lines closed by a
/// `{"event":"done","data":{"answer":...}}` line) or, for non-streaming
/// client configurations, with a single `{"answer":...}` JSON body. Both
/// shapes end up as the same suffix-delta stream for the framer.
pub struct RemoteSolverPipeline {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
}

impl RemoteSolverPipeline {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        RemoteSolverPipeline {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
        }
    }

    fn solve_body(&self, request: &SolverRequest) -> Value {
        json!({
            "project_id": self.project_id,
            "query": request.query,
            "history": request.history,
            "stream": true,
            "temperature": request.options.temperature,
            "top_p": request.options.top_p,
            "max_tokens": request.options.max_tokens,
            "repetition_penalty": request.options.repetition_penalty,
        })
    }
}

#[async_trait]
impl SolverPipeline for RemoteSolverPipeline {
    async fn run(
        &self,
        request: &SolverRequest,
        sink: &mut EventSink,
    ) -> Result<Option<String>, PipelineError> {
        let url = format!("{}/public/v1/reasoner/solve", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&self.solve_body(request))
            .send()
            .await
            .map_err(|e| PipelineError::Backend(format!("reasoner unreachable: {e}")))?;

        if !resp.status().is_success() {
            return Err(PipelineError::Backend(format!(
                "reasoner returned {}",
                resp.status()
            )));
        }

        let streaming = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/x-ndjson") || v.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !streaming {
            let body = resp
                .json::<Value>()
                .await
                .map_err(|e| PipelineError::Backend(format!("malformed reasoner answer: {e}")))?;
            return Ok(extract_answer(&body));
        }

        let mut answer = None;
        let mut lines = LineBuffer::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| PipelineError::Backend(format!("reasoner stream failed: {e}")))?;
            lines.push_chunk(&chunk);
            while let Some(line) = lines.next_line() {
                if let Some(final_answer) = handle_report_line(&line, sink).await? {
                    answer = Some(final_answer);
                }
            }
        }
        if let Some(line) = lines.take_remaining() {
            if let Some(final_answer) = handle_report_line(&line, sink).await? {
                answer = Some(final_answer);
            }
        }
        Ok(answer)
    }

    async fn release(&self, execution_id: &str) {
        // Dropping the response stream closed the reasoner connection;
        // nothing else is held per execution.
        debug!(
            "released reasoner execution {} for project {}",
            execution_id, self.project_id
        );
    }
}

/// Dispatch one report line. Returns the terminal answer when the line
/// carries one.
async fn handle_report_line(
    line: &str,
    sink: &mut EventSink,
) -> Result<Option<String>, PipelineError> {
    let event: Value = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            warn!("skipping malformed report line: {}", e);
            return Ok(None);
        }
    };
    let kind = event
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match kind.as_str() {
        "changed" => {
            if let Some(content) = event
                .pointer("/data/content")
                .and_then(Value::as_str)
                .map(str::to_string)
            {
                sink.snapshot(&content).await?;
            }
            Ok(None)
        }
        "done" => Ok(event
            .pointer("/data/answer")
            .and_then(Value::as_str)
            .map(str::to_string)),
        "tool" => {
            sink.tool(event).await?;
            Ok(None)
        }
        "error" => Err(PipelineError::Backend(
            event
                .pointer("/data/message")
                .and_then(Value::as_str)
                .unwrap_or("reasoner reported an error")
                .to_string(),
        )),
        _ => {
            // unknown report kinds travel as opaque tool events
            sink.tool(event).await?;
            Ok(None)
        }
    }
}

fn extract_answer(body: &Value) -> Option<String> {
    body.get("answer")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Reassembles newline-delimited records from partial network chunks.
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn new() -> Self {
        LineBuffer {
            pending: String::new(),
        }
    }

    fn push_chunk(&mut self, chunk: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.find('\n')?;
        let line: String = self.pending.drain(..=pos).collect();
        let line = line.trim().to_string();
        if line.is_empty() {
            self.next_line()
        } else {
            Some(line)
        }
    }

    fn take_remaining(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}
