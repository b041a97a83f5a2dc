use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway runtime settings, assembled by the CLI in `main.rs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Host address to bind the gateway server
    pub host: String,
    /// Port number to bind the gateway server
    pub port: u16,
    /// Base path all API routes are mounted under (the original server
    /// calls this the servlet prefix)
    pub base_path: String,
    /// Address of the OpenSPG service backing this gateway
    pub backend_url: String,
    /// Upper bound on one solver execution, in seconds
    pub request_timeout_secs: u64,
    /// Upper bound on silence between two solver events, in seconds
    pub idle_timeout_secs: u64,
    /// Capacity of the per-request event channel; a full channel suspends
    /// the producer until the transport drains
    pub event_buffer_size: usize,
    pub log_dir: Option<String>,
    pub log_level: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 8888,
            base_path: "/api".to_string(),
            backend_url: "http://127.0.0.1:8887".to_string(),
            request_timeout_secs: 600,
            idle_timeout_secs: 120,
            event_buffer_size: 32,
            log_dir: None,
            log_level: None,
        }
    }
}

/// Client type of a streaming LLM section inside a solver pipeline.
pub const CLIENT_TYPE_STREAM_OPENAI: &str = "stream_openai_llm";
/// Client type of a non-streaming LLM section.
pub const CLIENT_TYPE_OPENAI: &str = "openai_llm";

/// A project's backend configuration as served by the config store.
///
/// The schema is owned by the backend; this wrapper only exposes the
/// sections the gateway inspects and never mutates the underlying value.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    raw: Value,
}

impl ProjectConfig {
    pub fn new(raw: Value) -> Self {
        ProjectConfig { raw }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn solver_pipeline(&self) -> Option<&Value> {
        self.raw.get("solver_pipeline")
    }

    /// LLM client section of the solver pipeline, if any.
    pub fn llm_client(&self) -> Option<&Value> {
        self.solver_pipeline()?.get("llm")
    }

    pub fn llm_client_type(&self) -> Option<&str> {
        self.llm_client()?.get("type")?.as_str()
    }
}
