use serde_json::Value;
use tracing::debug;

use crate::backend::ProjectStore;
use crate::config::{CLIENT_TYPE_OPENAI, CLIENT_TYPE_STREAM_OPENAI, ProjectConfig};
use crate::openai_api_types::ValidationResult;
use crate::registry::ModelRegistry;

/// Checks a project's backend configuration before it is used to build a
/// pipeline. Every problem is collected into the result body; validation
/// itself never fails and never mutates the configuration.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &ProjectConfig) -> ValidationResult {
        let mut errors = Vec::new();

        let Some(pipeline) = config.solver_pipeline() else {
            errors.push("solver_pipeline: required section is missing".to_string());
            return ValidationResult::failed(errors);
        };

        if !pipeline.is_object() {
            errors.push("solver_pipeline: must be an object".to_string());
            return ValidationResult::failed(errors);
        }

        match config.llm_client() {
            Some(llm) => Self::validate_llm_client(llm, &mut errors),
            None => errors.push("solver_pipeline.llm: required section is missing".to_string()),
        }

        if errors.is_empty() {
            ValidationResult::ok()
        } else {
            ValidationResult::failed(errors)
        }
    }

    /// Mandatory fields depend on the declared client type: hosted OpenAI
    /// shapes need credentials, local engine shapes only an endpoint.
    fn validate_llm_client(llm: &Value, errors: &mut Vec<String>) {
        let Some(client_type) = llm.get("type").and_then(Value::as_str) else {
            errors.push("solver_pipeline.llm.type: required field is missing".to_string());
            return;
        };

        let required: &[&str] = match client_type {
            CLIENT_TYPE_STREAM_OPENAI | CLIENT_TYPE_OPENAI => &["api_key", "base_url", "model"],
            "vllm" | "ollama" => &["base_url", "model"],
            other => {
                errors.push(format!(
                    "solver_pipeline.llm.type: unsupported client type '{other}'"
                ));
                return;
            }
        };

        for field in required {
            match llm.get(field).and_then(Value::as_str) {
                Some(value) if !value.is_empty() => {}
                Some(_) => {
                    errors.push(format!("solver_pipeline.llm.{field}: must not be empty"));
                }
                None => {
                    errors.push(format!(
                        "solver_pipeline.llm.{field}: required field is missing"
                    ));
                }
            }
        }

        if let Some(temperature) = llm.get("temperature") {
            if !temperature.is_number() {
                errors.push("solver_pipeline.llm.temperature: must be a number".to_string());
            }
        }
    }
}

/// Full validation flow for the `/validate_config` endpoint: resolve the
/// project name, fetch its configuration, check it. An unresolvable project
/// or an unreachable store is reported through the result body like any
/// other validation failure, never through the transport error channel.
pub async fn validate_project(
    registry: &ModelRegistry,
    store: &dyn ProjectStore,
    project_name: &str,
) -> ValidationResult {
    let Some(project) = registry.find_by_name(project_name) else {
        return ValidationResult::failed(vec![format!(
            "project '{project_name}' is not configured on the backend"
        )]);
    };

    let config = match store.get_project_config(&project.id).await {
        Ok(config) => config,
        Err(e) => {
            debug!("config fetch for project {} failed: {}", project_name, e);
            return ValidationResult::failed(vec![format!(
                "configuration for project '{project_name}' could not be loaded: {e}"
            )]);
        }
    };

    ConfigValidator::validate(&config)
}
