use std::sync::Arc;

use actix_web::http::header;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, error, get, post, web};
use serde_json::json;
use tracing::{debug, info};

use crate::backend::ProjectStore;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::invoker::{PipelineFactory, PipelineInvoker};
use crate::openai_api_types::{ChatCompletionRequest, ValidateConfigRequest};
use crate::registry::ModelRegistry;
use crate::solver::SolverOptions;
use crate::streaming::{FramerContext, collect_response, sse_stream};
use crate::validation::validate_project;

pub struct AppState {
    pub registry: ModelRegistry,
    pub store: Arc<dyn ProjectStore>,
    pub invoker: PipelineInvoker,
}

impl AppState {
    pub async fn new(
        config: &GatewayConfig,
        store: Arc<dyn ProjectStore>,
        factory: Arc<dyn PipelineFactory>,
    ) -> Self {
        let registry = ModelRegistry::new(store.clone()).await;
        let invoker = PipelineInvoker::new(factory, config);
        AppState {
            registry,
            store,
            invoker,
        }
    }
}

#[get("/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[get("/v1/models")]
pub async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.registry.list_models())
}

/// Validation failures are a normal result, not a transport error: the
/// endpoint answers 200 with the result body either way.
#[post("/validate_config")]
pub async fn validate_config(
    body: web::Json<ValidateConfigRequest>,
    state: web::Data<AppState>,
) -> HttpResponse {
    let result = validate_project(&state.registry, state.store.as_ref(), &body.project_name).await;
    HttpResponse::Ok().json(result)
}

#[post("/v1/chat/completions")]
pub async fn chat_completions(
    req: HttpRequest,
    body: web::Json<ChatCompletionRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    // Bearer credentials are accepted opaquely; the backend enforces its
    // own policy if it has one.
    let has_credentials = req.headers().contains_key(header::AUTHORIZATION);
    let request = body.into_inner();

    if request.messages.is_empty() {
        return Err(GatewayError::Request("no messages provided".to_string()));
    }
    let query = request
        .last_user_query()
        .ok_or_else(|| GatewayError::Request("last message must be from the user".to_string()))?
        .to_string();
    let project_name = request.project_name().unwrap_or("0").to_string();
    let project = state
        .registry
        .find_by_name(&project_name)
        .ok_or_else(|| GatewayError::UnknownModel(request.model.clone()))?;

    let preview: String = query.chars().take(100).collect();
    info!(
        "chat completion: project={} stream={} credentials={} query={}{}",
        project.name,
        request.is_stream(),
        has_credentials,
        preview,
        if query.chars().count() > 100 { "..." } else { "" }
    );

    let history = request.messages[..request.messages.len() - 1].to_vec();
    let options = SolverOptions {
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        repetition_penalty: request.repetition_penalty,
    };
    let solver_stream = state
        .invoker
        .invoke(&project, query.clone(), history, options)
        .await?;
    let ctx = FramerContext {
        model: request.model.clone(),
        project: project.name.clone(),
        prompt_chars: query.chars().count() as u32,
    };

    if request.is_stream() {
        // actix drops the body stream when the client disconnects, which
        // tears down the solver stream and cancels the producer
        Ok(HttpResponse::Ok()
            .insert_header((header::CONTENT_TYPE, "text/event-stream"))
            .streaming(sse_stream(solver_stream, ctx)))
    } else {
        let response = collect_response(solver_stream, &ctx).await?;
        Ok(HttpResponse::Ok().json(response))
    }
}

// Malformed request bodies get the same error shape as everything else.
fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    debug!("rejecting malformed request body: {}", err);
    let body = json!({
        "error": {
            "message": err.to_string(),
            "type": "bad_request",
            "code": "invalid_json",
        }
    });
    error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
}

pub async fn startup(config: GatewayConfig, state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(state);
    let base_path = config.base_path.trim_end_matches('/').to_string();

    info!(
        "starting gateway at {}:{} under {}",
        config.host, config.port, base_path
    );

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(health)
            .service(
                web::scope(&base_path)
                    .service(list_models)
                    .service(validate_config)
                    .service(chat_completions),
            )
    })
    .bind((config.host.clone(), config.port))?
    .run()
    .await
}
