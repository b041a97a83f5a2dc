use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::Level;

use kag_gateway::backend::SpgProjectStore;
use kag_gateway::config::GatewayConfig;
use kag_gateway::invoker::DefaultPipelineFactory;
use kag_gateway::logging::{LoggingConfig, init_logging};
use kag_gateway::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "kag-gateway")]
#[command(about = "OpenAI-compatible chat gateway for OpenSPG knowledge-graph solver pipelines")]
struct CliArgs {
    /// Host address to bind the gateway server
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the gateway server
    #[arg(long, default_value_t = 8888)]
    port: u16,

    /// Base path all API routes are mounted under
    #[arg(long, default_value = "/api")]
    servlet: String,

    /// Address of the OpenSPG service backing this gateway
    #[arg(long, default_value = "http://127.0.0.1:8887")]
    openspg_service: String,

    /// Upper bound on one solver execution, in seconds
    #[arg(long, default_value_t = 600)]
    request_timeout_secs: u64,

    /// Upper bound on silence between two solver events, in seconds
    #[arg(long, default_value_t = 120)]
    idle_timeout_secs: u64,

    /// Capacity of the per-request solver event buffer
    #[arg(long, default_value_t = 32)]
    event_buffer_size: usize,

    /// Directory to store log files
    #[arg(long)]
    log_dir: Option<String>,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl CliArgs {
    fn into_config(self) -> GatewayConfig {
        GatewayConfig {
            host: self.host,
            port: self.port,
            base_path: self.servlet,
            backend_url: self.openspg_service,
            request_timeout_secs: self.request_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
            event_buffer_size: self.event_buffer_size,
            log_dir: self.log_dir,
            log_level: Some(self.log_level),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = CliArgs::parse().into_config();

    let level = config
        .log_level
        .as_deref()
        .and_then(|l| l.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let _log_guard = init_logging(LoggingConfig {
        level,
        log_dir: config.log_dir.clone(),
        ..LoggingConfig::default()
    });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    let store = Arc::new(SpgProjectStore::new(
        client.clone(),
        config.backend_url.clone(),
    ));
    let factory = Arc::new(DefaultPipelineFactory::new(
        store.clone(),
        client,
        config.backend_url.clone(),
    ));

    let state = AppState::new(&config, store, factory).await;
    server::startup(config, state).await?;
    Ok(())
}
