use std::net::SocketAddr;
use std::sync::Arc;

use crate::clients::completion::OpenAiCompatible;
use crate::core::error::GatewayError;
use crate::infra::config::Config;
use crate::orchestrator::Orchestrator;
use crate::tools::registry::build_providers;

/// Wire the orchestrator from configuration: completion client plus the
/// live provider set.
pub fn orchestrator_from(cfg: &Config) -> Result<Orchestrator, GatewayError> {
    let completion = Arc::new(OpenAiCompatible::from_config(&cfg.completion)?);
    let providers = build_providers(cfg)?;
    Ok(Orchestrator::new(
        cfg.orchestrator.clone(),
        cfg.completion.model.clone(),
        completion,
        providers,
    ))
}

pub async fn run_server() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    cfg.validate()?;
    tracing::info!(
        port = cfg.port,
        completion = %cfg.completion.base_url,
        model = %cfg.completion.model,
        max_tool_rounds = cfg.orchestrator.max_tool_rounds,
        "BOOT direct-mcp-gateway"
    );

    let app = crate::infra::http_app::build_app(Arc::new(orchestrator_from(&cfg)?));
    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
