use anyhow::Context;

use labinv_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    labinv_observability::init();

    let config = AppConfig::from_env()?;
    let services = labinv_api::app::build_services(&config).await?;
    let app = labinv_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("serve http")?;
    Ok(())
}
