use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use sessionpick::config::Config;
use sessionpick::engine::SessionEngine;
use sessionpick::model::ServiceSpec;
use sessionpick::transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    sessionpick::observability::init(config.metrics_port)?;

    let Some(service_file) = config.service_file.as_ref() else {
        return Err("SESSIONPICK_SERVICE_FILE is not set".into());
    };
    let service: ServiceSpec = serde_json::from_str(&std::fs::read_to_string(service_file)?)?;

    let method = reqwest::Method::from_bytes(config.fetch_method.as_bytes())?;
    let transport = Arc::new(HttpTransport::new(config.endpoint.clone(), method));
    let engine = SessionEngine::from_config(&config, transport)?;

    info!("sessionpick starting");
    info!("  endpoint: {} {}", config.fetch_method, config.endpoint);
    info!("  timezone: {}", engine.calendar().timezone());
    info!("  filters: {}", config.filters.join(", "));
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    engine.set_service(service).await;
    let now = Utc::now();
    engine.request_month(now, now).await?;

    for stage in engine.pipeline().stage_ids() {
        let selected = engine.selections().await.get(stage).map(String::from);
        info!("  {stage}: {}", selected.as_deref().unwrap_or("-"));
    }

    let buckets = engine.filtered_buckets().await?;
    if buckets.is_empty() {
        println!("no sessions available this month");
    }
    for (day, sessions) in buckets.iter() {
        println!("{day}  {} session(s)", sessions.len());
    }
    Ok(())
}
