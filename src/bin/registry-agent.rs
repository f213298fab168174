use futures::future::join_all;
use opizontas_registry::config::Config;
use opizontas_registry::init_tracing;
use opizontas_registry::server::shutdown_signal;
use opizontas_registry::services::client::{AgentConfig, ClientAgent, InstanceDescriptor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::load()?;
    if config.agent.instances.is_empty() {
        return Err("no [[agent.instances]] configured".into());
    }

    let agent_config = AgentConfig::from(&config.agent);
    let mut agents = Vec::with_capacity(config.agent.instances.len());
    for settings in &config.agent.instances {
        // 与服务自身的 location 标识保持一致：应用名:端口
        let instance = InstanceDescriptor::from(settings).with_metadata(
            "location",
            format!("{}:{}", settings.service_name, settings.port),
        );
        let agent = ClientAgent::start(agent_config.clone(), instance).await?;
        tracing::info!(
            service_name = %agent.service_name(),
            instance_id = %agent.instance_id(),
            "Agent started"
        );
        agents.push(agent);
    }

    shutdown_signal().await;

    let results = join_all(agents.into_iter().map(ClientAgent::shutdown)).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        tracing::warn!(failed, "Some instances were not deregistered");
    }
    Ok(())
}
