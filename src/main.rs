use qqbind::adapters::{self, console};
use qqbind::{Services, info, load_config, plugins};
use std::sync::Arc;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(CONFIG_PATH).await?;
    plugins::log_enabled(&config);

    let config = Arc::new(config);
    let (outbox, inbox) = adapters::outbox();
    let services = Arc::new(Services::from_config(&config, outbox.clone()).await?);

    tokio::select! {
        _ = console::entry(config.clone(), services.clone(), outbox, inbox) => {}
        _ = tokio::signal::ctrl_c() => {
            info!(target: "System", "收到退出信号");
        }
    }

    services.shutdown().await;
    info!(target: "System", "已退出");
    Ok(())
}
