use clap::Args;
use std::sync::Arc;
use stucco_driver::{PluginServer, ServerConfig, StdioMux, env::ProcessEnv, pipeline::Pipeline};
use tokio::signal;
use tracing::info;

use super::CommonArgs;

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Address to bind (plugin mode always binds loopback)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind, 0 for an ephemeral one
    #[arg(long)]
    pub port: Option<u16>,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

pub async fn execute(args: ServeArgs, mut config: ServerConfig, stdio: StdioMux) -> anyhow::Result<()> {
    args.apply(&mut config);
    if config.plugin {
        config.host = stucco_driver::config::DEFAULT_HOST.to_string();
    }

    let pipeline = Pipeline::rhai(config.cwd.clone(), Arc::new(ProcessEnv), &stdio);
    let server = PluginServer::new(config, pipeline, stdio)?;
    let handle = server.bind().await?.serve().await?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("interrupted, draining in-flight calls");
            handle.shutdown();
        }
        _ = handle.stopped() => {}
    }
    handle.wait().await;
    info!("driver stopped");
    Ok(())
}
