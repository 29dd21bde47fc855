use std::sync::Arc;

use clap::Args;
use stucco_driver::{ServerConfig, StdioMux, env::ProcessEnv, http, pipeline::Pipeline};
use tokio::signal;
use tracing::info;

use super::CommonArgs;

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub host: Option<String>,

    /// Defaults to 8080 when neither this nor `STUCCO_PORT` is set
    #[arg(long)]
    pub port: Option<u16>,
}

pub const DEFAULT_PORT: u16 = 8080;

impl HttpArgs {
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        config.port = match self.port {
            Some(port) => port,
            None if config.port == 0 => DEFAULT_PORT,
            None => config.port,
        };
    }
}

pub async fn execute(args: HttpArgs, mut config: ServerConfig, stdio: StdioMux) -> anyhow::Result<()> {
    args.apply(&mut config);
    config.plugin = false;

    let pipeline = Pipeline::rhai(config.cwd.clone(), Arc::new(ProcessEnv), &stdio);
    http::serve(&config, pipeline, async {
        let _ = signal::ctrl_c().await;
        info!("interrupted, draining in-flight requests");
    })
    .await?;
    Ok(())
}
