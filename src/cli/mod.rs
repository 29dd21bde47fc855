use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use stucco_driver::{ServerConfig, StdioMux};
use tracing::debug;

use crate::logger::init_tracing;

pub mod http;
pub mod serve;

use http::HttpArgs;
use serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(
    name = "stucco-rhai",
    about = "Rhai handlers for the stucco GraphQL engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run as an engine subprocess (the default)
    Plugin(ServeArgs),

    /// Run a standalone gRPC driver, optionally with mutual TLS
    Serve(ServeArgs),

    /// Run the HTTP transport
    Http(HttpArgs),
}

impl Commands {
    fn common(&self) -> &CommonArgs {
        match self {
            Commands::Plugin(args) | Commands::Serve(args) => &args.common,
            Commands::Http(args) => &args.common,
        }
    }
}

pub fn default_command() -> Commands {
    Commands::Plugin(ServeArgs::default())
}

/// Flags shared by every command. They override `STUCCO_*` variables.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Root directory handler references are resolved against
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Log filter (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write daily rolling logs into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Report per-call timings on stderr
    #[arg(long)]
    pub profile: bool,

    /// Environment file loaded before configuration is read
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

impl CommonArgs {
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(cwd) = &self.cwd {
            config.cwd = cwd.clone();
        }
        config.profile |= self.profile;
    }
}

/// Loads `path`, or a `.env` in the working directory when there is one.
pub fn load_env(path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("cannot load {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }
    Ok(())
}

pub async fn execute(command: Commands) -> anyhow::Result<()> {
    let common = command.common().clone();
    load_env(common.env_file.as_deref())?;

    let stdio = StdioMux::new();
    let _guard = init_tracing(
        if common.log_level.is_empty() { "info" } else { &common.log_level },
        common.log_dir.as_deref(),
        stdio.stderr(),
    )?;

    let mut config = ServerConfig::from_env()?;
    common.apply(&mut config);
    debug!(cwd = %config.cwd.display(), profile = config.profile, auth = config.auth.is_enabled(), "configuration loaded");

    match command {
        Commands::Plugin(args) => {
            config.plugin = true;
            serve::execute(args, config, stdio).await
        }
        Commands::Serve(args) => {
            config.plugin = false;
            serve::execute(args, config, stdio).await
        }
        Commands::Http(args) => http::execute(args, config, stdio).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_defaults_to_plugin() {
        let cli = Cli::try_parse_from(["stucco-rhai"]).unwrap();
        assert!(cli.command.is_none());
        assert!(matches!(default_command(), Commands::Plugin(_)));
    }

    #[test]
    fn flags_override_configuration() {
        let cli = Cli::try_parse_from([
            "stucco-rhai",
            "serve",
            "--cwd",
            "/srv/handlers",
            "--profile",
            "--port",
            "50051",
        ])
        .unwrap();
        let Some(Commands::Serve(args)) = cli.command else {
            panic!("expected serve");
        };

        let mut config = ServerConfig::default();
        args.common.apply(&mut config);
        args.apply(&mut config);
        assert_eq!(config.cwd, PathBuf::from("/srv/handlers"));
        assert!(config.profile);
        assert_eq!(config.port, 50051);
        assert_eq!(args.common.log_level, "info");
    }

    #[test]
    fn http_takes_a_listen_address() {
        let cli = Cli::try_parse_from(["stucco-rhai", "http", "--host", "0.0.0.0", "--port", "8080"]).unwrap();
        let Some(Commands::Http(args)) = cli.command else {
            panic!("expected http");
        };
        let mut config = ServerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");

        let cli = Cli::try_parse_from(["stucco-rhai", "http"]).unwrap();
        let Some(Commands::Http(args)) = cli.command else {
            panic!("expected http");
        };
        let mut config = ServerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.port, http::DEFAULT_PORT);
    }

    #[test]
    fn env_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("test.env");
        std::fs::write(&file, "STUCCO_RHAI_CLI_TEST=loaded\n").unwrap();

        load_env(Some(&file)).unwrap();
        assert_eq!(std::env::var("STUCCO_RHAI_CLI_TEST").unwrap(), "loaded");
        assert!(load_env(Some(&dir.path().join("missing.env"))).is_err());
    }
}
