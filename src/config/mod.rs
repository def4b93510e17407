use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StaticFilesConfig {
    pub dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: String,
    pub server: ServerConfig,
    pub static_files: StaticFilesConfig,
}

/// Command line flags. Anything left unset falls through to the
/// config file / environment / defaults.
#[derive(Parser, Debug, Default)]
#[command(name = "relay-server", about = "WebSocket broadcast relay")]
pub struct Cli {
    /// Port to serve on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory of client files
    #[arg(short, long)]
    pub directory: Option<String>,

    /// Address to bind to
    #[arg(long)]
    pub host: Option<String>,
}

impl Settings {
    pub fn new(cli: &Cli) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default values
            .set_default("environment", "development")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("static_files.dir", "web/")?
            // Add in settings from the config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in settings from environment variables (with prefix "APP_")
            // E.g., `APP_SERVER__PORT=5001` would set `Settings.server.port`
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true),
            )
            // Command line flags win over everything else
            .set_override_option("server.port", cli.port.map(|p| p as i64))?
            .set_override_option("server.host", cli.host.clone())?
            .set_override_option("static_files.dir", cli.directory.clone())?
            .build()?;

        s.try_deserialize()
    }

    #[cfg(test)]
    pub fn new_for_test() -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("environment", "test")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8000)?
            .set_default("server.workers", 1)?
            .set_default("static_files.dir", "web/")?
            .build()?
            .try_deserialize()
    }
}
