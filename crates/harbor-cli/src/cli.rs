use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use harbor_secrets::BackendSelection;

#[derive(Parser)]
#[command(name = "harbor")]
#[command(about = "Harbor: inspect and manage configuration and secrets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true, env = "HARBOR_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,

    /// Environment layer to load (<env>.yaml)
    #[arg(short, long, global = true, env = "HARBOR_ENV", default_value = "development")]
    pub env: String,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and modify configuration
    Config(ConfigArgs),
    /// Read, write and rotate secrets
    Secrets(SecretsArgs),
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show sources, overrides and validation state
    Status,
    /// Read a value by dotted path (e.g. database.pool_size)
    Get(ConfigGetArgs),
    /// Set a value in local.yaml
    Set(ConfigSetArgs),
    /// Print the merged configuration
    Export(ConfigExportArgs),
    /// Validate the merged configuration
    Validate,
    /// Search keys and values
    Search(ConfigSearchArgs),
    /// Print schema defaults
    Defaults,
    /// Write app.yaml and <env>.yaml if they do not exist
    Init,
    /// Watch config files and report reloads until interrupted
    Watch,
}

#[derive(clap::Args)]
pub struct ConfigGetArgs {
    /// Dotted key path
    pub key: String,
    /// Value printed when the key is absent
    #[arg(long)]
    pub default: Option<String>,
}

#[derive(clap::Args)]
pub struct ConfigSetArgs {
    /// Dotted key path
    pub key: String,
    /// Value; numbers, booleans and null are coerced
    pub value: String,
}

#[derive(clap::Args)]
pub struct ConfigExportArgs {
    /// Include sensitive values instead of redacting them
    #[arg(long)]
    pub include_sensitive: bool,
    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ConfigSearchArgs {
    /// Case-insensitive text matched against paths and values
    pub query: String,
}

#[derive(clap::Args)]
pub struct SecretsArgs {
    #[command(subcommand)]
    pub command: SecretsCommands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum BackendArg {
    /// Vault first, then the local store
    #[default]
    Auto,
    Vault,
    Local,
}

impl From<BackendArg> for BackendSelection {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendSelection::Auto,
            BackendArg::Vault => BackendSelection::Vault,
            BackendArg::Local => BackendSelection::Local,
        }
    }
}

#[derive(Subcommand)]
pub enum SecretsCommands {
    /// Show backend availability, cache and rotation schedule
    Status,
    /// Resolve a secret through the fallback chain
    Get(SecretGetArgs),
    /// Store a secret
    Put(SecretPutArgs),
    /// Delete a secret
    Delete(SecretKeyArgs),
    /// List secret keys
    List(SecretListArgs),
    /// Rotate a secret now
    Rotate(SecretRotateArgs),
    /// Drop cached secret values
    ClearCache,
}

#[derive(clap::Args)]
pub struct SecretGetArgs {
    /// Secret key (e.g. database/password)
    pub key: String,
    /// Print the value instead of a masked form
    #[arg(long)]
    pub reveal: bool,
}

#[derive(clap::Args)]
pub struct SecretPutArgs {
    /// Secret key (e.g. database/password)
    pub key: String,
    /// Value (reads from stdin if omitted)
    pub value: Option<String>,
    #[arg(long, value_enum, default_value_t)]
    pub backend: BackendArg,
}

#[derive(clap::Args)]
pub struct SecretKeyArgs {
    pub key: String,
    #[arg(long, value_enum, default_value_t)]
    pub backend: BackendArg,
}

#[derive(clap::Args)]
pub struct SecretListArgs {
    #[arg(long, value_enum, default_value_t)]
    pub backend: BackendArg,
}

#[derive(clap::Args)]
pub struct SecretRotateArgs {
    pub key: String,
    /// Print the new value
    #[arg(long)]
    pub reveal: bool,
}
