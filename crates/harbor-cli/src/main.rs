mod cli;
mod commands;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands, ConfigCommands, SecretsCommands};
use output::print_error;

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    observability::init_tracing(cli.log_level());

    if let Err(e) = run(cli).await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.format.unwrap_or_default();

    match cli.command {
        Commands::Config(args) => {
            let open = || commands::config::open(&cli.config_dir, &cli.env);
            match args.command {
                ConfigCommands::Init => commands::config::init(&cli.config_dir, &cli.env)?,
                ConfigCommands::Status => commands::config::status(&open(), format)?,
                ConfigCommands::Get(get) => {
                    commands::config::get(&open(), &get.key, get.default.as_deref(), format)?
                }
                ConfigCommands::Set(set) => commands::config::set(&open(), &set.key, &set.value)?,
                ConfigCommands::Export(export) => commands::config::export(
                    &open(),
                    format,
                    export.include_sensitive,
                    export.output.as_deref(),
                )?,
                ConfigCommands::Validate => commands::config::validate(&open())?,
                ConfigCommands::Search(search) => {
                    commands::config::search(&open(), &search.query, format)?
                }
                ConfigCommands::Defaults => commands::config::defaults(&open(), format)?,
                ConfigCommands::Watch => commands::config::watch(open()).await?,
            }
        }
        Commands::Secrets(args) => {
            let manager = commands::secrets::open()?;
            match args.command {
                SecretsCommands::Status => commands::secrets::status(&manager, format).await?,
                SecretsCommands::Get(get) => {
                    commands::secrets::get(&manager, &get.key, get.reveal, format).await?
                }
                SecretsCommands::Put(put) => {
                    commands::secrets::put(&manager, &put.key, put.value.as_deref(), put.backend.into())
                        .await?
                }
                SecretsCommands::Delete(delete) => {
                    commands::secrets::delete(&manager, &delete.key, delete.backend.into()).await?
                }
                SecretsCommands::List(list) => {
                    commands::secrets::list(&manager, list.backend.into(), format).await?
                }
                SecretsCommands::Rotate(rotate) => {
                    commands::secrets::rotate(&manager, &rotate.key, rotate.reveal).await?
                }
                SecretsCommands::ClearCache => commands::secrets::clear_cache(&manager),
            }
        }
    }

    Ok(())
}
