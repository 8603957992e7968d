mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands, ConfigCommands};
use commands::RunContext;
use config::Settings;
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing(cli.verbose);

    // CLI settings are keyed by the same name as the OCI profile.
    let profile = &cli.profile;

    match &cli.command {
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => {
                let cfg = config::load_profile(profile)?;
                let settings = Settings::resolve(&cli, &cfg)?;
                println!("{}: {}", "Config file".cyan(), config::config_path()?.display());
                println!("{}: {}", "Profile".cyan(), profile);
                println!("{}: {}", "Threads".cyan(), settings.fetch.max_workers);
                println!("{}: {}", "Max attempts".cyan(), settings.fetch.retry.max_attempts);
                println!(
                    "{}: {}",
                    "Cache dir".cyan(),
                    settings
                        .cache_dir
                        .as_ref()
                        .map_or_else(|| "(not set)".to_string(), |d| d.display().to_string())
                );
                println!("{}: {}", "Output dir".cyan(), settings.output_dir.display());
                println!("{}: {:?}", "Format".cyan(), settings.format);
            }
            ConfigCommands::Set(set_args) => {
                let mut cfg = config::load_profile(profile)?;
                cfg.set(&set_args.key, &set_args.value)?;
                config::save_profile(profile, &cfg)?;
                output::print_success(&format!("Set {} = {}", set_args.key, set_args.value));
            }
        },
        Commands::Policies(args) => {
            let ctx = make_context(&cli)?;
            commands::policies::run(ctx, args).await?;
        }
        Commands::DynamicGroups(args) => {
            let ctx = make_context(&cli)?;
            commands::dynamic_groups::run(ctx, args).await?;
        }
        Commands::Analyze(args) => {
            let ctx = make_context(&cli)?;
            commands::analyze::run(ctx, args).await?;
        }
    }

    Ok(())
}

fn make_context(cli: &Cli) -> Result<RunContext> {
    let cfg = config::load_profile(&cli.profile)?;
    let settings = Settings::resolve(cli, &cfg)?;
    RunContext::new(cli, settings)
}
