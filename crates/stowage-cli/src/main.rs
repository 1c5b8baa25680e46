mod cli;
mod context;
mod transfers;

use clap::Parser;
use eyre::Result;
use std::process::ExitCode;

use crate::cli::{Cli, Commands};
use crate::context::AppContext;
use crate::transfers::{run_transfer, EXIT_CLIENT_FAILURE};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Bad configuration is the caller's to fix.
    let ctx = match AppContext::load(&cli) {
        Ok(ctx) => ctx,
        Err(err) => return Ok(usage_error(&err)),
    };

    match &cli.command {
        Commands::Transfer(args) => match ctx.with_transfer_overrides(args) {
            Ok(ctx) => run_transfer(ctx, args).await,
            Err(err) => Ok(usage_error(&err)),
        },
        Commands::Config => {
            print!("{}", ctx.config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

fn usage_error(err: &eyre::Report) -> ExitCode {
    eprintln!("error: {err:#}");
    ExitCode::from(EXIT_CLIENT_FAILURE)
}
