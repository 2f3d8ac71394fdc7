mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use std::process::ExitCode;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;
    logging::init(&config.logging);

    let result = commands::run(&cli, &config).await?;
    output::render(&result.data, cli.pretty)?;

    if let Some(error) = result.failure {
        eprintln!("error: {error}");
        return Ok(ExitCode::from(error.exit_code()));
    }
    Ok(ExitCode::SUCCESS)
}
