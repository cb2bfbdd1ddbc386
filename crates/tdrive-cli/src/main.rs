mod bootstrap_helpers;
mod cli_args;
mod ingest_runtime;
mod inspect_commands;

use anyhow::Result;
use clap::Parser;
use serde_json::Value;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;
use crate::ingest_runtime::run_ingest;
use crate::inspect_commands::{catalog_inspection_json, channel_id_inspection_json};

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    if let Some(channel_id) = cli.channel_id_inspect {
        return print_json(&channel_id_inspection_json(channel_id)?);
    }
    if cli.catalog_inspect {
        return print_json(&catalog_inspection_json(&cli.catalog_db).await?);
    }

    let report = run_ingest(&cli).await?;
    print_json(&serde_json::to_value(&report)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
