use anyhow::Result;
use clap::Parser;

use ipsniff_lib::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    ipsniff_lib::run(Cli::parse()).await
}
