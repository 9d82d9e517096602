mod app;
mod bus;
mod cli;
mod config;
mod error;
mod http;
mod key;
mod logging;
mod paths;
mod record;
mod store;
mod sync;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    app::run(cli)
}
