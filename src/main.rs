mod cli;
mod config;
mod discovery;
mod engine;
mod error;
mod games;
mod global_config;
mod local;
mod logging;
mod repo;
mod runconfig;
mod stack;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
