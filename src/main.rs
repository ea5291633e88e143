//! `lab` computes lab results from a template catalog and issues identifiers.

use clap::Parser;

mod cli;
use cli::Cli;

fn main() -> anyhow::Result<()> {
    Cli::parse().run()
}
