use std::path::PathBuf;

use clap::Parser;
use labcore::{IdentifierKind, LabDirectory, Scope, domain::FormatPolicy};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Allocate sequential identifiers from the workspace counters")]
pub struct Allocate {
    /// The lab the identifiers belong to
    #[arg(long)]
    scope: Scope,

    /// Identifier kind (patient, sample, report, invoice, prescription)
    #[arg(long)]
    kind: IdentifierKind,

    /// Brand identifiers with this display name
    #[arg(long, value_name = "NAME")]
    premium: Option<String>,

    /// How many identifiers to allocate
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Issue provisional identifiers without touching the counters.
    ///
    /// Provisional identifiers are not guaranteed to be unique.
    #[arg(long)]
    provisional: bool,
}

impl Allocate {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let directory = LabDirectory::open(root)?;
        let allocator = directory.allocator();
        let policy = self
            .premium
            .map_or(FormatPolicy::Generic, |display_name| FormatPolicy::Premium {
                display_name,
            });

        if self.provisional {
            eprintln!(
                "{}",
                "⚠️  Provisional identifiers are not guaranteed to be unique".warning()
            );
        }

        for _ in 0..self.count {
            if self.provisional {
                println!(
                    "{}",
                    allocator.allocate_provisional(&self.scope, self.kind, &policy)
                );
            } else {
                println!("{}", allocator.allocate(&self.scope, self.kind, &policy)?);
            }
        }
        Ok(())
    }
}
