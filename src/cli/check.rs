use std::path::PathBuf;

use clap::Parser;
use labcore::LabDirectory;
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Report template authoring problems without computing anything")]
pub struct Check {
    /// Suppress all output except errors
    #[arg(long, short)]
    quiet: bool,
}

impl Check {
    #[instrument(level = "debug", skip(self))]
    pub fn run(self, root: PathBuf) -> anyhow::Result<()> {
        let directory = LabDirectory::open(root)?;
        let catalog = directory.catalog();
        let issues = catalog.check();

        if !self.quiet {
            if issues.is_empty() {
                println!(
                    "{}",
                    format!("Catalog is healthy ({} tests, 0 issues)", catalog.len()).success()
                );
            } else {
                for issue in &issues {
                    println!("{}", format!("✗ {issue}").warning());
                }
                println!(
                    "\n{}",
                    format!("Summary: {} issues found", issues.len()).warning()
                );
            }
        }

        if !issues.is_empty() {
            std::process::exit(2);
        }
        Ok(())
    }
}
