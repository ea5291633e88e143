use std::path::Path;

use labcore::LabDirectory;
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, clap::Parser)]
pub struct Init {}

impl Init {
    #[instrument(skip(self))]
    pub fn run(self, root: &Path) -> anyhow::Result<()> {
        LabDirectory::init(root)?;

        println!(
            "{}",
            format!("Initialized lab workspace in {}", root.display()).success()
        );
        println!("  Created: .lab/config.toml");
        println!("  Created: .lab/catalog/lipid.yaml (example)");
        println!("  Created: .lab/counters/");
        Ok(())
    }
}
