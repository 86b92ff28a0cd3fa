// porter/src/cli/classify.rs
use std::path::PathBuf;

use clap::Args;
use porter_common::error::{PorterError, Result};
use porter_common::protocol::InstallerClassifyResult;
use porter_common::Config;
use porter_core::installer::{classify, InferSniffer};
use tracing::debug;

#[derive(Args, Debug)]
pub struct Classify {
    /// File to inspect
    pub path: PathBuf,

    /// Print the result as a JSON object
    #[arg(long)]
    pub json: bool,
}

impl Classify {
    pub fn run(&self, _config: &Config) -> Result<()> {
        let installer_type = classify(&self.path, &InferSniffer)?;
        debug!("{} classified as {}", self.path.display(), installer_type);
        if self.json {
            let line = serde_json::to_string(&InstallerClassifyResult { installer_type })
                .map_err(PorterError::from)?;
            println!("{line}");
        } else {
            println!("{installer_type}");
        }
        Ok(())
    }
}
