// porter/src/cli/serve.rs
use std::sync::Arc;

use clap::Args;
use porter_common::error::Result;
use porter_common::Config;
use tokio::io::BufReader;
use tracing::info;

use crate::server::{self, Services};

#[derive(Args, Debug)]
pub struct Serve;

impl Serve {
    pub async fn run(&self, config: Config) -> Result<()> {
        let config = Arc::new(config);
        let services = Services::defaults(config.clone())?;
        info!("Serving on stdio, root {}", config.porter_root().display());
        server::serve(
            config,
            services,
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await
    }
}
