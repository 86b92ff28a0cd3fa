// porter/src/cli/version.rs
use clap::Args;
use porter_common::error::Result;

use crate::server::version_info;

#[derive(Args, Debug)]
pub struct Version;

impl Version {
    pub fn run(&self) -> Result<()> {
        println!("{}", version_info().version_string);
        Ok(())
    }
}
