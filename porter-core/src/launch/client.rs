// Launch strategies handled by the client itself.

use async_trait::async_trait;
use porter_common::error::{PorterError, Result};
use porter_common::model::LaunchStrategy;
use porter_common::protocol::{
    ClientRequest, EmptyResult, HtmlLaunchParams, ShellLaunchParams, UrlLaunchParams,
};
use tracing::debug;

use super::{Launcher, LauncherParams};
use crate::rpc;

/// Asks the client to host an HTML game.
pub struct HtmlLauncher;

#[async_trait]
impl Launcher for HtmlLauncher {
    fn strategy(&self) -> LaunchStrategy {
        LaunchStrategy::Html
    }

    async fn launch(&self, p: LauncherParams) -> Result<()> {
        let root = &p.params.install_folder;
        let index_path = p
            .full_target_path
            .strip_prefix(root)
            .map(|rel| rel.to_path_buf())
            .map_err(|_| {
                PorterError::Validation(format!(
                    "HTML entry point {} is outside of {}",
                    p.full_target_path.display(),
                    root.display()
                ))
            })?;
        debug!("HTML launch of {} in {}", index_path.display(), root.display());
        rpc::call::<EmptyResult>(
            p.conn.as_ref(),
            ClientRequest::HtmlLaunch(HtmlLaunchParams {
                root_folder: root.clone(),
                index_path,
                args: p.params.args.clone(),
                env: p.params.env.clone(),
            }),
            &p.token,
        )
        .await?;
        Ok(())
    }
}

/// Asks the client to open a web address.
pub struct UrlLauncher;

#[async_trait]
impl Launcher for UrlLauncher {
    fn strategy(&self) -> LaunchStrategy {
        LaunchStrategy::Url
    }

    async fn launch(&self, p: LauncherParams) -> Result<()> {
        let url = p
            .params
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| PorterError::Validation("URL launch needs a url".into()))?;
        rpc::call::<EmptyResult>(
            p.conn.as_ref(),
            ClientRequest::UrlLaunch(UrlLaunchParams { url }),
            &p.token,
        )
        .await?;
        Ok(())
    }
}

/// Asks the client to reveal the target in the system file browser.
pub struct ShellLauncher;

#[async_trait]
impl Launcher for ShellLauncher {
    fn strategy(&self) -> LaunchStrategy {
        LaunchStrategy::Shell
    }

    async fn launch(&self, p: LauncherParams) -> Result<()> {
        rpc::call::<EmptyResult>(
            p.conn.as_ref(),
            ClientRequest::ShellLaunch(ShellLaunchParams {
                item_path: p.full_target_path.clone(),
            }),
            &p.token,
        )
        .await?;
        Ok(())
    }
}
