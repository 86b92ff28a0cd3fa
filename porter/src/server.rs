// porter/src/server.rs
//! Line-delimited JSON-RPC loop over a pair of byte streams.

use std::sync::Arc;

use porter_common::error::{PorterError, Result};
use porter_common::protocol::{
    AgentRequest, CleanDownloadsApplyResult, CleanDownloadsSearchResult, EmptyResult, Incoming,
    InstallerClassifyResult, OperationCancelResult, RequestEnvelope, ResponseEnvelope,
    RpcError, VersionGetResult,
};
use porter_common::Config;
use porter_core::installer::{classify, InferSniffer, Sniffer, ZipTarExtractor};
use porter_core::operation::clean;
use porter_core::{
    platform, LauncherParams, LauncherRegistry, ManagerRegistry, OperationDeps, OperationManager,
    OperationOutcome, Peer,
};
use porter_net::HttpFetcher;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub fn version_info() -> VersionGetResult {
    let version = env!("CARGO_PKG_VERSION").to_string();
    VersionGetResult {
        version_string: format!(
            "porter v{} ({}-{})",
            version,
            std::env::consts::OS,
            std::env::consts::ARCH
        ),
        version,
    }
}

/// Collaborators wired into the agent at startup.
pub struct Services {
    pub operations: OperationDeps,
    pub launchers: LauncherRegistry,
}

impl Services {
    pub fn defaults(config: Arc<Config>) -> Result<Self> {
        let sniffer: Arc<dyn Sniffer> = Arc::new(InferSniffer);
        let launchers = LauncherRegistry::with_defaults(&config, platform::current());
        Ok(Self {
            operations: OperationDeps {
                fetcher: Arc::new(HttpFetcher::new()?),
                managers: Arc::new(ManagerRegistry::with_defaults(Arc::new(ZipTarExtractor))),
                sniffer,
                config,
            },
            launchers,
        })
    }
}

/// Request dispatcher shared by every in-flight request.
struct Agent {
    config: Arc<Config>,
    operations: OperationManager,
    launchers: LauncherRegistry,
    sniffer: Arc<dyn Sniffer>,
    peer: Arc<Peer>,
    shutdown: CancellationToken,
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| PorterError::Json(Arc::new(e)))
}

impl Agent {
    #[instrument(skip_all, fields(id = %envelope.id, method = %envelope.method))]
    async fn dispatch(&self, envelope: RequestEnvelope) {
        let RequestEnvelope { id, method, params } = envelope;
        let response = match AgentRequest::parse(&method, params) {
            Err(rpc_error) => {
                warn!("Rejected request: {}", rpc_error.message);
                ResponseEnvelope::failure(id, rpc_error)
            }
            Ok(request) => match self.handle(request).await {
                Ok(result) => ResponseEnvelope::success(id, result),
                Err(e) => {
                    debug!("Request failed: {}", e.causal_chain());
                    ResponseEnvelope::failure(id, RpcError::from_error(&e))
                }
            },
        };
        self.peer.respond(&response);
    }

    async fn handle(&self, request: AgentRequest) -> Result<Value> {
        match request {
            AgentRequest::VersionGet => to_value(version_info()),
            AgentRequest::OperationStart(params) => {
                match self.operations.start(params, self.peer.clone()).await? {
                    OperationOutcome::Completed => to_value(EmptyResult {}),
                    OperationOutcome::Cancelled => Err(PorterError::Cancelled),
                    OperationOutcome::Failed(e) => Err(e),
                }
            }
            AgentRequest::OperationCancel(params) => to_value(OperationCancelResult {
                did_cancel: self.operations.cancel(&params.id),
            }),
            AgentRequest::Launch(params) => {
                let launch = LauncherParams::new(
                    params,
                    &self.config,
                    self.peer.clone(),
                    self.shutdown.child_token(),
                );
                self.launchers.launch(launch).await?;
                to_value(EmptyResult {})
            }
            AgentRequest::InstallerClassify(params) => {
                let installer_type = classify(&params.path, self.sniffer.as_ref())?;
                to_value(InstallerClassifyResult { installer_type })
            }
            AgentRequest::CleanDownloadsSearch(mut params) => {
                params.whitelist.extend(self.operations.staging_folders());
                let entries = clean::search(&params.roots, &params.whitelist)?;
                to_value(CleanDownloadsSearchResult { entries })
            }
            AgentRequest::CleanDownloadsApply(params) => to_value(CleanDownloadsApplyResult {
                removed: clean::apply(&params.entries),
            }),
        }
    }

    fn shut_down(&self) {
        self.shutdown.cancel();
        let cancelled = self.operations.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} running operation(s)", cancelled);
        }
        self.peer.close();
    }
}

/// Serves requests read from `input` until it reaches end of file, writing
/// responses, notifications and agent-side requests to `output`.
pub async fn serve<R, W>(
    config: Arc<Config>,
    services: Services,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let written = async {
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await
            };
            if let Err(e) = written.await {
                error!("Failed to write to client: {}", e);
                break;
            }
        }
    });

    let agent = Arc::new(Agent {
        sniffer: services.operations.sniffer.clone(),
        operations: OperationManager::new(services.operations),
        launchers: services.launchers,
        peer: Arc::new(Peer::new(tx)),
        shutdown: CancellationToken::new(),
        config,
    });
    info!("Agent ready, {}", version_info().version_string);

    let mut tasks = JoinSet::new();
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from client: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Incoming::parse(&line) {
            Ok(Incoming::Request(envelope)) => {
                let agent = agent.clone();
                tasks.spawn(async move { agent.dispatch(envelope).await });
            }
            Ok(Incoming::Response(response)) => {
                agent.peer.resolve(response);
            }
            Err(e) => {
                warn!("Ignoring malformed frame: {}", e);
                debug!("Frame was: {}", line);
            }
        }
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Request task panicked: {}", e);
            }
        }
    }

    debug!("Input closed, shutting down");
    agent.shut_down();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Request task panicked: {}", e);
        }
    }
    drop(agent);
    if let Err(e) = writer.await {
        error!("Writer task failed: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;
    use tokio::io::{AsyncReadExt, BufReader};

    use super::*;

    fn test_config(root: &Path) -> Arc<Config> {
        Arc::new(Config {
            porter_root: root.to_path_buf(),
            ..Config::default()
        })
    }

    async fn exchange(root: &Path, frames: &[Value]) -> Vec<Value> {
        let config = test_config(root);
        let services = Services::defaults(config.clone()).unwrap();
        let (client, server) = tokio::io::duplex(1 << 16);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        for frame in frames {
            client_write
                .write_all(format!("{frame}\n").as_bytes())
                .await
                .unwrap();
        }
        client_write.write_all(b"not json at all\n").await.unwrap();
        client_write.shutdown().await.unwrap();

        serve(config, services, BufReader::new(server_read), server_write)
            .await
            .unwrap();

        let mut raw = String::new();
        client_read.read_to_string(&mut raw).await.unwrap();
        raw.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn response_for<'a>(frames: &'a [Value], id: i64) -> &'a Value {
        frames
            .iter()
            .find(|f| f["id"] == json!(id) && f.get("method").is_none())
            .unwrap()
    }

    #[tokio::test]
    async fn answers_version_and_unknown_methods() {
        let dir = tempfile::tempdir().unwrap();
        let frames = exchange(
            dir.path(),
            &[
                json!({"id": 1, "method": "Version.Get"}),
                json!({"id": 2, "method": "Nope.Nope", "params": {}}),
            ],
        )
        .await;

        let version = response_for(&frames, 1);
        assert_eq!(version["result"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(version["result"]["versionString"]
            .as_str()
            .unwrap()
            .starts_with("porter v"));

        let unknown = response_for(&frames, 2);
        assert_eq!(unknown["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn classifies_and_cancels_unknown_operations() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("game.zip");
        std::fs::write(&archive, b"PK\x03\x04rest-of-zip").unwrap();

        let frames = exchange(
            dir.path(),
            &[
                json!({"id": 1, "method": "Installer.Classify", "params": {"path": archive}}),
                json!({"id": 2, "method": "Operation.Cancel", "params": {"id": "nobody"}}),
            ],
        )
        .await;

        assert_eq!(
            response_for(&frames, 1)["result"]["installerType"],
            "archive"
        );
        assert_eq!(response_for(&frames, 2)["result"]["didCancel"], false);
    }

    #[tokio::test]
    async fn clean_downloads_search_then_apply() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(downloads.join("stale")).unwrap();
        std::fs::write(downloads.join("stale/part.bin"), b"0123456789").unwrap();
        std::fs::create_dir_all(downloads.join("keep")).unwrap();

        let frames = exchange(
            dir.path(),
            &[json!({
                "id": 1,
                "method": "CleanDownloads.Search",
                "params": {"roots": [downloads], "whitelist": ["keep"]}
            })],
        )
        .await;
        let entries = response_for(&frames, 1)["result"]["entries"].clone();
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["size"], 10);

        let frames = exchange(
            dir.path(),
            &[json!({
                "id": "apply",
                "method": "CleanDownloads.Apply",
                "params": {"entries": entries}
            })],
        )
        .await;
        let apply = frames.iter().find(|f| f["id"] == "apply").unwrap();
        assert_eq!(apply["result"]["removed"], 1);
        assert!(!downloads.join("stale").exists());
        assert!(downloads.join("keep").exists());
    }

    #[tokio::test]
    async fn invalid_operation_params_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let frames = exchange(
            dir.path(),
            &[json!({
                "id": 7,
                "method": "Operation.Start",
                "params": {
                    "id": "op",
                    "stagingFolder": dir.path().join("staging"),
                    "operation": "install",
                    "uninstallParams": {"installFolder": dir.path().join("game")}
                }
            })],
        )
        .await;
        let response = response_for(&frames, 7);
        assert!(response.get("result").is_none());
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("requires exactly its own parameters"));
    }
}
