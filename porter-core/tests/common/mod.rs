#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use porter_common::config::Config;
use porter_common::error::{PorterError, Result};
use porter_common::protocol::{ClientRequest, Notification};
use porter_core::installer::{InferSniffer, ManagerRegistry, ZipTarExtractor};
use porter_core::launch::{PrereqContext, PrereqResolver};
use porter_core::operation::OperationDeps;
use porter_core::rpc::Conn;
use porter_net::http::ProgressFn;
use porter_net::{FetchRequest, Fetcher};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

/// Records everything the core sends and answers client requests from a
/// table keyed by method name.
#[derive(Default)]
pub struct RecordingConn {
    pub notifications: Mutex<Vec<Notification>>,
    pub calls: Mutex<Vec<ClientRequest>>,
    answers: Mutex<HashMap<&'static str, Value>>,
}

impl RecordingConn {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answering(method: &'static str, answer: Value) -> Arc<Self> {
        let conn = Self::default();
        conn.answers.lock().unwrap().insert(method, answer);
        Arc::new(conn)
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.method())
            .collect()
    }

    pub fn call_methods(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|c| c.method()).collect()
    }
}

#[async_trait]
impl Conn for RecordingConn {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }

    async fn call(&self, request: ClientRequest, _token: &CancellationToken) -> Result<Value> {
        let method = request.method();
        self.calls.lock().unwrap().push(request);
        self.answers
            .lock()
            .unwrap()
            .get(method)
            .cloned()
            .ok_or_else(|| PorterError::Generic(format!("no scripted answer for {method}")))
    }
}

/// Serves fixed bytes for every download.
pub struct ScriptedFetcher {
    pub body: Vec<u8>,
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest<'_>,
        progress: ProgressFn<'_>,
        token: &CancellationToken,
    ) -> Result<u64> {
        if token.is_cancelled() {
            return Err(PorterError::Cancelled);
        }
        let total = self.body.len() as u64;
        progress(total / 2, Some(total));
        std::fs::write(request.dest, &self.body)?;
        progress(total, Some(total));
        Ok(total)
    }
}

/// Never finishes a download until cancelled.
#[derive(Default)]
pub struct HangingFetcher {
    pub started: Arc<Notify>,
}

#[async_trait]
impl Fetcher for HangingFetcher {
    async fn fetch(
        &self,
        _request: &FetchRequest<'_>,
        _progress: ProgressFn<'_>,
        token: &CancellationToken,
    ) -> Result<u64> {
        self.started.notify_one();
        token.cancelled().await;
        Err(PorterError::Cancelled)
    }
}

/// Resolves prerequisites with a fixed result.
pub struct ScriptedPrereqs {
    pub result: Result<()>,
}

#[async_trait]
impl PrereqResolver for ScriptedPrereqs {
    async fn resolve(&self, _ctx: &PrereqContext<'_>) -> Result<()> {
        self.result.clone()
    }
}

pub fn test_config(root: &Path) -> Config {
    Config {
        porter_root: root.to_path_buf(),
        lock_poll_interval: Duration::from_millis(10),
        progress_interval: Duration::ZERO,
        ..Config::default()
    }
}

pub fn operation_deps(root: &Path, fetcher: Arc<dyn Fetcher>) -> OperationDeps {
    OperationDeps {
        fetcher,
        managers: Arc::new(ManagerRegistry::with_defaults(Arc::new(ZipTarExtractor))),
        sniffer: Arc::new(InferSniffer),
        config: Arc::new(test_config(root)),
    }
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
