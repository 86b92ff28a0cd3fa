// porter-common/src/protocol.rs
// Wire schema between the agent and its client: line-delimited JSON
// requests, responses and notifications. Method names follow `Noun.Verb`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PorterError, Result};
use crate::model::{
    InstallerType, LaunchParams, OperationStartParams, PrereqStatus, PrereqTask, TaskReason,
    TaskType, Upload,
};

/// Numeric error codes. Part of the wire contract, never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    Internal = -32603,
    OperationAborted = 410,
    OperationCancelled = 499,
    NetworkDisconnected = 9000,
}

impl ErrorCode {
    pub fn from_code(code: i64) -> Option<Self> {
        let c = match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::Internal,
            410 => ErrorCode::OperationAborted,
            499 => ErrorCode::OperationCancelled,
            9000 => ErrorCode::NetworkDisconnected,
            _ => return None,
        };
        Some(c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Str(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Str(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub stack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i64,
            message: message.into(),
            data: None,
        }
    }

    /// Maps an agent error to its wire form, carrying the full causal chain.
    pub fn from_error(err: &PorterError) -> Self {
        Self {
            code: err.code() as i64,
            message: err.root().to_string(),
            data: Some(ErrorData {
                stack: err.causal_chain(),
            }),
        }
    }

    /// Turns an error answered by the client back into an agent error.
    pub fn into_error(self) -> PorterError {
        match ErrorCode::from_code(self.code) {
            Some(ErrorCode::OperationCancelled) => PorterError::Cancelled,
            Some(ErrorCode::OperationAborted) => PorterError::Aborted(self.message),
            Some(ErrorCode::NetworkDisconnected) => PorterError::NetworkDisconnected(self.message),
            _ => PorterError::Protocol(format!("client error {}: {}", self.code, self.message)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ResponseEnvelope {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(err.into_error()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Anything the client may write on the agent's stdin.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

impl Incoming {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

// ---------------------------------------------------------------------------
// Notifications (agent -> client, fire and forget)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Notification {
    TaskStarted(TaskStartedNotification),
    TaskSucceeded(TaskSucceededNotification),
    #[serde(rename = "Operation.Progress")]
    Progress(ProgressNotification),
    LaunchRunning(LaunchRunningNotification),
    LaunchExited(LaunchExitedNotification),
    PrereqsStarted(PrereqsStartedNotification),
    PrereqsTaskState(PrereqsTaskStateNotification),
    PrereqsEnded(PrereqsEndedNotification),
    Log(LogNotification),
}

impl Notification {
    pub fn method(&self) -> &'static str {
        match self {
            Notification::TaskStarted(_) => "TaskStarted",
            Notification::TaskSucceeded(_) => "TaskSucceeded",
            Notification::Progress(_) => "Operation.Progress",
            Notification::LaunchRunning(_) => "LaunchRunning",
            Notification::LaunchExited(_) => "LaunchExited",
            Notification::PrereqsStarted(_) => "PrereqsStarted",
            Notification::PrereqsTaskState(_) => "PrereqsTaskState",
            Notification::PrereqsEnded(_) => "PrereqsEnded",
            Notification::Log(_) => "Log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStartedNotification {
    pub reason: TaskReason,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<Upload>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub installer: InstallerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<Upload>,
    pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSucceededNotification {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_result: Option<InstallResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressNotification {
    /// Overall progress in `[0, 1]`.
    pub progress: f64,
    /// Seconds until completion.
    pub eta: f64,
    /// Bytes per second.
    pub bps: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchRunningNotification {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchExitedNotification {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrereqsStartedNotification {
    pub tasks: BTreeMap<String, PrereqTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrereqsTaskStateNotification {
    pub name: String,
    pub status: PrereqStatus,
    pub progress: f64,
    pub eta: f64,
    pub bps: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrereqsEndedNotification {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogNotification {
    pub level: LogLevel,
    pub message: String,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

// ---------------------------------------------------------------------------
// Client requests (agent -> client, round trip)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ClientRequest {
    PickUpload(PickUploadParams),
    AllowSandboxSetup(AllowSandboxSetupParams),
    PrereqsFailed(PrereqsFailedParams),
    ShellLaunch(ShellLaunchParams),
    #[serde(rename = "HTMLLaunch")]
    HtmlLaunch(HtmlLaunchParams),
    #[serde(rename = "URLLaunch")]
    UrlLaunch(UrlLaunchParams),
}

impl ClientRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ClientRequest::PickUpload(_) => "PickUpload",
            ClientRequest::AllowSandboxSetup(_) => "AllowSandboxSetup",
            ClientRequest::PrereqsFailed(_) => "PrereqsFailed",
            ClientRequest::ShellLaunch(_) => "ShellLaunch",
            ClientRequest::HtmlLaunch(_) => "HTMLLaunch",
            ClientRequest::UrlLaunch(_) => "URLLaunch",
        }
    }

    /// Serializes the request as an envelope with the given id.
    pub fn to_envelope(&self, id: &RequestId) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        match value.as_object_mut() {
            Some(obj) => {
                obj.insert("id".to_string(), serde_json::to_value(id)?);
                Ok(value)
            }
            None => Err(PorterError::Protocol(format!(
                "{} did not serialize to an object",
                self.method()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickUploadParams {
    pub uploads: Vec<Upload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickUploadResult {
    /// Index into the offered uploads, negative to abort.
    pub index: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowSandboxSetupParams {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowSandboxSetupResult {
    pub allow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrereqsFailedParams {
    pub error: String,
    pub error_stack: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrereqsFailedResult {
    #[serde(rename = "continue")]
    pub continue_launch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellLaunchParams {
    pub item_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlLaunchParams {
    pub root_folder: PathBuf,
    pub index_path: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlLaunchParams {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResult {}

// ---------------------------------------------------------------------------
// Agent requests (client -> agent)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AgentRequest {
    VersionGet,
    OperationStart(OperationStartParams),
    OperationCancel(OperationCancelParams),
    Launch(LaunchParams),
    InstallerClassify(InstallerClassifyParams),
    CleanDownloadsSearch(CleanDownloadsSearchParams),
    CleanDownloadsApply(CleanDownloadsApplyParams),
}

impl AgentRequest {
    /// Decodes the params of a client request. Unknown methods are reported
    /// with [`ErrorCode::MethodNotFound`], bad params with
    /// [`ErrorCode::InvalidParams`].
    pub fn parse(method: &str, params: Value) -> std::result::Result<Self, RpcError> {
        fn decode<T: serde::de::DeserializeOwned>(
            method: &str,
            params: Value,
        ) -> std::result::Result<T, RpcError> {
            let params = if params.is_null() {
                Value::Object(Default::default())
            } else {
                params
            };
            serde_json::from_value(params).map_err(|e| {
                RpcError::new(
                    ErrorCode::InvalidParams,
                    format!("invalid params for {method}: {e}"),
                )
            })
        }

        let req = match method {
            "Version.Get" => AgentRequest::VersionGet,
            "Operation.Start" => AgentRequest::OperationStart(decode(method, params)?),
            "Operation.Cancel" => AgentRequest::OperationCancel(decode(method, params)?),
            "Launch" => AgentRequest::Launch(decode(method, params)?),
            "Installer.Classify" => AgentRequest::InstallerClassify(decode(method, params)?),
            "CleanDownloads.Search" => {
                AgentRequest::CleanDownloadsSearch(decode(method, params)?)
            }
            "CleanDownloads.Apply" => AgentRequest::CleanDownloadsApply(decode(method, params)?),
            other => {
                return Err(RpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("unknown method '{other}'"),
                ))
            }
        };
        Ok(req)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionGetResult {
    pub version: String,
    pub version_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCancelParams {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationCancelResult {
    /// False when no operation with that id was running.
    pub did_cancel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerClassifyParams {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerClassifyResult {
    pub installer_type: InstallerType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanDownloadsSearchParams {
    /// Folders whose sub-folders are candidates for removal.
    pub roots: Vec<PathBuf>,
    /// Sub-folders to keep, e.g. staging folders of live downloads.
    #[serde(default)]
    pub whitelist: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanDownloadsEntry {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanDownloadsSearchResult {
    pub entries: Vec<CleanDownloadsEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanDownloadsApplyParams {
    pub entries: Vec<CleanDownloadsEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanDownloadsApplyResult {
    pub removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notifications_carry_method_and_params() {
        let n = Notification::Progress(ProgressNotification {
            progress: 0.5,
            eta: 3.0,
            bps: 1024.0,
        });
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["method"], "Operation.Progress");
        assert_eq!(v["params"]["progress"], 0.5);
        assert!(v.get("id").is_none());

        let v = serde_json::to_value(Notification::LaunchRunning(Default::default())).unwrap();
        assert_eq!(v, json!({"method": "LaunchRunning", "params": {}}));
    }

    #[test]
    fn client_requests_get_an_id() {
        let req = ClientRequest::PrereqsFailed(PrereqsFailedParams {
            error: "boom".into(),
            error_stack: "boom: io".into(),
        });
        let v = req
            .to_envelope(&RequestId::Str("porter-1".into()))
            .unwrap();
        assert_eq!(v["id"], "porter-1");
        assert_eq!(v["method"], "PrereqsFailed");
        assert_eq!(v["params"]["errorStack"], "boom: io");
    }

    #[test]
    fn incoming_lines_split_requests_from_responses() {
        let req = Incoming::parse(r#"{"id":1,"method":"Version.Get"}"#).unwrap();
        assert!(matches!(req, Incoming::Request(r) if r.method == "Version.Get"));

        let resp = Incoming::parse(r#"{"id":"porter-2","result":{"continue":true}}"#).unwrap();
        let Incoming::Response(resp) = resp else {
            panic!("expected a response");
        };
        let result: PrereqsFailedResult =
            serde_json::from_value(resp.into_result().unwrap()).unwrap();
        assert!(result.continue_launch);
    }

    #[test]
    fn unknown_methods_are_reported() {
        let err = AgentRequest::parse("Game.Fly", Value::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotFound as i64);

        let err = AgentRequest::parse("Operation.Cancel", json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams as i64);
    }

    #[test]
    fn errors_keep_their_code_across_the_wire() {
        let err = PorterError::Aborted("nope".into()).context("launching");
        let wire = RpcError::from_error(&err);
        assert_eq!(wire.code, 410);
        assert!(wire.data.unwrap().stack.starts_with("launching"));

        let back = RpcError::new(ErrorCode::OperationCancelled, "cancelled").into_error();
        assert!(back.is_cancelled());
    }
}
