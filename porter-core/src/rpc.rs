// porter-core/src/rpc.rs
// Correlates agent-to-client requests with the client's responses.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use porter_common::error::{PorterError, Result};
use porter_common::protocol::{
    ClientRequest, Notification, RequestId, ResponseEnvelope,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// The client side of the protocol, as seen from the core.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Queues a notification. Never waits on the client.
    fn notify(&self, notification: Notification);

    /// Sends a request to the client and suspends until it answers, the
    /// connection closes, or `token` fires.
    async fn call(&self, request: ClientRequest, token: &CancellationToken) -> Result<Value>;
}

/// Typed wrapper around [`Conn::call`].
pub async fn call<R: DeserializeOwned>(
    conn: &dyn Conn,
    request: ClientRequest,
    token: &CancellationToken,
) -> Result<R> {
    let method = request.method();
    let value = match conn.call(request, token).await? {
        Value::Null => Value::Object(Default::default()),
        v => v,
    };
    serde_json::from_value(value)
        .map_err(|e| PorterError::Protocol(format!("malformed {method} result: {e}")))
}

type PendingMap = HashMap<RequestId, oneshot::Sender<Result<Value>>>;

/// Production [`Conn`]: serializes frames onto an outbound line queue and
/// keeps a table of requests awaiting a response.
pub struct Peer {
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<PendingMap>,
}

impl Peer {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn send_line(&self, line: String) -> bool {
        self.outbound.send(line).is_ok()
    }

    /// Writes a response to one of the client's requests.
    pub fn respond(&self, response: &ResponseEnvelope) {
        match serde_json::to_string(response) {
            Ok(line) => {
                if !self.send_line(line) {
                    debug!("Dropping response {}: connection closed", response.id);
                }
            }
            Err(e) => warn!("Failed to serialize response {}: {}", response.id, e),
        }
    }

    /// Routes a response from the client to the request waiting on it.
    /// Returns `false` when nobody is waiting for that id.
    pub fn resolve(&self, response: ResponseEnvelope) -> bool {
        let waiter = self.pending().remove(&response.id);
        match waiter {
            Some(tx) => {
                let id = response.id.clone();
                if tx.send(response.into_result()).is_err() {
                    debug!("Waiter for {} went away before the response arrived", id);
                }
                true
            }
            None => {
                warn!("Received response for unknown request {}", response.id);
                false
            }
        }
    }

    /// Fails every outstanding request; called when the input stream ends.
    pub fn close(&self) {
        let drained: Vec<_> = self.pending().drain().collect();
        for (id, tx) in drained {
            debug!("Failing pending request {} on close", id);
            let _ = tx.send(Err(PorterError::Generic(
                "connection closed before the client answered".into(),
            )));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

#[async_trait]
impl Conn for Peer {
    fn notify(&self, notification: Notification) {
        match serde_json::to_string(&notification) {
            Ok(line) => {
                if !self.send_line(line) {
                    debug!("Dropping {} notification: connection closed", notification.method());
                }
            }
            Err(e) => warn!("Failed to serialize {}: {}", notification.method(), e),
        }
    }

    async fn call(&self, request: ClientRequest, token: &CancellationToken) -> Result<Value> {
        let id = RequestId::Str(format!("porter-{}", Uuid::new_v4()));
        let method = request.method();
        let envelope = request.to_envelope(&id)?;
        let line = serde_json::to_string(&envelope)?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.clone(), tx);
        debug!("Calling {} on client as {}", method, id);

        if !self.send_line(line) {
            self.pending().remove(&id);
            return Err(PorterError::Generic(format!(
                "connection closed, cannot call {method}"
            )));
        }

        tokio::select! {
            answer = rx => match answer {
                Ok(result) => result,
                Err(_) => Err(PorterError::Generic(format!(
                    "connection closed while waiting for {method}"
                ))),
            },
            _ = token.cancelled() => {
                self.pending().remove(&id);
                debug!("Call {} ({}) cancelled", id, method);
                Err(PorterError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_common::protocol::{AllowSandboxSetupParams, AllowSandboxSetupResult};
    use std::sync::Arc;

    fn sandbox_request() -> ClientRequest {
        ClientRequest::AllowSandboxSetup(AllowSandboxSetupParams {})
    }

    #[tokio::test]
    async fn call_resolves_with_the_matching_response() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Peer::new(tx));

        let caller = {
            let peer = peer.clone();
            tokio::spawn(async move {
                call::<AllowSandboxSetupResult>(
                    peer.as_ref(),
                    sandbox_request(),
                    &CancellationToken::new(),
                )
                .await
            })
        };

        let line = rx.recv().await.unwrap();
        let sent: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(sent["method"], "AllowSandboxSetup");
        let id: RequestId = serde_json::from_value(sent["id"].clone()).unwrap();
        assert!(id.to_string().starts_with("porter-"));

        assert!(peer.resolve(ResponseEnvelope::success(
            id,
            serde_json::json!({"allow": true})
        )));
        let result = caller.await.unwrap().unwrap();
        assert!(result.allow);
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_abandons_the_call() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = Peer::new(tx);
        let token = CancellationToken::new();
        token.cancel();
        let err = peer.call(sandbox_request(), &token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(peer.pending_count(), 0);
    }

    #[tokio::test]
    async fn close_fails_outstanding_calls() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = Arc::new(Peer::new(tx));
        let caller = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.call(sandbox_request(), &CancellationToken::new()).await })
        };
        while peer.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        peer.close();
        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, PorterError::Generic(_)));
    }
}
