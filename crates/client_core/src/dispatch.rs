use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use agent_rpc::AgentRoomSession;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Outbound commands are user-visible count increments, so a stalled call
/// must fail instead of hanging the gesture forever; see
/// [`CommandError::Timeout`].
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not connected to a room; start the agent session first")]
    NotConnected,
    #[error("no agent is reachable; enable the agent session first")]
    AgentUnavailable,
    #[error("agent call {method} timed out")]
    Timeout { method: &'static str },
    #[error("agent rejected {method}: {detail}")]
    Remote {
        method: &'static str,
        detail: String,
    },
    #[error("failed to encode command payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub(crate) type SessionSlot = Arc<RwLock<Option<Arc<dyn AgentRoomSession>>>>;

/// Cheap handle surfaces use to send mutating commands to the agent. The
/// pre-flight checks run before anything touches the transport, and no
/// failure path triggers an automatic retry: these calls are not
/// idempotent-safe.
#[derive(Clone)]
pub struct CommandSender {
    session: SessionSlot,
    timeout: Duration,
}

impl CommandSender {
    pub(crate) fn new(session: SessionSlot, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    pub(crate) async fn invoke<P: Serialize>(
        &self,
        method: &'static str,
        payload: &P,
    ) -> Result<String, CommandError> {
        let session = self
            .session
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
            .ok_or(CommandError::NotConnected)?;
        let agent = session.remote_agent().ok_or(CommandError::AgentUnavailable)?;
        let body = serde_json::to_string(payload)?;

        debug!(method, destination = %agent.identity, "rpc: outbound command");
        match tokio::time::timeout(
            self.timeout,
            session.perform_rpc(&agent.identity, method, body),
        )
        .await
        {
            Err(_) => {
                warn!(method, timeout_ms = self.timeout.as_millis() as u64, "rpc: command timed out");
                Err(CommandError::Timeout { method })
            }
            Ok(Err(err)) => {
                warn!(method, "rpc: command rejected: {err}");
                Err(CommandError::Remote {
                    method,
                    detail: err.to_string(),
                })
            }
            Ok(Ok(reply)) => Ok(reply),
        }
    }
}
