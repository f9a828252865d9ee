use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoomOptions {
    pub url: String,
    pub room_name: String,
    pub token: String,
    pub participant_identity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteParticipant {
    pub participant_id: String,
    pub identity: String,
    pub is_agent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentRoomEvent {
    ParticipantJoined(RemoteParticipant),
    ParticipantLeft { participant_id: String },
    Disconnected,
}

/// One inbound RPC call as delivered by the room. The payload arrives
/// either as a structured JSON value or as a JSON string the handler must
/// parse one level further.
#[derive(Debug, Clone)]
pub struct RpcInvocation {
    pub caller_identity: String,
    pub payload: serde_json::Value,
}

/// Inbound handler. The returned string is the RPC reply sent back to the
/// caller; it must never panic into the transport.
pub type RpcHandler = Arc<dyn Fn(RpcInvocation) -> BoxFuture<'static, String> + Send + Sync>;

/// A connected realtime room carrying the agent/surface RPC channel.
///
/// Registering a method name that is already registered replaces the
/// previous handler (last registration wins). Consumers that need fan-out
/// must multiplex above this trait.
#[async_trait]
pub trait AgentRoomSession: Send + Sync {
    fn register_rpc_handler(&self, method: &str, handler: RpcHandler) -> anyhow::Result<()>;
    fn unregister_rpc_handler(&self, method: &str);
    async fn perform_rpc(
        &self,
        destination_identity: &str,
        method: &str,
        payload: String,
    ) -> anyhow::Result<String>;
    /// The remote agent participant, when one is currently reachable.
    fn remote_agent(&self) -> Option<RemoteParticipant>;
    fn subscribe_events(&self) -> broadcast::Receiver<AgentRoomEvent>;
    async fn leave(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AgentRoomConnector: Send + Sync {
    async fn connect(&self, options: AgentRoomOptions) -> anyhow::Result<Arc<dyn AgentRoomSession>>;
}
