use super::*;
use std::collections::{HashMap, VecDeque};

use agent_rpc::{RemoteParticipant, RpcHandler, RpcInvocation};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use shared::domain::{EventId, GroupId};

/// Scripted room: records outbound calls, replays queued replies, and lets
/// tests deliver inbound invocations through whatever handler the client
/// registered.
struct TestAgentRoom {
    handlers: Mutex<HashMap<String, RpcHandler>>,
    outbound: Mutex<Vec<(String, String, String)>>,
    replies: Mutex<VecDeque<Result<String, String>>>,
    agent: Mutex<Option<RemoteParticipant>>,
    hang_outbound: bool,
    events: broadcast::Sender<agent_rpc::AgentRoomEvent>,
}

impl TestAgentRoom {
    fn with_agent() -> Arc<Self> {
        let room = Self::build(false);
        room.set_agent(Some(agent_participant()));
        room
    }

    fn without_agent() -> Arc<Self> {
        Self::build(false)
    }

    fn hanging() -> Arc<Self> {
        let room = Self::build(true);
        room.set_agent(Some(agent_participant()));
        room
    }

    fn build(hang_outbound: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            outbound: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            agent: Mutex::new(None),
            hang_outbound,
            events,
        })
    }

    fn set_agent(&self, agent: Option<RemoteParticipant>) {
        *self.agent.lock().unwrap() = agent;
    }

    fn queue_reply(&self, reply: Result<&str, &str>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(reply.map(str::to_string).map_err(str::to_string));
    }

    fn outbound_calls(&self) -> Vec<(String, String, String)> {
        self.outbound.lock().unwrap().clone()
    }

    async fn deliver(&self, method: &str, payload: Value) -> Option<String> {
        let handler = self.handlers.lock().unwrap().get(method).cloned();
        match handler {
            Some(handler) => Some(
                handler(RpcInvocation {
                    caller_identity: "agent-1".into(),
                    payload,
                })
                .await,
            ),
            None => None,
        }
    }
}

fn agent_participant() -> RemoteParticipant {
    RemoteParticipant {
        participant_id: "p-agent".into(),
        identity: "agent-1".into(),
        is_agent: true,
    }
}

#[async_trait]
impl AgentRoomSession for TestAgentRoom {
    fn register_rpc_handler(&self, method: &str, handler: RpcHandler) -> anyhow::Result<()> {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), handler);
        Ok(())
    }

    fn unregister_rpc_handler(&self, method: &str) {
        self.handlers.lock().unwrap().remove(method);
    }

    async fn perform_rpc(
        &self,
        destination_identity: &str,
        method: &str,
        payload: String,
    ) -> anyhow::Result<String> {
        if self.hang_outbound {
            futures::future::pending::<()>().await;
        }
        self.outbound.lock().unwrap().push((
            destination_identity.to_string(),
            method.to_string(),
            payload,
        ));
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(detail)) => Err(anyhow!(detail)),
            None => Ok("Success".to_string()),
        }
    }

    fn remote_agent(&self) -> Option<RemoteParticipant> {
        self.agent.lock().unwrap().clone()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<agent_rpc::AgentRoomEvent> {
        self.events.subscribe()
    }

    async fn leave(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct TestConnector {
    room: Arc<TestAgentRoom>,
}

#[async_trait]
impl AgentRoomConnector for TestConnector {
    async fn connect(
        &self,
        _options: AgentRoomOptions,
    ) -> anyhow::Result<Arc<dyn AgentRoomSession>> {
        Ok(Arc::clone(&self.room) as Arc<dyn AgentRoomSession>)
    }
}

fn room_options() -> AgentRoomOptions {
    AgentRoomOptions {
        url: "wss://rooms.test".into(),
        room_name: "community".into(),
        token: "token".into(),
        participant_identity: "user-7".into(),
    }
}

async fn connected_client(room: &Arc<TestAgentRoom>) -> Arc<SyncClient> {
    let client = SyncClient::new_with_connector(Arc::new(TestConnector {
        room: Arc::clone(room),
    }));
    client.connect(room_options()).await.expect("connect");
    client
}

fn show_event(id: &str, rsvp_count: u32) -> Value {
    json!({
        "action": "show",
        "id": id,
        "title": format!("event {id}"),
        "description": "community meetup",
        "event_date": "2026-09-01T17:00:00Z",
        "location_name": "Central Library",
        "rsvp_count": rsvp_count,
    })
}

fn show_group(id: &str, member_count: u32) -> Value {
    json!({
        "action": "show",
        "id": id,
        "name": format!("group {id}"),
        "description": "community group",
        "group_type": "language_exchange",
        "member_count": member_count,
    })
}

#[tokio::test]
async fn optimistic_rsvp_increments_exactly_once() {
    let room = TestAgentRoom::with_agent();
    let client = connected_client(&room).await;
    let surface = client.mount_event_surface();

    room.deliver("client.event", show_event("1", 3)).await;
    surface.rsvp(&EventId::new("1")).await.expect("rsvp");

    let calls = room.outbound_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "agent-1");
    assert_eq!(calls[0].1, "agent.rsvpEvent");
    let payload: Value = serde_json::from_str(&calls[0].2).expect("payload json");
    assert_eq!(payload, json!({"event_id": "1"}));

    assert_eq!(surface.entities()[0].rsvp_count, 4);
}

#[tokio::test]
async fn failed_command_leaves_entities_untouched() {
    let room = TestAgentRoom::with_agent();
    room.queue_reply(Err("event is full"));
    let client = connected_client(&room).await;
    let surface = client.mount_event_surface();

    room.deliver("client.event", show_event("1", 3)).await;
    let before = surface.entities();

    let err = surface.rsvp(&EventId::new("1")).await.expect_err("rejected");
    assert!(matches!(err, CommandError::Remote { .. }));
    assert_eq!(surface.entities(), before);
}

#[tokio::test]
async fn authoritative_push_overwrites_optimistic_count() {
    let room = TestAgentRoom::with_agent();
    let client = connected_client(&room).await;
    let surface = client.mount_event_surface();

    room.deliver("client.event", show_event("1", 3)).await;
    surface.rsvp(&EventId::new("1")).await.expect("rsvp");
    assert_eq!(surface.entities()[0].rsvp_count, 4);

    // A stale push still wins: the agent's record replaces the whole entity.
    room.deliver("client.event", show_event("1", 2)).await;
    assert_eq!(surface.entities().len(), 1);
    assert_eq!(surface.entities()[0].rsvp_count, 2);
}

#[tokio::test]
async fn commands_fail_fast_without_agent_or_session() {
    let room = TestAgentRoom::without_agent();
    let client = connected_client(&room).await;
    let surface = client.mount_group_surface();

    room.deliver("client.group", show_group("g-1", 9)).await;
    let err = surface.join(&GroupId::new("g-1")).await.expect_err("no agent");
    assert!(matches!(err, CommandError::AgentUnavailable));
    assert!(room.outbound_calls().is_empty());
    assert_eq!(surface.entities()[0].member_count, 9);

    let disconnected = SyncClient::new();
    let orphan = disconnected.mount_group_surface();
    let err = orphan.join(&GroupId::new("g-1")).await.expect_err("no session");
    assert!(matches!(err, CommandError::NotConnected));
}

#[tokio::test]
async fn join_group_applies_optimistic_increment() {
    let room = TestAgentRoom::with_agent();
    let client = connected_client(&room).await;
    let surface = client.mount_group_surface();

    room.deliver("client.group", show_group("g-1", 9)).await;
    surface.join(&GroupId::new("g-1")).await.expect("join");

    assert_eq!(surface.entities()[0].member_count, 10);
    let calls = room.outbound_calls();
    assert_eq!(calls[0].1, "agent.joinGroup");
}

#[tokio::test]
async fn create_event_sends_fields_and_patches_nothing() {
    let room = TestAgentRoom::with_agent();
    room.queue_reply(Ok("Event created"));
    let client = connected_client(&room).await;
    let surface = client.mount_event_surface();

    let reply = client
        .create_event(shared::protocol::CreateEventRequest {
            title: "Picnic".into(),
            description: "Bring food".into(),
            event_date: Utc.with_ymd_and_hms(2026, 9, 5, 12, 0, 0).unwrap(),
            location_name: "City Park".into(),
        })
        .await
        .expect("create");
    assert_eq!(reply, "Event created");

    let calls = room.outbound_calls();
    assert_eq!(calls[0].1, "agent.createEvent");
    let payload: Value = serde_json::from_str(&calls[0].2).expect("payload json");
    assert_eq!(payload["title"], "Picnic");
    assert_eq!(payload["location_name"], "City Park");

    // The created entity is expected via a later push, not a local patch.
    assert!(surface.entities().is_empty());
    assert!(!surface.is_visible());
}

#[tokio::test]
async fn hung_command_times_out_without_mutation() {
    let room = TestAgentRoom::hanging();
    let client = SyncClient::new_with_dependencies(
        Arc::new(TestConnector {
            room: Arc::clone(&room),
        }),
        Duration::from_millis(50),
    );
    client.connect(room_options()).await.expect("connect");
    let surface = client.mount_event_surface();

    room.deliver("client.event", show_event("1", 3)).await;
    let err = surface.rsvp(&EventId::new("1")).await.expect_err("deadline");
    assert!(matches!(err, CommandError::Timeout { .. }));
    assert_eq!(surface.entities()[0].rsvp_count, 3);
}

#[tokio::test]
async fn surfaces_mounted_before_connect_receive_later_pushes() {
    let room = TestAgentRoom::with_agent();
    let client = SyncClient::new_with_connector(Arc::new(TestConnector {
        room: Arc::clone(&room),
    }));
    let surface = client.mount_event_surface();

    client.connect(room_options()).await.expect("connect");
    let status = room.deliver("client.event", show_event("1", 0)).await;

    assert_eq!(status.as_deref(), Some("Success"));
    assert_eq!(surface.entities().len(), 1);
}

#[tokio::test]
async fn two_surfaces_observe_the_same_push() {
    let room = TestAgentRoom::with_agent();
    let client = connected_client(&room).await;
    let overlay = client.mount_event_surface();
    let panel = client.mount_event_surface();

    room.deliver(
        "client.event",
        json!({
            "action": "show_list",
            "events": [
                show_event("1", 0),
                show_event("2", 5),
            ],
        }),
    )
    .await;

    assert_eq!(overlay.entities().len(), 2);
    assert_eq!(panel.entities().len(), 2);
    assert!(overlay.is_visible());
    assert!(panel.is_visible());
}

#[tokio::test]
async fn unmounting_a_surface_stops_inbound_delivery() {
    let room = TestAgentRoom::with_agent();
    let client = connected_client(&room).await;
    let surface = client.mount_event_surface();

    room.deliver("client.event", show_event("1", 3)).await;
    assert_eq!(surface.entities().len(), 1);

    drop(surface);
    // The transport registration is gone, so a late push reaches nothing.
    let status = room.deliver("client.event", show_event("2", 0)).await;
    assert_eq!(status, None);
}

#[tokio::test]
async fn malformed_payloads_return_error_status_and_change_nothing() {
    let room = TestAgentRoom::with_agent();
    let client = connected_client(&room).await;
    let surface = client.mount_event_surface();
    room.deliver("client.event", show_event("1", 3)).await;
    let before = surface.snapshot();

    let status = room.deliver("client.event", Value::Null).await;
    assert_eq!(status.as_deref(), Some("Error: invalid RPC data format"));

    let status = room
        .deliver("client.event", json!({"id": "2", "title": "no action"}))
        .await;
    assert_eq!(
        status.as_deref(),
        Some("Error: payload is missing an action discriminator")
    );

    let status = room
        .deliver("client.event", Value::String("{not json".into()))
        .await;
    assert!(status.unwrap().starts_with("Error: payload is not valid JSON"));

    assert_eq!(surface.entities(), before.entities);
    assert_eq!(surface.is_visible(), before.visible);
}

#[tokio::test]
async fn string_encoded_payloads_are_applied() {
    let room = TestAgentRoom::with_agent();
    let client = connected_client(&room).await;
    let surface = client.mount_event_surface();

    let status = room
        .deliver(
            "client.event",
            Value::String(show_event("1", 2).to_string()),
        )
        .await;

    assert_eq!(status.as_deref(), Some("Success"));
    assert_eq!(surface.entities()[0].rsvp_count, 2);
}

#[tokio::test]
async fn agent_presence_is_broadcast_from_room_events() {
    let room = TestAgentRoom::without_agent();
    let client = connected_client(&room).await;
    let mut events = client.subscribe_events();

    room.set_agent(Some(agent_participant()));
    let _ = room
        .events
        .send(agent_rpc::AgentRoomEvent::ParticipantJoined(agent_participant()));

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event pump delivered")
        .expect("channel open");
    assert_eq!(
        event,
        ClientEvent::AgentAvailabilityChanged { available: true }
    );
}
