use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use agent_rpc::{
    AgentRoomConnector, AgentRoomEvent, AgentRoomOptions, AgentRoomSession, RemoteParticipant,
    RpcHandler, RpcInvocation,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Parser;
use client_core::{DisplaySurface, SyncClient};
use serde_json::{json, Value};
use shared::{
    domain::{Event, EventId, Group},
    protocol::{CreateEventRequest, CREATE_EVENT_METHOD},
};
use tokio::sync::broadcast;
use tracing::{info, warn};

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    room: Option<String>,
    #[arg(long)]
    identity: Option<String>,
    #[arg(long)]
    command_timeout_secs: Option<u64>,
}

/// In-process room replaying a canned agent session so the full mount →
/// push → command → unmount loop can be driven without a network.
struct ScriptedAgentRoom {
    handlers: Mutex<HashMap<String, RpcHandler>>,
    agent: RemoteParticipant,
    events: broadcast::Sender<AgentRoomEvent>,
}

impl ScriptedAgentRoom {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            agent: RemoteParticipant {
                participant_id: "pa-scripted".into(),
                identity: "scripted-agent".into(),
                is_agent: true,
            },
            events,
        })
    }

    async fn push(&self, method: &str, payload: Value) {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .get(method)
            .cloned();
        match handler {
            Some(handler) => {
                let status = handler(RpcInvocation {
                    caller_identity: self.agent.identity.clone(),
                    payload,
                })
                .await;
                info!(method, status = %status, "agent push handled");
            }
            None => warn!(method, "agent push dropped: no handler registered"),
        }
    }
}

#[async_trait]
impl AgentRoomSession for ScriptedAgentRoom {
    fn register_rpc_handler(&self, method: &str, handler: RpcHandler) -> Result<()> {
        self.handlers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(method.to_string(), handler);
        Ok(())
    }

    fn unregister_rpc_handler(&self, method: &str) {
        self.handlers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .remove(method);
    }

    async fn perform_rpc(
        &self,
        destination_identity: &str,
        method: &str,
        payload: String,
    ) -> Result<String> {
        info!(
            destination = destination_identity,
            method,
            payload = %payload,
            "scripted agent received command"
        );
        match method {
            CREATE_EVENT_METHOD => Ok("Event created".to_string()),
            _ => Ok("Success".to_string()),
        }
    }

    fn remote_agent(&self) -> Option<RemoteParticipant> {
        Some(self.agent.clone())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<AgentRoomEvent> {
        self.events.subscribe()
    }

    async fn leave(&self) -> Result<()> {
        Ok(())
    }
}

struct ScriptedConnector {
    room: Arc<ScriptedAgentRoom>,
}

#[async_trait]
impl AgentRoomConnector for ScriptedConnector {
    async fn connect(&self, options: AgentRoomOptions) -> Result<Arc<dyn AgentRoomSession>> {
        info!(
            room = %options.room_name,
            identity = %options.participant_identity,
            "scripted room joined"
        );
        Ok(Arc::clone(&self.room) as Arc<dyn AgentRoomSession>)
    }
}

fn render_events(label: &str, surface: &DisplaySurface<Event>) {
    let snapshot = surface.snapshot();
    if !snapshot.visible {
        println!("[{label}] no events shown");
        return;
    }
    println!("[{label}] upcoming events:");
    for event in &snapshot.entities {
        println!(
            "  - {} | {} @ {} | RSVPs: {}",
            event.id, event.title, event.location_name, event.rsvp_count
        );
    }
}

fn render_groups(label: &str, surface: &DisplaySurface<Group>) {
    let snapshot = surface.snapshot();
    if !snapshot.visible {
        println!("[{label}] no groups shown");
        return;
    }
    println!("[{label}] community groups:");
    for group in &snapshot.entities {
        println!(
            "  - {} | {} ({}) | members: {}",
            group.id, group.name, group.group_type, group.member_count
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(room) = args.room {
        settings.room_name = room;
    }
    if let Some(identity) = args.identity {
        settings.participant_identity = identity;
    }
    if let Some(secs) = args.command_timeout_secs {
        settings.command_timeout_secs = secs;
    }

    let room = ScriptedAgentRoom::new();
    let client = SyncClient::new_with_dependencies(
        Arc::new(ScriptedConnector {
            room: Arc::clone(&room),
        }),
        Duration::from_secs(settings.command_timeout_secs),
    );

    // Surfaces can mount before the room exists; their subscriptions stay
    // deferred until connect binds them.
    let events_surface = client.mount_event_surface();
    let groups_surface = client.mount_group_surface();

    client
        .connect(AgentRoomOptions {
            url: settings.url.clone(),
            room_name: settings.room_name.clone(),
            token: "demo-token".into(),
            participant_identity: settings.participant_identity.clone(),
        })
        .await?;

    room.push(
        "client.event",
        json!({
            "action": "show_list",
            "events": [
                {
                    "id": "evt-1",
                    "title": "Language cafe",
                    "description": "Practice Finnish over coffee",
                    "event_date": "2026-09-01T17:00:00Z",
                    "location_name": "Central Library",
                    "rsvp_count": 3,
                },
                {
                    "id": "evt-2",
                    "title": "Neighborhood picnic",
                    "description": "Bring a dish to share",
                    "event_date": "2026-09-05T12:00:00Z",
                    "location_name": "City Park",
                    "rsvp_count": 8,
                },
            ],
        }),
    )
    .await;
    room.push(
        "client.group",
        json!({
            "action": "show",
            "id": "grp-1",
            "name": "Mothers with kids",
            "description": "Weekly meetups for families",
            "group_type": "mothers_with_kids",
            "location_name": "Family center",
            "member_count": 12,
        }),
    )
    .await;

    render_events("overlay", &events_surface);
    render_groups("overlay", &groups_surface);

    println!("-- RSVP to evt-1 --");
    events_surface.rsvp(&EventId::new("evt-1")).await?;
    render_events("overlay", &events_surface);

    println!("-- create a new event --");
    let reply = client
        .create_event(CreateEventRequest {
            title: "Board game night".into(),
            description: "All levels welcome".into(),
            event_date: "2026-09-12T18:00:00Z".parse::<DateTime<Utc>>()?,
            location_name: "Community hall".into(),
        })
        .await?;
    println!("agent reply: {reply}");

    // The created event comes back as an authoritative push, never as a
    // local patch.
    room.push(
        "client.event",
        json!({
            "action": "show",
            "id": "evt-3",
            "title": "Board game night",
            "description": "All levels welcome",
            "event_date": "2026-09-12T18:00:00Z",
            "location_name": "Community hall",
            "rsvp_count": 1,
        }),
    )
    .await;
    render_events("overlay", &events_surface);

    println!("-- agent hides the group surface --");
    room.push("client.group", json!({ "action": "hide" })).await;
    render_groups("overlay", &groups_surface);

    client.disconnect().await?;
    Ok(())
}
