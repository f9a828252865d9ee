use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use agent_rpc::{AgentRoomConnector, AgentRoomEvent, AgentRoomOptions, AgentRoomSession};
use anyhow::anyhow;
use async_trait::async_trait;
use shared::{
    domain::{Event, Group},
    protocol::{CreateEventRequest, CREATE_EVENT_METHOD},
};
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{info, warn};

pub mod dispatch;
pub mod reconcile;
pub mod registry;
pub mod surface;

pub use dispatch::{CommandError, CommandSender, DEFAULT_COMMAND_TIMEOUT};
pub use registry::{ListenerGuard, SubscriptionRegistry};
pub use surface::{DisplaySurface, SurfaceSnapshot};

use dispatch::SessionSlot;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect agent room: {0}")]
    Connect(String),
}

/// Notifications the UI layer subscribes to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SessionStateChanged { connected: bool },
    AgentAvailabilityChanged { available: bool },
    Error(String),
}

pub struct MissingAgentRoomConnector;

#[async_trait]
impl AgentRoomConnector for MissingAgentRoomConnector {
    async fn connect(
        &self,
        _options: AgentRoomOptions,
    ) -> anyhow::Result<Arc<dyn AgentRoomSession>> {
        Err(anyhow!("agent room connector is unavailable"))
    }
}

/// Client owning the transport session, the subscription registry, and the
/// outbound command path. Surfaces are mounted from here and share the
/// session without ever colliding on method registrations.
pub struct SyncClient {
    connector: Arc<dyn AgentRoomConnector>,
    registry: SubscriptionRegistry,
    session: SessionSlot,
    room_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
    command_timeout: Duration,
}

impl SyncClient {
    pub fn new() -> Arc<Self> {
        Self::new_with_dependencies(Arc::new(MissingAgentRoomConnector), DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn new_with_connector(connector: Arc<dyn AgentRoomConnector>) -> Arc<Self> {
        Self::new_with_dependencies(connector, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn new_with_dependencies(
        connector: Arc<dyn AgentRoomConnector>,
        command_timeout: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            connector,
            registry: SubscriptionRegistry::new(),
            session: Arc::new(RwLock::new(None)),
            room_task: Mutex::new(None),
            events,
            command_timeout,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Connects the room, binds every deferred subscription, and starts a
    /// pump that tracks agent presence. Replaces any previous session.
    pub async fn connect(self: &Arc<Self>, options: AgentRoomOptions) -> Result<(), SessionError> {
        let room_name = options.room_name.clone();
        let session = self
            .connector
            .connect(options)
            .await
            .map_err(|err| SessionError::Connect(err.to_string()))?;

        info!(room = %room_name, "room: connected");
        self.registry.attach_session(Arc::clone(&session));

        let task = self.spawn_room_event_task(Arc::clone(&session));
        {
            let mut slot = self.session.write().unwrap_or_else(|err| err.into_inner());
            *slot = Some(Arc::clone(&session));
        }
        let previous = {
            let mut guard = self.room_task.lock().unwrap_or_else(|err| err.into_inner());
            guard.replace(task)
        };
        if let Some(previous) = previous {
            previous.abort();
        }

        let _ = self
            .events
            .send(ClientEvent::SessionStateChanged { connected: true });
        if session.remote_agent().is_some() {
            let _ = self
                .events
                .send(ClientEvent::AgentAvailabilityChanged { available: true });
        }
        Ok(())
    }

    /// Tears the session down. Subscriptions survive and re-bind on the
    /// next connect; outbound calls already in flight are left to settle
    /// against their own session reference.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.registry.detach_session();

        let session = {
            let mut slot = self.session.write().unwrap_or_else(|err| err.into_inner());
            slot.take()
        };
        if let Some(session) = session {
            if let Err(err) = session.leave().await {
                warn!("room: leave failed: {err}");
                let _ = self
                    .events
                    .send(ClientEvent::Error(format!("room leave failed: {err}")));
            }
        }

        let task = {
            let mut guard = self.room_task.lock().unwrap_or_else(|err| err.into_inner());
            guard.take()
        };
        if let Some(task) = task {
            task.abort();
        }

        let _ = self
            .events
            .send(ClientEvent::SessionStateChanged { connected: false });
        Ok(())
    }

    pub fn mount_event_surface(&self) -> DisplaySurface<Event> {
        DisplaySurface::mount(&self.registry, self.command_sender())
    }

    pub fn mount_group_surface(&self) -> DisplaySurface<Group> {
        DisplaySurface::mount(&self.registry, self.command_sender())
    }

    /// Asks the agent to create an event. No local patch is applied: the
    /// new entity arrives through a later `show`/`show_list` push, so the
    /// reply string is only surfaced as confirmation.
    pub async fn create_event(&self, request: CreateEventRequest) -> Result<String, CommandError> {
        let reply = self
            .command_sender()
            .invoke(CREATE_EVENT_METHOD, &request)
            .await?;
        info!(title = %request.title, reply = %reply, "sync: create event acknowledged");
        Ok(reply)
    }

    pub fn command_sender(&self) -> CommandSender {
        CommandSender::new(Arc::clone(&self.session), self.command_timeout)
    }

    fn current_agent_available(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .as_ref()
            .is_some_and(|session| session.remote_agent().is_some())
    }

    fn spawn_room_event_task(
        self: &Arc<Self>,
        session: Arc<dyn AgentRoomSession>,
    ) -> JoinHandle<()> {
        let mut room_events = session.subscribe_events();
        let client = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = room_events.recv().await {
                match event {
                    AgentRoomEvent::ParticipantJoined(participant) if participant.is_agent => {
                        info!(identity = %participant.identity, "room: agent joined");
                        let _ = client
                            .events
                            .send(ClientEvent::AgentAvailabilityChanged { available: true });
                    }
                    AgentRoomEvent::ParticipantJoined(_) => {}
                    AgentRoomEvent::ParticipantLeft { participant_id } => {
                        if !client.current_agent_available() {
                            info!(participant_id = %participant_id, "room: agent left");
                            let _ = client
                                .events
                                .send(ClientEvent::AgentAvailabilityChanged { available: false });
                        }
                    }
                    AgentRoomEvent::Disconnected => {
                        warn!("room: transport disconnected");
                        let _ = client
                            .events
                            .send(ClientEvent::SessionStateChanged { connected: false });
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
