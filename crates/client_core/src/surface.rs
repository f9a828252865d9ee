use std::sync::{Arc, Mutex, Weak};

use agent_rpc::RpcInvocation;
use serde_json::Value;
use shared::{
    domain::{Event, EventId, Group, GroupId},
    protocol::{
        decode_update, error_status, ChannelEntity, JoinGroupRequest, RsvpEventRequest,
        JOIN_GROUP_METHOD, RSVP_EVENT_METHOD, STATUS_SUCCESS,
    },
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    dispatch::{CommandError, CommandSender},
    reconcile::{apply_update, is_rendered},
    registry::{Listener, ListenerGuard, SubscriptionRegistry},
};

struct SurfaceState<T> {
    entities: Vec<T>,
    visible: bool,
}

struct SurfaceShared<T: ChannelEntity> {
    state: Mutex<SurfaceState<T>>,
    changed: watch::Sender<u64>,
}

impl<T: ChannelEntity> SurfaceShared<T> {
    fn handle_inbound(&self, payload: &Value) -> String {
        match decode_update::<T>(payload) {
            Ok(update) => {
                let did_change = {
                    let mut guard = self.lock_state();
                    let state = &mut *guard;
                    apply_update(&mut state.entities, &mut state.visible, update)
                };
                if did_change {
                    self.changed.send_modify(|version| *version += 1);
                }
                STATUS_SUCCESS.to_string()
            }
            Err(err) => {
                warn!(kind = T::KIND, "sync: dropping malformed inbound payload: {err}");
                error_status(err)
            }
        }
    }

    fn mutate(&self, apply: impl FnOnce(&mut SurfaceState<T>) -> bool) {
        let did_change = {
            let mut state = self.lock_state();
            apply(&mut state)
        };
        if did_change {
            self.changed.send_modify(|version| *version += 1);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SurfaceState<T>> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Point-in-time copy of a surface for rendering glue. `visible` already
/// applies the rendering gate, so `false` means render nothing.
#[derive(Debug, Clone)]
pub struct SurfaceSnapshot<T> {
    pub entities: Vec<T>,
    pub visible: bool,
}

/// A mounted UI region owning its copy of one entity kind's list, fed by
/// the agent's inbound pushes and able to dispatch mutating commands back.
///
/// Each surface owns its list exclusively; several surfaces stay
/// consistent only because they observe the same inbound stream. Dropping
/// the surface unsubscribes it synchronously, and any still-settling
/// inbound dispatch resolves as a no-op against it.
pub struct DisplaySurface<T: ChannelEntity> {
    shared: Arc<SurfaceShared<T>>,
    commands: CommandSender,
    _guard: ListenerGuard,
}

impl<T: ChannelEntity> DisplaySurface<T> {
    pub(crate) fn mount(registry: &SubscriptionRegistry, commands: CommandSender) -> Self {
        let (changed, _) = watch::channel(0u64);
        let shared = Arc::new(SurfaceShared {
            state: Mutex::new(SurfaceState {
                entities: Vec::new(),
                visible: false,
            }),
            changed,
        });

        let weak: Weak<SurfaceShared<T>> = Arc::downgrade(&shared);
        let listener: Listener = Arc::new(move |invocation: &RpcInvocation| {
            let shared = weak.upgrade()?;
            Some(shared.handle_inbound(&invocation.payload))
        });
        let guard = registry.subscribe(T::INBOUND_METHOD, listener);
        info!(kind = T::KIND, method = T::INBOUND_METHOD, "sync: surface mounted");

        Self {
            shared,
            commands,
            _guard: guard,
        }
    }

    pub fn entities(&self) -> Vec<T> {
        self.shared.lock_state().entities.clone()
    }

    pub fn is_visible(&self) -> bool {
        let state = self.shared.lock_state();
        is_rendered(&state.entities, state.visible)
    }

    pub fn snapshot(&self) -> SurfaceSnapshot<T> {
        let state = self.shared.lock_state();
        SurfaceSnapshot {
            entities: state.entities.clone(),
            visible: is_rendered(&state.entities, state.visible),
        }
    }

    /// Bumped after every applied update; rendering glue watches this to
    /// know when to redraw.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changed.subscribe()
    }
}

impl DisplaySurface<Event> {
    /// RSVPs to an event through the agent, then optimistically bumps the
    /// local count by exactly 1. The agent's authoritative push later
    /// overwrites the whole record either way; on failure nothing local
    /// changes.
    pub async fn rsvp(&self, event_id: &EventId) -> Result<(), CommandError> {
        let reply = self
            .commands
            .invoke(
                RSVP_EVENT_METHOD,
                &RsvpEventRequest {
                    event_id: event_id.clone(),
                },
            )
            .await?;
        info!(event_id = %event_id, reply = %reply, "sync: RSVP accepted");

        self.shared.mutate(|state| {
            match state.entities.iter_mut().find(|event| &event.id == event_id) {
                Some(event) => {
                    event.rsvp_count += 1;
                    true
                }
                None => false,
            }
        });
        Ok(())
    }
}

impl DisplaySurface<Group> {
    /// Joins a group through the agent with the same optimistic `+1`
    /// protocol as [`DisplaySurface::rsvp`].
    pub async fn join(&self, group_id: &GroupId) -> Result<(), CommandError> {
        let reply = self
            .commands
            .invoke(
                JOIN_GROUP_METHOD,
                &JoinGroupRequest {
                    group_id: group_id.clone(),
                },
            )
            .await?;
        info!(group_id = %group_id, reply = %reply, "sync: join accepted");

        self.shared.mutate(|state| {
            match state.entities.iter_mut().find(|group| &group.id == group_id) {
                Some(group) => {
                    group.member_count += 1;
                    true
                }
                None => false,
            }
        });
        Ok(())
    }
}
