use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{Event, EventId, Group, GroupId},
    error::PayloadError,
};

/// Inbound methods: the agent drives a surface by calling these on us.
pub const EVENT_CHANNEL_METHOD: &str = "client.event";
pub const GROUP_CHANNEL_METHOD: &str = "client.group";

/// Outbound methods: user gestures we forward to the agent.
pub const RSVP_EVENT_METHOD: &str = "agent.rsvpEvent";
pub const JOIN_GROUP_METHOD: &str = "agent.joinGroup";
pub const CREATE_EVENT_METHOD: &str = "agent.createEvent";

/// Status string an inbound handler returns to the agent. The agent only
/// logs it, so the contract is a flat string, not a structured reply.
pub const STATUS_SUCCESS: &str = "Success";

pub fn error_status(detail: impl std::fmt::Display) -> String {
    format!("Error: {detail}")
}

/// Ties an entity type to the channel that carries it.
pub trait ChannelEntity:
    Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Method name the agent invokes to push this entity kind.
    const INBOUND_METHOD: &'static str;
    /// Key wrapping the collection in a `show_list` payload.
    const LIST_FIELD: &'static str;
    /// Label used in logs and error details.
    const KIND: &'static str;

    fn entity_id(&self) -> &str;
}

impl ChannelEntity for Event {
    const INBOUND_METHOD: &'static str = EVENT_CHANNEL_METHOD;
    const LIST_FIELD: &'static str = "events";
    const KIND: &'static str = "event";

    fn entity_id(&self) -> &str {
        self.id.as_str()
    }
}

impl ChannelEntity for Group {
    const INBOUND_METHOD: &'static str = GROUP_CHANNEL_METHOD;
    const LIST_FIELD: &'static str = "groups";
    const KIND: &'static str = "group";

    fn entity_id(&self) -> &str {
        self.id.as_str()
    }
}

/// Decoded form of an inbound channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelUpdate<T> {
    /// Upsert a single entity by id.
    Show(T),
    /// Replace the whole list, order as given.
    Replace(Vec<T>),
    /// Clear surface visibility; the list itself is retained.
    Hide,
    /// Unknown discriminator, ignored for forward compatibility.
    Unrecognized(String),
}

/// Decodes an inbound payload that is either a JSON object or a JSON string
/// holding one more level of JSON. `show` carries the entity's fields flat
/// beside the `action` discriminator; `show_list` wraps the collection
/// under the entity kind's list field.
pub fn decode_update<T: ChannelEntity>(payload: &Value) -> Result<ChannelUpdate<T>, PayloadError> {
    if payload.is_null() {
        return Err(PayloadError::MissingPayload);
    }

    let parsed;
    let body = match payload {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw)
                .map_err(|err| PayloadError::UnparsablePayload(err.to_string()))?;
            &parsed
        }
        other => other,
    };

    let action = body
        .get("action")
        .and_then(Value::as_str)
        .ok_or(PayloadError::MissingAction)?;

    match action {
        "show" => {
            let entity: T = serde_json::from_value(body.clone()).map_err(|err| {
                PayloadError::MalformedFields {
                    kind: T::KIND,
                    detail: err.to_string(),
                }
            })?;
            Ok(ChannelUpdate::Show(entity))
        }
        "show_list" => {
            let list = body
                .get(T::LIST_FIELD)
                .ok_or_else(|| PayloadError::MalformedFields {
                    kind: T::KIND,
                    detail: format!("missing `{}` collection", T::LIST_FIELD),
                })?;
            let entities: Vec<T> = serde_json::from_value(list.clone()).map_err(|err| {
                PayloadError::MalformedFields {
                    kind: T::KIND,
                    detail: err.to_string(),
                }
            })?;
            Ok(ChannelUpdate::Replace(entities))
        }
        "hide" => Ok(ChannelUpdate::Hide),
        other => Ok(ChannelUpdate::Unrecognized(other.to_string())),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsvpEventRequest {
    pub event_id: EventId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGroupRequest {
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub description: String,
    pub event_date: DateTime<Utc>,
    pub location_name: String,
}
