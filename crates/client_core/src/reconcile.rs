use shared::protocol::{ChannelEntity, ChannelUpdate};
use tracing::debug;

/// Applies one decoded inbound update to a surface's entity list and
/// visibility flag. Returns whether anything changed.
///
/// `show` upserts by id, preserving the entity's position when it is
/// already present and appending otherwise. `show_list` adopts the new
/// list verbatim in the given order. `hide` clears visibility but keeps
/// the list, so a later `show` resurfaces prior entries. An unrecognized
/// action is a no-op so newer agents can add actions without breaking
/// older surfaces.
pub fn apply_update<T: ChannelEntity>(
    entities: &mut Vec<T>,
    visible: &mut bool,
    update: ChannelUpdate<T>,
) -> bool {
    match update {
        ChannelUpdate::Show(entity) => {
            match entities
                .iter()
                .position(|existing| existing.entity_id() == entity.entity_id())
            {
                Some(index) => entities[index] = entity,
                None => entities.push(entity),
            }
            *visible = true;
            true
        }
        ChannelUpdate::Replace(list) => {
            *entities = list;
            *visible = true;
            true
        }
        ChannelUpdate::Hide => {
            *visible = false;
            true
        }
        ChannelUpdate::Unrecognized(action) => {
            debug!(kind = T::KIND, action, "sync: ignoring unrecognized action");
            false
        }
    }
}

/// Rendering gate: a surface shows nothing unless it is both marked
/// visible and holds at least one entity, so an empty `show_list` hides
/// the surface even though it sets the visibility flag.
pub fn is_rendered<T>(entities: &[T], visible: bool) -> bool {
    visible && !entities.is_empty()
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
