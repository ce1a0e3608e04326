// ABOUTME: Entity identifier parsing and validation for the `domain.object_id` form.
// ABOUTME: Callers validate ids here before they ever reach the recording filter.

use thiserror::Error;

/// Errors produced when an entity id does not have the `domain.object_id` shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityIdError {
    #[error("invalid entity id: {0}")]
    Invalid(String),
}

/// Split an entity id into its domain and object id.
pub fn split_entity_id(entity_id: &str) -> Result<(&str, &str), EntityIdError> {
    match entity_id.split_once('.') {
        Some((domain, object_id)) if is_slug(domain) && is_slug(object_id) => {
            Ok((domain, object_id))
        }
        _ => Err(EntityIdError::Invalid(entity_id.to_string())),
    }
}

/// True when the id is lowercase `domain.object_id` with slug characters on both sides.
pub fn valid_entity_id(entity_id: &str) -> bool {
    split_entity_id(entity_id).is_ok()
}

fn is_slug(part: &str) -> bool {
    !part.is_empty()
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
