//! Core identifier types shared across faultlab crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable name of a monitored or stress-targeted unit (a container, a
/// host, or an application instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create a new entity identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Parse a comma-separated entity list as accepted on the command line.
///
/// Entries are trimmed; empty entries are dropped.
pub fn parse_entity_list(value: &str) -> Vec<EntityId> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(EntityId::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_list() {
        let entities = parse_entity_list("cu0, cu1 ,du0");
        assert_eq!(
            entities,
            vec![EntityId::new("cu0"), EntityId::new("cu1"), EntityId::new("du0")]
        );
    }

    #[test]
    fn test_parse_entity_list_drops_empty_entries() {
        let entities = parse_entity_list("cu0,,  ,du0,");
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn test_entity_id_display_and_serde() {
        let id = EntityId::new("srscu0");
        assert_eq!(id.to_string(), "srscu0");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"srscu0\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
