//! Entity identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a scene object.
///
/// Ids are handed out by [`SceneStore::create_entity`](crate::SceneStore::create_entity)
/// in increasing order and are never reused, so ordering by id is ordering by
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric id.
    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
