use shared::Entity;
use std::sync::RwLock;

/// Latest entity set published by the simulation.
///
/// The simulation replaces the whole list; the broadcaster takes a copy once
/// per tick and never holds the lock while sending.
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: RwLock<Vec<Entity>>,
}

impl EntityTable {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities: RwLock::new(entities),
        }
    }

    pub fn replace(&self, entities: Vec<Entity>) {
        // The list is only ever swapped whole, so a poisoned guard is still valid.
        let mut guard = self.entities.write().unwrap_or_else(|e| e.into_inner());
        *guard = entities;
    }

    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entities.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
