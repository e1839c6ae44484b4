//! Host-facing entity store.
//!
//! The bridge renders every device entity into this store after each poll
//! or command; the host reads it back and subscribes to change events.
//! This is the rendered surface only; the authoritative device state
//! lives in the coordinator's snapshot.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// State string for an entity whose device is stale or whose poll failed.
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// One rendered entity, in the shape the host consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub context: Context,
}

/// Write context attached to each state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: None,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Event fired on every write.
#[derive(Debug, Clone)]
pub struct StateChangedEvent {
    pub entity_id: String,
    pub old_state: Option<EntityState>,
    pub new_state: EntityState,
}

/// In-memory entity store with change fan-out.
pub struct EntityStore {
    states: Arc<DashMap<String, EntityState>>,
    event_tx: broadcast::Sender<StateChangedEvent>,
}

impl EntityStore {
    pub fn new(channel_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(channel_capacity);
        Self {
            states: Arc::new(DashMap::new()),
            event_tx,
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.states.get(entity_id).map(|e| e.value().clone())
    }

    pub fn get_all(&self) -> Vec<EntityState> {
        self.states.iter().map(|e| e.value().clone()).collect()
    }

    /// Read an entity's state as a number, if it has one.
    ///
    /// `unavailable`/`unknown` and non-numeric states come back as `None`;
    /// the climate mapper uses this for its linked temperature sensor.
    pub fn numeric_state(&self, entity_id: &str) -> Option<f64> {
        let state = self.get(entity_id)?;
        match state.state.as_str() {
            STATE_UNAVAILABLE | "unknown" | "" => None,
            s => s.parse().ok(),
        }
    }

    /// Write an entity state and fire a change event.
    ///
    /// `last_changed` only moves when the state string changes;
    /// `last_updated` moves when the state or attributes change.
    pub fn set(
        &self,
        entity_id: String,
        state: String,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> EntityState {
        let now = Utc::now();
        let old_state = self.states.get(&entity_id).map(|e| e.value().clone());

        let (last_changed, last_updated) = match &old_state {
            Some(prev) => (
                if prev.state != state { now } else { prev.last_changed },
                if prev.state != state || prev.attributes != attributes {
                    now
                } else {
                    prev.last_updated
                },
            ),
            None => (now, now),
        };

        let new_state = EntityState {
            entity_id: entity_id.clone(),
            state,
            attributes,
            last_changed,
            last_updated,
            context: Context::new(),
        };

        self.states.insert(entity_id.clone(), new_state.clone());

        // Ignore send errors; no subscribers is fine
        let _ = self.event_tx.send(StateChangedEvent {
            entity_id,
            old_state,
            new_state: new_state.clone(),
        });

        new_state
    }

    pub fn remove(&self, entity_id: &str) -> bool {
        self.states.remove(entity_id).is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangedEvent> {
        self.event_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
