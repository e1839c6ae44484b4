//! Device-class entities and their state mappers.
//!
//! One module per device class. Every entity owns its latest device record
//! plus whatever derived internal state the cloud does not echo back, and
//! composes the same [`EntityContext`] rather than inheriting a base class.
//! Entities are built once from the first snapshot and live for the
//! bridge's lifetime: a device that drops out of a poll goes stale and
//! unavailable, it is never destroyed.

pub mod climate;
pub mod cover;
pub mod fan;
pub mod light;
pub mod sensor;
pub mod switch;

use std::sync::Arc;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::device::{find_record, DeviceRecord};
use crate::state::STATE_UNAVAILABLE;

pub use climate::{ClimateEntity, FanMode, HvacMode};
pub use cover::CoverEntity;
pub use fan::FanEntity;
pub use light::LightEntity;
pub use sensor::{SensorEntity, SensorKind};
pub use switch::{AcSwitchEntity, SwitchEntity};

/// A device whose record is older than this is unavailable even when
/// polling is healthy.
pub const STALE_AFTER_SECS: i64 = 600;

/// Availability couples two independent signals: transport health and
/// per-device freshness. Either failing marks the entity unavailable.
pub fn is_available(last_poll_success: bool, record_unix: i64, now_unix: i64) -> bool {
    last_poll_success && now_unix - record_unix < STALE_AFTER_SECS
}

/// What every entity shares: the coordinator handle it was constructed
/// with, its identity, and its latest resolved device record.
pub struct EntityContext {
    pub coordinator: Arc<Coordinator>,
    pub topic: String,
    pub unique_id: String,
    pub name: String,
    pub record: DeviceRecord,
}

impl EntityContext {
    pub fn new(coordinator: Arc<Coordinator>, record: &DeviceRecord, unique_id: String, name: String) -> Self {
        Self {
            coordinator,
            topic: record.topic.clone(),
            unique_id,
            name,
            record: record.clone(),
        }
    }

    /// Replace the held record when the snapshot still carries one for
    /// this topic; keep the previous record otherwise so staleness (and
    /// nothing else) degrades the entity.
    pub fn update_record(&mut self, record: Option<&DeviceRecord>) {
        if let Some(record) = record {
            self.record = record.clone();
        }
    }

    pub fn entity_id(&self, domain: &str) -> String {
        format!("{domain}.{}", slugify(&self.unique_id))
    }

    /// Attributes every entity starts from.
    pub fn base_attrs(&self) -> serde_json::Map<String, Value> {
        let mut attrs = serde_json::Map::new();
        attrs.insert("friendly_name".to_string(), Value::String(self.name.clone()));
        attrs.insert("integration".to_string(), Value::String("bemfa".to_string()));
        attrs.insert("topic".to_string(), Value::String(self.topic.clone()));
        attrs
    }
}

/// One rendered entity, ready for the host store.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub entity_id: String,
    pub state: String,
    pub attributes: serde_json::Map<String, Value>,
}

/// Which capability an entity carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Light,
    Switch,
    AcSwitch,
    Cover,
    Fan,
    Climate,
    Sensor,
}

/// Capability-tagged entity. Commands live on the per-class structs; the
/// fan-out path only needs the uniform update/render pair here.
pub enum BemfaEntity {
    Light(LightEntity),
    Switch(SwitchEntity),
    AcSwitch(AcSwitchEntity),
    Cover(CoverEntity),
    Fan(FanEntity),
    Climate(ClimateEntity),
    Sensor(SensorEntity),
}

impl BemfaEntity {
    pub fn ctx(&self) -> &EntityContext {
        match self {
            BemfaEntity::Light(e) => &e.ctx,
            BemfaEntity::Switch(e) => &e.ctx,
            BemfaEntity::AcSwitch(e) => &e.ctx,
            BemfaEntity::Cover(e) => &e.ctx,
            BemfaEntity::Fan(e) => &e.ctx,
            BemfaEntity::Climate(e) => &e.ctx,
            BemfaEntity::Sensor(e) => &e.ctx,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            BemfaEntity::Light(_) => EntityKind::Light,
            BemfaEntity::Switch(_) => EntityKind::Switch,
            BemfaEntity::AcSwitch(_) => EntityKind::AcSwitch,
            BemfaEntity::Cover(_) => EntityKind::Cover,
            BemfaEntity::Fan(_) => EntityKind::Fan,
            BemfaEntity::Climate(_) => EntityKind::Climate,
            BemfaEntity::Sensor(_) => EntityKind::Sensor,
        }
    }

    pub fn topic(&self) -> &str {
        &self.ctx().topic
    }

    pub fn unique_id(&self) -> &str {
        &self.ctx().unique_id
    }

    /// Re-resolve this entity's record by topic and recompute derived
    /// state. Called for every entity after every refresh; fan-out, not
    /// a diff.
    pub fn apply_snapshot(&mut self, snapshot: &[DeviceRecord]) {
        let record = find_record(snapshot, self.topic());
        match self {
            BemfaEntity::Light(e) => e.handle_update(record),
            BemfaEntity::Switch(e) => e.handle_update(record),
            BemfaEntity::AcSwitch(e) => e.handle_update(record),
            BemfaEntity::Cover(e) => e.handle_update(record),
            BemfaEntity::Fan(e) => e.handle_update(record),
            BemfaEntity::Climate(e) => e.handle_update(record),
            BemfaEntity::Sensor(e) => e.handle_update(record),
        }
    }

    /// Render for the host, with the availability policy applied on top
    /// of the class-specific state.
    pub fn render(&self, last_poll_success: bool, now_unix: i64) -> Rendered {
        let mut rendered = match self {
            BemfaEntity::Light(e) => e.render(),
            BemfaEntity::Switch(e) => e.render(),
            BemfaEntity::AcSwitch(e) => e.render(),
            BemfaEntity::Cover(e) => e.render(),
            BemfaEntity::Fan(e) => e.render(),
            BemfaEntity::Climate(e) => e.render(),
            BemfaEntity::Sensor(e) => e.render(),
        };
        if !is_available(last_poll_success, self.ctx().record.unix, now_unix) {
            rendered.state = STATE_UNAVAILABLE.to_string();
        }
        rendered
    }
}

/// Convert a name to an entity-id-safe slug.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::api::BemfaClient;
    use crate::coordinator::Coordinator;
    use crate::device::{DeviceClass, DeviceMessage, DeviceRecord};

    /// A coordinator whose endpoints refuse connections: commands come
    /// back `false`, nothing hangs.
    pub fn offline_coordinator() -> Arc<Coordinator> {
        let client = BemfaClient::with_endpoints("testuser", "http://127.0.0.1:1", "http://127.0.0.1:1");
        Arc::new(Coordinator::new(client, Duration::from_secs(30)))
    }

    pub fn record(topic: &str, class: DeviceClass, msg: DeviceMessage) -> DeviceRecord {
        DeviceRecord {
            topic: topic.to_string(),
            class,
            name: format!("{topic} name"),
            msg,
            unix: chrono::Utc::now().timestamp(),
            unit: vec![],
        }
    }
}
