//! The bridge itself: one account, one coordinator, N entities.
//!
//! Setup takes the first snapshot (the one refresh that is allowed to
//! fail loudly), builds every entity the snapshot supports, and from then
//! on fans each refresh out to all of them. Entities are never destroyed:
//! a device missing from a later snapshot goes stale and unavailable,
//! nothing else.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::api::{BemfaClient, UpdateFailed};
use crate::config::{BridgeConfig, ConfigError};
use crate::coordinator::Coordinator;
use crate::device::{DeviceClass, DeviceRecord};
use crate::entities::{
    AcSwitchEntity, BemfaEntity, ClimateEntity, CoverEntity, EntityKind, FanEntity, FanMode,
    HvacMode, LightEntity, SensorEntity, SensorKind, SwitchEntity,
};
use crate::state::EntityStore;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Refresh(#[from] UpdateFailed),
}

#[derive(Debug, Error)]
#[error("no matching entity for topic {topic}")]
pub struct EntityNotFound {
    pub topic: String,
}

/// One registered entity plus the metadata the command router needs
/// without taking the lock.
pub struct EntityHandle {
    pub topic: String,
    pub unique_id: String,
    pub kind: EntityKind,
    entity: Arc<Mutex<BemfaEntity>>,
}

pub struct BemfaIntegration {
    coordinator: Arc<Coordinator>,
    store: Arc<EntityStore>,
    entities: Vec<EntityHandle>,
    poll_task: StdMutex<Option<JoinHandle<()>>>,
}

impl BemfaIntegration {
    /// Set up against the production cloud.
    pub async fn setup(config: BridgeConfig, store: Arc<EntityStore>) -> Result<Arc<Self>, SetupError> {
        let client = BemfaClient::new(&config.user);
        Self::setup_with_client(config, store, client).await
    }

    /// Set up with a caller-supplied client (tests point this at a local
    /// server). The first refresh must succeed: a bridge that can't see
    /// its account has nothing to build entities from.
    pub async fn setup_with_client(
        config: BridgeConfig,
        store: Arc<EntityStore>,
        client: BemfaClient,
    ) -> Result<Arc<Self>, SetupError> {
        config.validate()?;

        let coordinator = Arc::new(Coordinator::new(
            client,
            Duration::from_secs(config.scan_interval_secs),
        ));
        coordinator.refresh().await?;

        let snapshot = coordinator.snapshot();
        let entities = build_entities(&config, &coordinator, &store, &snapshot);
        tracing::info!(
            devices = snapshot.len(),
            entities = entities.len(),
            "bemfa bridge ready"
        );

        let integration = Arc::new(Self {
            coordinator,
            store,
            entities,
            poll_task: StdMutex::new(None),
        });
        integration.publish_all().await;
        Ok(integration)
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn entities(&self) -> &[EntityHandle] {
        &self.entities
    }

    /// Spawn the recurring poll task. Setup already refreshed once, so
    /// the loop sleeps first. A failed poll never stops the timer.
    pub fn start_poller(self: Arc<Self>) {
        let interval = self.coordinator.poll_interval();
        let weak = Arc::downgrade(&self);
        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "poll timer started");
            loop {
                tokio::time::sleep(interval).await;
                // The timer dies with the bridge
                let Some(bridge) = weak.upgrade() else { break };
                bridge.refresh_now().await;
            }
        });

        let mut slot = self.poll_task.lock().unwrap();
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the poll timer. In-flight requests are not individually
    /// cancelled; dropping the client closes the session.
    pub fn shutdown(&self) {
        if let Some(handle) = self.poll_task.lock().unwrap().take() {
            handle.abort();
            tracing::info!("poll timer cancelled");
        }
    }

    /// On-demand refresh plus fan-out, also used by every timer tick.
    pub async fn refresh_now(&self) {
        // Failure is already logged and flagged inside the coordinator
        let _ = self.coordinator.refresh().await;
        self.publish_all().await;
    }

    /// Fan the current snapshot out to every entity and render each one
    /// into the host store. O(entities) per call, no diffing.
    pub async fn publish_all(&self) {
        let snapshot = self.coordinator.snapshot();
        let last_success = self.coordinator.last_success();
        let now = Utc::now().timestamp();

        for handle in &self.entities {
            let mut entity = handle.entity.lock().await;
            entity.apply_snapshot(&snapshot);
            let rendered = entity.render(last_success, now);
            drop(entity);
            self.store.set(rendered.entity_id, rendered.state, rendered.attributes);
        }
    }

    async fn publish_one(&self, handle: &EntityHandle) {
        let entity = handle.entity.lock().await;
        let rendered = entity.render(self.coordinator.last_success(), Utc::now().timestamp());
        drop(entity);
        self.store.set(rendered.entity_id, rendered.state, rendered.attributes);
    }

    fn find(&self, topic: &str, kind: EntityKind) -> Result<&EntityHandle, EntityNotFound> {
        self.entities
            .iter()
            .find(|h| h.topic == topic && h.kind == kind)
            .ok_or_else(|| EntityNotFound { topic: topic.to_string() })
    }

    // ── Command routing ──────────────────────────────────────────

    /// Turn on whatever on/off capability the topic carries. For an air
    /// conditioner this is the power switch, which also nudges the
    /// paired climate entity.
    pub async fn turn_on(&self, topic: &str) -> Result<(), EntityNotFound> {
        for handle in self.entities.iter().filter(|h| h.topic == topic) {
            let mut paired_power = None;
            {
                let mut entity = handle.entity.lock().await;
                match &mut *entity {
                    BemfaEntity::Light(e) => e.turn_on().await,
                    BemfaEntity::Switch(e) => e.turn_on().await,
                    BemfaEntity::Fan(e) => e.turn_on(None).await,
                    BemfaEntity::AcSwitch(e) => paired_power = Some(e.turn_on().await),
                    _ => continue,
                }
            }
            self.publish_one(handle).await;
            if let Some(on) = paired_power {
                self.nudge_climate(topic, on).await;
            }
            return Ok(());
        }
        Err(EntityNotFound { topic: topic.to_string() })
    }

    pub async fn turn_off(&self, topic: &str) -> Result<(), EntityNotFound> {
        for handle in self.entities.iter().filter(|h| h.topic == topic) {
            let mut paired_power = None;
            {
                let mut entity = handle.entity.lock().await;
                match &mut *entity {
                    BemfaEntity::Light(e) => e.turn_off().await,
                    BemfaEntity::Switch(e) => e.turn_off().await,
                    BemfaEntity::Fan(e) => e.turn_off().await,
                    BemfaEntity::AcSwitch(e) => paired_power = Some(e.turn_off().await),
                    _ => continue,
                }
            }
            self.publish_one(handle).await;
            if let Some(on) = paired_power {
                self.nudge_climate(topic, on).await;
            }
            return Ok(());
        }
        Err(EntityNotFound { topic: topic.to_string() })
    }

    pub async fn open_cover(&self, topic: &str) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Cover)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Cover(e) = &mut *entity {
                e.open().await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn close_cover(&self, topic: &str) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Cover)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Cover(e) = &mut *entity {
                e.close().await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn set_cover_position(&self, topic: &str, position: u8) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Cover)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Cover(e) = &mut *entity {
                e.set_position(position).await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn stop_cover(&self, topic: &str) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Cover)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Cover(e) = &mut *entity {
                e.stop().await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn set_fan_percentage(&self, topic: &str, percentage: u8) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Fan)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Fan(e) = &mut *entity {
                e.set_percentage(percentage).await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn set_fan_oscillating(&self, topic: &str, oscillating: bool) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Fan)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Fan(e) = &mut *entity {
                e.set_oscillating(oscillating).await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn set_hvac_mode(&self, topic: &str, mode: HvacMode) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Climate)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Climate(e) = &mut *entity {
                e.set_hvac_mode(mode).await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn set_target_temperature(&self, topic: &str, temperature: f64) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Climate)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Climate(e) = &mut *entity {
                e.set_target_temperature(temperature).await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    pub async fn set_climate_fan_mode(&self, topic: &str, fan_mode: FanMode) -> Result<(), EntityNotFound> {
        let handle = self.find(topic, EntityKind::Climate)?;
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Climate(e) = &mut *entity {
                e.set_fan_mode(fan_mode).await;
            }
        }
        self.publish_one(handle).await;
        Ok(())
    }

    /// Push the power switch's optimistic state into the paired climate
    /// entity and re-render it right away instead of waiting a poll.
    async fn nudge_climate(&self, topic: &str, on: bool) {
        let Ok(handle) = self.find(topic, EntityKind::Climate) else {
            return;
        };
        {
            let mut entity = handle.entity.lock().await;
            if let BemfaEntity::Climate(e) = &mut *entity {
                e.paired_power_changed(on);
            }
        }
        self.publish_one(handle).await;
    }
}

impl Drop for BemfaIntegration {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the entity registry from the first snapshot: one entity per
/// device per applicable capability. Per-device options come out of the
/// config here, once, and never get re-read.
fn build_entities(
    config: &BridgeConfig,
    coordinator: &Arc<Coordinator>,
    store: &Arc<EntityStore>,
    snapshot: &[DeviceRecord],
) -> Vec<EntityHandle> {
    let mut entities = Vec::new();
    let mut add = |entity: BemfaEntity| {
        entities.push(EntityHandle {
            topic: entity.topic().to_string(),
            unique_id: entity.unique_id().to_string(),
            kind: entity.kind(),
            entity: Arc::new(Mutex::new(entity)),
        });
    };

    for record in snapshot {
        match record.class {
            DeviceClass::Light => {
                add(BemfaEntity::Light(LightEntity::new(coordinator.clone(), record)));
            }
            DeviceClass::Switch | DeviceClass::Outlet => {
                add(BemfaEntity::Switch(SwitchEntity::new(coordinator.clone(), record)));
            }
            DeviceClass::Curtain => {
                add(BemfaEntity::Cover(CoverEntity::new(coordinator.clone(), record)));
            }
            DeviceClass::Fan => {
                let levels = config.fan_levels_for(&record.topic);
                add(BemfaEntity::Fan(FanEntity::new(coordinator.clone(), record, levels)));
            }
            DeviceClass::AirConditioner => {
                let sensor = config.climate_sensor_for(&record.topic).map(String::from);
                add(BemfaEntity::Climate(ClimateEntity::new(
                    coordinator.clone(),
                    record,
                    store.clone(),
                    sensor,
                )));
                add(BemfaEntity::AcSwitch(AcSwitchEntity::new(coordinator.clone(), record)));
            }
            DeviceClass::Sensor => {
                for kind in [SensorKind::Temperature, SensorKind::Humidity] {
                    // No reading at setup means no entity, ever
                    if kind.reading(&record.msg).is_some() {
                        add(BemfaEntity::Sensor(SensorEntity::new(
                            coordinator.clone(),
                            record,
                            kind,
                        )));
                    }
                }
            }
            DeviceClass::Unknown => {
                tracing::debug!(topic = %record.topic, "skipping device with unrecognized class");
            }
        }
    }

    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dead_endpoint, spawn_sequence};

    fn snapshot_body(devices: &str) -> String {
        format!(r#"{{"code": 0, "data": [{devices}], "msg": "ok"}}"#)
    }

    fn full_house(unix: i64) -> String {
        snapshot_body(&format!(
            r#"
            {{"topic": "light1", "id": "light", "name": "Lamp", "msg": {{"on": true}}, "unix": {unix}}},
            {{"topic": "plug1", "id": "outlet", "name": "Plug", "msg": {{"on": false}}, "unix": {unix}}},
            {{"topic": "curtain1", "id": "curtain", "name": "Blinds", "msg": {{"on": true, "position": 40}}, "unix": {unix}}},
            {{"topic": "fan002", "id": "fan", "name": "Fan", "msg": {{"on": true, "level": 2}}, "unix": {unix}}},
            {{"topic": "ac001", "id": "aircondition", "name": "AC", "msg": {{"on": false}}, "unix": {unix}}},
            {{"topic": "th001", "id": "sensor", "name": "Hall", "msg": {{"t": 22.5, "h": 60.0}}, "unix": {unix}, "unit": ["°C", "%"]}},
            {{"topic": "x1", "id": "doorbell", "name": "Door", "msg": {{}}, "unix": {unix}}}
            "#
        ))
    }

    async fn setup_from(responses: Vec<(&'static str, String)>) -> (
        Arc<BemfaIntegration>,
        Arc<EntityStore>,
        Arc<std::sync::Mutex<Vec<String>>>,
    ) {
        let (base, requests) = spawn_sequence(responses).await;
        let store = Arc::new(EntityStore::new(256));
        let client = BemfaClient::with_endpoints("user123", &base, &base);
        let integration =
            BemfaIntegration::setup_with_client(BridgeConfig::new("user123"), store.clone(), client)
                .await
                .unwrap();
        (integration, store, requests)
    }

    #[tokio::test]
    async fn test_setup_builds_entities_and_renders() {
        let now = Utc::now().timestamp();
        let (integration, store, _requests) =
            setup_from(vec![("200 OK", full_house(now))]).await;

        // light, outlet, cover, fan, climate + ac switch, two sensor
        // readings; the unrecognized class is skipped
        assert_eq!(integration.entities().len(), 8);

        assert_eq!(store.get("light.bemfa_light1").unwrap().state, "on");
        assert_eq!(store.get("switch.bemfa_plug1").unwrap().state, "off");
        assert_eq!(store.get("cover.bemfa_curtain1").unwrap().state, "open");
        assert_eq!(store.get("fan.bemfa_fan002").unwrap().state, "on");
        assert_eq!(store.get("climate.bemfa_ac001").unwrap().state, "off");
        assert_eq!(store.get("switch.bemfa_ac001_switch").unwrap().state, "off");
        assert_eq!(store.get("sensor.bemfa_th001_t").unwrap().state, "22.5");
        assert_eq!(store.get("sensor.bemfa_th001_h").unwrap().state, "60");
    }

    #[tokio::test]
    async fn test_setup_fails_when_first_refresh_fails() {
        let base = dead_endpoint().await;
        let store = Arc::new(EntityStore::new(16));
        let client = BemfaClient::with_endpoints("user123", &base, &base);
        let result =
            BemfaIntegration::setup_with_client(BridgeConfig::new("user123"), store, client).await;
        assert!(matches!(result, Err(SetupError::Refresh(_))));
    }

    #[tokio::test]
    async fn test_setup_rejects_invalid_config() {
        let base = dead_endpoint().await;
        let store = Arc::new(EntityStore::new(16));
        let client = BemfaClient::with_endpoints("user123", &base, &base);
        let mut config = BridgeConfig::new("user123");
        config.scan_interval_secs = 0;
        // Rejected at the boundary, before any network traffic
        let result = BemfaIntegration::setup_with_client(config, store, client).await;
        assert!(matches!(result, Err(SetupError::Config(_))));
    }

    #[tokio::test]
    async fn test_device_dropout_keeps_entity() {
        let now = Utc::now().timestamp();
        let light = snapshot_body(&format!(
            r#"{{"topic": "light1", "id": "light", "name": "Lamp", "msg": {{"on": true}}, "unix": {now}}}"#
        ));
        let empty = snapshot_body("");
        let (integration, store, _requests) =
            setup_from(vec![("200 OK", light), ("200 OK", empty)]).await;

        integration.refresh_now().await;

        // Entity survives the dropout; the retained record is still fresh
        // enough to stay available
        assert_eq!(integration.entities().len(), 1);
        assert_eq!(store.get("light.bemfa_light1").unwrap().state, "on");
    }

    #[tokio::test]
    async fn test_poll_failure_marks_entities_unavailable_but_keeps_snapshot() {
        let now = Utc::now().timestamp();
        let light = snapshot_body(&format!(
            r#"{{"topic": "light1", "id": "light", "name": "Lamp", "msg": {{"on": true}}, "unix": {now}}}"#
        ));
        let (integration, store, _requests) =
            setup_from(vec![("200 OK", light), ("500 Internal Server Error", "{}".to_string())]).await;

        integration.refresh_now().await;

        assert!(!integration.coordinator().last_success());
        // Previous snapshot retained, entity degraded not destroyed
        assert_eq!(integration.coordinator().snapshot().len(), 1);
        assert_eq!(store.get("light.bemfa_light1").unwrap().state, "unavailable");
    }

    #[tokio::test]
    async fn test_ac_switch_turn_on_sends_default_and_nudges_climate() {
        let now = Utc::now().timestamp();
        let ac = snapshot_body(&format!(
            r#"{{"topic": "ac001", "id": "aircondition", "name": "AC", "msg": {{"on": false}}, "unix": {now}}}"#
        ));
        let (integration, store, requests) = setup_from(vec![("200 OK", ac)]).await;
        assert_eq!(store.get("climate.bemfa_ac001").unwrap().state, "off");

        integration.turn_on("ac001").await.unwrap();

        let bodies = requests.lock().unwrap().join("\n");
        assert!(bodies.contains("msg=on#1#25#1&type=3"));

        // Both the switch and the paired climate entity re-render now,
        // not at the next poll
        assert_eq!(store.get("switch.bemfa_ac001_switch").unwrap().state, "on");
        assert_eq!(store.get("climate.bemfa_ac001").unwrap().state, "auto");
    }

    #[tokio::test]
    async fn test_cover_position_command_goes_over_the_wire() {
        let now = Utc::now().timestamp();
        let curtain = snapshot_body(&format!(
            r#"{{"topic": "curtain1", "id": "curtain", "name": "Blinds", "msg": {{"on": false}}, "unix": {now}}}"#
        ));
        let (integration, store, requests) = setup_from(vec![("200 OK", curtain)]).await;

        integration.set_cover_position("curtain1", 40).await.unwrap();

        let bodies = requests.lock().unwrap().join("\n");
        assert!(bodies.contains("msg=on#40&type=3"));

        let rendered = store.get("cover.bemfa_curtain1").unwrap();
        assert_eq!(rendered.state, "open");
        assert_eq!(
            rendered.attributes.get("current_position").and_then(|v| v.as_u64()),
            Some(40)
        );
    }

    #[tokio::test]
    async fn test_command_for_unknown_topic_is_rejected() {
        let now = Utc::now().timestamp();
        let light = snapshot_body(&format!(
            r#"{{"topic": "light1", "id": "light", "name": "Lamp", "msg": {{"on": true}}, "unix": {now}}}"#
        ));
        let (integration, _store, _requests) = setup_from(vec![("200 OK", light)]).await;

        assert!(integration.turn_on("nope").await.is_err());
        assert!(integration.set_cover_position("light1", 10).await.is_err());
    }
}
