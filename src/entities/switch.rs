//! Switches: plain switches and outlets (same encoding as lights, they
//! only differ by device-class icon), plus the air-conditioner power
//! switch that pairs with a climate entity on the same topic.

use std::sync::Arc;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::device::{DeviceClass, DeviceRecord};

use super::{EntityContext, Rendered};

/// Fixed turn-on command for the AC power switch: auto mode, 25 °C, low
/// fan. Matches the climate entity's internal defaults.
pub const AC_DEFAULT_ON_COMMAND: &str = "on#1#25#1";

pub struct SwitchEntity {
    pub(crate) ctx: EntityContext,
    device_class: Option<&'static str>,
    is_on: bool,
}

impl SwitchEntity {
    pub fn new(coordinator: Arc<Coordinator>, record: &DeviceRecord) -> Self {
        let device_class = match record.class {
            DeviceClass::Outlet => Some("outlet"),
            _ => None,
        };
        let ctx = EntityContext::new(
            coordinator,
            record,
            format!("bemfa_{}", record.topic),
            record.name.clone(),
        );
        let mut entity = Self { ctx, device_class, is_on: false };
        entity.handle_update(Some(record));
        entity
    }

    pub(crate) fn handle_update(&mut self, record: Option<&DeviceRecord>) {
        self.ctx.update_record(record);
        if let Some(on) = self.ctx.record.msg.on {
            self.is_on = on;
        }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub async fn turn_on(&mut self) {
        self.command(true).await;
    }

    pub async fn turn_off(&mut self) {
        self.command(false).await;
    }

    async fn command(&mut self, on: bool) {
        let cmd = if on { "on" } else { "off" };
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, cmd).await;
        self.is_on = on;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, cmd = %cmd, "switch command not confirmed");
        }
    }

    pub(crate) fn render(&self) -> Rendered {
        let mut attributes = self.ctx.base_attrs();
        if let Some(device_class) = self.device_class {
            attributes.insert("device_class".to_string(), Value::String(device_class.to_string()));
        }
        Rendered {
            entity_id: self.ctx.entity_id("switch"),
            state: if self.is_on { "on" } else { "off" }.to_string(),
            attributes,
        }
    }
}

/// Power switch for an air conditioner. Turn-on always sends the fixed
/// default command regardless of prior state; both directions tell the
/// paired climate entity to recompute immediately.
pub struct AcSwitchEntity {
    pub(crate) ctx: EntityContext,
    is_on: bool,
}

impl AcSwitchEntity {
    pub fn new(coordinator: Arc<Coordinator>, record: &DeviceRecord) -> Self {
        let ctx = EntityContext::new(
            coordinator,
            record,
            format!("bemfa_{}_switch", record.topic),
            format!("{} switch", record.name),
        );
        let mut entity = Self { ctx, is_on: false };
        entity.handle_update(Some(record));
        entity
    }

    pub(crate) fn handle_update(&mut self, record: Option<&DeviceRecord>) {
        self.ctx.update_record(record);
        if let Some(on) = self.ctx.record.msg.on {
            self.is_on = on;
        }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    /// Send the fixed on-command. Returns the new power state for the
    /// caller to push into the paired climate entity.
    pub async fn turn_on(&mut self) -> bool {
        let sent = self
            .ctx
            .coordinator
            .send_command(&self.ctx.topic, AC_DEFAULT_ON_COMMAND)
            .await;
        self.is_on = true;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, "air conditioner on-command not confirmed");
        }
        true
    }

    pub async fn turn_off(&mut self) -> bool {
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, "off").await;
        self.is_on = false;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, "air conditioner off-command not confirmed");
        }
        false
    }

    pub(crate) fn render(&self) -> Rendered {
        Rendered {
            entity_id: self.ctx.entity_id("switch"),
            state: if self.is_on { "on" } else { "off" }.to_string(),
            attributes: self.ctx.base_attrs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceMessage;
    use crate::entities::test_support::{offline_coordinator, record};

    #[test]
    fn test_outlet_gets_device_class_only() {
        let on = DeviceMessage { on: Some(true), ..Default::default() };
        let outlet = SwitchEntity::new(
            offline_coordinator(),
            &record("plug1", DeviceClass::Outlet, on.clone()),
        );
        let switch = SwitchEntity::new(
            offline_coordinator(),
            &record("sw1", DeviceClass::Switch, on),
        );

        let rendered = outlet.render();
        assert_eq!(
            rendered.attributes.get("device_class").and_then(|v| v.as_str()),
            Some("outlet")
        );
        assert_eq!(rendered.state, "on");

        // Same encoding and state mapping, no device class
        assert!(switch.render().attributes.get("device_class").is_none());
        assert_eq!(switch.render().state, "on");
    }

    #[tokio::test]
    async fn test_switch_optimistic_on_off() {
        let mut entity = SwitchEntity::new(
            offline_coordinator(),
            &record("sw1", DeviceClass::Switch, DeviceMessage::default()),
        );
        entity.turn_on().await;
        assert!(entity.is_on());
        entity.turn_off().await;
        assert!(!entity.is_on());
    }

    #[test]
    fn test_ac_switch_identity() {
        let entity = AcSwitchEntity::new(
            offline_coordinator(),
            &record("ac001", DeviceClass::AirConditioner, DeviceMessage::default()),
        );
        assert_eq!(entity.ctx.unique_id, "bemfa_ac001_switch");
        assert_eq!(entity.render().entity_id, "switch.bemfa_ac001_switch");
    }

    #[tokio::test]
    async fn test_ac_switch_turn_on_sends_fixed_default() {
        // Regardless of prior state, on is always auto/25/low
        let msg = DeviceMessage { on: Some(true), ..Default::default() };
        let mut entity = AcSwitchEntity::new(
            offline_coordinator(),
            &record("ac001", DeviceClass::AirConditioner, msg),
        );
        assert_eq!(AC_DEFAULT_ON_COMMAND, "on#1#25#1");
        assert!(entity.turn_on().await);
        assert!(entity.is_on());

        assert!(!entity.turn_off().await);
        assert!(!entity.is_on());
    }
}
