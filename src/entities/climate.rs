//! Air conditioners.
//!
//! The cloud speaks a tri-state command (`on#<mode>#<temp>#<fan>`), and it
//! does not echo every field back on every poll, so the entity keeps its
//! own mode/target/fan memory and merges fields over it. The current room
//! temperature comes from an optional linked sensor entity in the host
//! store; the device itself never reports one.

use std::sync::Arc;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::device::DeviceRecord;
use crate::state::EntityStore;

use super::{EntityContext, Rendered};

pub const MIN_TEMP: i64 = 16;
pub const MAX_TEMP: i64 = 32;

const DEFAULT_TARGET_TEMP: i64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacMode {
    Off,
    Auto,
    Cool,
    Heat,
    FanOnly,
    Dry,
}

impl HvacMode {
    /// Codes 6 and 7 are aliases the vendor app emits for fan-only and
    /// auto; anything unrecognized lands on auto.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 | 7 => HvacMode::Auto,
            2 => HvacMode::Cool,
            3 => HvacMode::Heat,
            4 | 6 => HvacMode::FanOnly,
            5 => HvacMode::Dry,
            _ => {
                tracing::warn!(code, "unknown hvac mode code, defaulting to auto");
                HvacMode::Auto
            }
        }
    }

    pub fn to_code(self) -> u8 {
        match self {
            HvacMode::Off => 0,
            HvacMode::Auto => 1,
            HvacMode::Cool => 2,
            HvacMode::Heat => 3,
            HvacMode::FanOnly => 4,
            HvacMode::Dry => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Auto => "auto",
            HvacMode::Cool => "cool",
            HvacMode::Heat => "heat",
            HvacMode::FanOnly => "fan_only",
            HvacMode::Dry => "dry",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    Low,
    Medium,
    High,
}

impl FanMode {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => FanMode::Low,
            2 => FanMode::Medium,
            3 => FanMode::High,
            _ => {
                tracing::warn!(code, "unknown fan speed code, defaulting to low");
                FanMode::Low
            }
        }
    }

    pub fn to_code(self) -> u32 {
        match self {
            FanMode::Low => 1,
            FanMode::Medium => 2,
            FanMode::High => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FanMode::Low => "low",
            FanMode::Medium => "medium",
            FanMode::High => "high",
        }
    }
}

pub struct ClimateEntity {
    pub(crate) ctx: EntityContext,
    store: Arc<EntityStore>,
    /// Linked current-temperature sensor, resolved once from config.
    sensor_entity_id: Option<String>,
    /// Power state as last reported (or optimistically commanded).
    api_on: bool,
    /// Mode/target/fan memory: preserved across off and across messages
    /// that omit them.
    mode: HvacMode,
    target_temp: i64,
    fan_mode: FanMode,
}

impl ClimateEntity {
    pub fn new(
        coordinator: Arc<Coordinator>,
        record: &DeviceRecord,
        store: Arc<EntityStore>,
        sensor_entity_id: Option<String>,
    ) -> Self {
        let ctx = EntityContext::new(
            coordinator,
            record,
            format!("bemfa_{}", record.topic),
            record.name.clone(),
        );
        let mut entity = Self {
            ctx,
            store,
            sensor_entity_id,
            api_on: false,
            mode: HvacMode::Off,
            target_temp: DEFAULT_TARGET_TEMP,
            fan_mode: FanMode::Low,
        };
        entity.handle_update(Some(record));
        entity
    }

    pub(crate) fn handle_update(&mut self, record: Option<&DeviceRecord>) {
        self.ctx.update_record(record);
        let msg = self.ctx.record.msg.clone();

        if let Some(on) = msg.on {
            self.api_on = on;
        }

        // mode/t/level only mean anything while the unit is on; while off
        // the memory rides along untouched for the next on-command
        if self.api_on {
            if let Some(code) = msg.mode {
                self.mode = HvacMode::from_code(code);
            }
            if let Some(t) = msg.t {
                self.target_temp = t as i64;
            }
            if let Some(level) = msg.level {
                self.fan_mode = FanMode::from_code(level);
            }
        }
    }

    /// Displayed HVAC mode: off wins over whatever the memory says.
    pub fn hvac_mode(&self) -> HvacMode {
        if self.api_on {
            self.mode
        } else {
            HvacMode::Off
        }
    }

    pub fn target_temperature(&self) -> i64 {
        self.target_temp
    }

    /// Displayed fan mode; cleared while off, preserved internally.
    pub fn fan_mode(&self) -> Option<FanMode> {
        if self.api_on {
            Some(self.fan_mode)
        } else {
            None
        }
    }

    /// Room temperature from the linked sensor, falling back to the
    /// target when the sensor is absent, unavailable, or non-numeric.
    /// Cleared entirely while the unit is off.
    pub fn current_temperature(&self) -> Option<f64> {
        if !self.api_on {
            return None;
        }
        let from_sensor = self
            .sensor_entity_id
            .as_deref()
            .and_then(|id| self.store.numeric_state(id));
        Some(from_sensor.unwrap_or(self.target_temp as f64))
    }

    /// Encode the full command from internal memory. The whole tri-state
    /// rides on every on-command; off is just "off".
    fn command_string(&mut self) -> String {
        if self.mode == HvacMode::Off {
            return "off".to_string();
        }
        self.target_temp = self.target_temp.clamp(MIN_TEMP, MAX_TEMP);
        format!(
            "on#{}#{}#{}",
            self.mode.to_code(),
            self.target_temp,
            self.fan_mode.to_code()
        )
    }

    async fn send(&mut self) {
        let cmd = self.command_string();
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, &cmd).await;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, cmd = %cmd, "climate command not confirmed");
        }
    }

    /// Set the HVAC mode; off here is the power switch.
    pub async fn set_hvac_mode(&mut self, mode: HvacMode) {
        self.mode = mode;
        self.api_on = mode != HvacMode::Off;
        self.send().await;
    }

    pub async fn set_target_temperature(&mut self, temperature: f64) {
        let clamped = (temperature as i64).clamp(MIN_TEMP, MAX_TEMP);
        if clamped != temperature as i64 {
            tracing::warn!(
                topic = %self.ctx.topic,
                requested = temperature,
                clamped,
                "target temperature out of range, clamped"
            );
        }
        self.target_temp = clamped;
        self.send().await;
    }

    pub async fn set_fan_mode(&mut self, fan_mode: FanMode) {
        self.fan_mode = fan_mode;
        self.send().await;
    }

    /// Called when the paired power switch flips this topic out-of-band.
    /// On restores the stored mode, defaulting to auto since the switch's
    /// fixed command starts the unit in auto; off forces HVAC off and clears
    /// the room temperature while the memory stays put.
    pub(crate) fn paired_power_changed(&mut self, on: bool) {
        self.api_on = on;
        if on && self.mode == HvacMode::Off {
            self.mode = HvacMode::Auto;
        }
    }

    pub(crate) fn render(&self) -> Rendered {
        let mut attributes = self.ctx.base_attrs();
        attributes.insert("temperature".to_string(), Value::from(self.target_temp));
        attributes.insert(
            "current_temperature".to_string(),
            self.current_temperature().map(Value::from).unwrap_or(Value::Null),
        );
        attributes.insert(
            "fan_mode".to_string(),
            self.fan_mode()
                .map(|f| Value::String(f.as_str().to_string()))
                .unwrap_or(Value::Null),
        );
        attributes.insert("min_temp".to_string(), Value::from(MIN_TEMP));
        attributes.insert("max_temp".to_string(), Value::from(MAX_TEMP));
        Rendered {
            entity_id: self.ctx.entity_id("climate"),
            state: self.hvac_mode().as_str().to_string(),
            attributes,
        }
    }
}
