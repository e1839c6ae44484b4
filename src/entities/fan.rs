//! Fans with a configurable number of discrete speed levels (1-5).
//!
//! The cloud speaks levels, the host speaks percentages; the rescaling
//! rounds into level buckets. The level memory survives off-messages and
//! level-less messages so a fan never forgets its speed.

use std::sync::Arc;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::device::DeviceRecord;

use super::{EntityContext, Rendered};

pub struct FanEntity {
    pub(crate) ctx: EntityContext,
    speed_levels: u32,
    is_on: bool,
    /// Last known discrete level, kept while off for restore-on-turn-on.
    level: u32,
    oscillating: bool,
}

impl FanEntity {
    pub fn new(coordinator: Arc<Coordinator>, record: &DeviceRecord, speed_levels: u32) -> Self {
        let ctx = EntityContext::new(
            coordinator,
            record,
            format!("bemfa_{}", record.topic),
            record.name.clone(),
        );
        let mut entity = Self {
            ctx,
            speed_levels: speed_levels.max(1),
            is_on: false,
            level: 1,
            oscillating: false,
        };
        entity.handle_update(Some(record));
        entity
    }

    pub(crate) fn handle_update(&mut self, record: Option<&DeviceRecord>) {
        self.ctx.update_record(record);
        let msg = self.ctx.record.msg.clone();

        if let Some(on) = msg.on {
            self.is_on = on;
        }

        if self.is_on {
            self.level = match msg.level {
                // A running fan can't be at level 0
                Some(0) => 1,
                Some(level) => level.min(self.speed_levels),
                // Missing level keeps the previously derived one
                None => self.level.max(1),
            };
            if let Some(shake) = msg.shake {
                self.oscillating = shake == 1;
            }
        }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn oscillating(&self) -> bool {
        self.oscillating
    }

    pub fn speed_count(&self) -> u32 {
        self.speed_levels
    }

    /// Current speed as a percentage; 0 while off.
    pub fn percentage(&self) -> u8 {
        if self.is_on {
            self.level_to_percentage(self.level)
        } else {
            0
        }
    }

    pub fn level_to_percentage(&self, level: u32) -> u8 {
        if level == 0 {
            return 0;
        }
        let pct = (level as f64 * 100.0 / self.speed_levels as f64).round();
        pct.clamp(0.0, 100.0) as u8
    }

    pub fn percentage_to_level(&self, percentage: u8) -> u32 {
        if percentage == 0 {
            return 0;
        }
        let level = (percentage as f64 * self.speed_levels as f64 / 100.0).round() as u32;
        level.clamp(1, self.speed_levels)
    }

    fn speed_command(level: u32, oscillating: bool) -> String {
        format!("on#{}#{}", level, oscillating as u8)
    }

    /// Set the speed; 0 turns the fan off.
    pub async fn set_percentage(&mut self, percentage: u8) {
        let level = self.percentage_to_level(percentage);
        let cmd = if percentage == 0 {
            "off".to_string()
        } else {
            Self::speed_command(level, self.oscillating)
        };

        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, &cmd).await;

        if percentage == 0 {
            self.is_on = false;
        } else {
            self.is_on = true;
            self.level = level;
        }
        if !sent {
            tracing::error!(topic = %self.ctx.topic, percentage, "fan speed command not confirmed");
        }
    }

    /// Turn on, restoring the remembered speed or starting at the lowest
    /// level when there isn't one.
    pub async fn turn_on(&mut self, percentage: Option<u8>) {
        let target = match percentage {
            Some(p) => p,
            None => self.level_to_percentage(self.level.max(1)),
        };
        self.set_percentage(target).await;
    }

    pub async fn turn_off(&mut self) {
        self.set_percentage(0).await;
    }

    pub async fn set_oscillating(&mut self, oscillating: bool) {
        // A stopped fan has to spin before it can swing
        if !self.is_on {
            let lowest = self.level_to_percentage(1);
            self.set_percentage(lowest).await;
        }

        let cmd = Self::speed_command(self.level.max(1), oscillating);
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, &cmd).await;
        self.oscillating = oscillating;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, oscillating, "fan oscillation command not confirmed");
        }
    }

    pub(crate) fn render(&self) -> Rendered {
        let mut attributes = self.ctx.base_attrs();
        attributes.insert("percentage".to_string(), Value::from(self.percentage()));
        attributes.insert("oscillating".to_string(), Value::from(self.oscillating));
        attributes.insert(
            "percentage_step".to_string(),
            Value::from(100.0 / self.speed_levels as f64),
        );
        Rendered {
            entity_id: self.ctx.entity_id("fan"),
            state: if self.is_on { "on" } else { "off" }.to_string(),
            attributes,
        }
    }
}
