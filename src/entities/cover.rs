//! Curtains. Position is 0-100 open; a message without a position infers
//! fully open/closed from the on/off flag, and position 0 means closed
//! even while the motor reports on.

use std::sync::Arc;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::device::DeviceRecord;

use super::{EntityContext, Rendered};

pub struct CoverEntity {
    pub(crate) ctx: EntityContext,
    is_on: bool,
    position: u8,
}

impl CoverEntity {
    pub fn new(coordinator: Arc<Coordinator>, record: &DeviceRecord) -> Self {
        let ctx = EntityContext::new(
            coordinator,
            record,
            format!("bemfa_{}", record.topic),
            record.name.clone(),
        );
        let mut entity = Self { ctx, is_on: false, position: 0 };
        entity.handle_update(Some(record));
        entity
    }

    pub(crate) fn handle_update(&mut self, record: Option<&DeviceRecord>) {
        self.ctx.update_record(record);
        let msg = self.ctx.record.msg.clone();

        if let Some(on) = msg.on {
            self.is_on = on;
        }

        if !self.is_on {
            self.position = 0;
        } else {
            // Explicit position wins, including 0 (= closed); a missing
            // position on an open curtain means fully open
            self.position = match msg.position {
                Some(p) => p.min(100),
                None => 100,
            };
        }
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.position == 0
    }

    pub async fn open(&mut self) {
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, "on").await;
        self.is_on = true;
        self.position = 100;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, "cover open command not confirmed");
        }
    }

    pub async fn close(&mut self) {
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, "off").await;
        self.is_on = false;
        self.position = 0;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, "cover close command not confirmed");
        }
    }

    /// Wire encoding for a position move.
    fn position_command(position: u8) -> String {
        format!("on#{position}")
    }

    pub async fn set_position(&mut self, position: u8) {
        let position = position.min(100);
        let cmd = Self::position_command(position);
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, &cmd).await;
        self.is_on = true;
        self.position = position;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, position, "cover position command not confirmed");
        }
    }

    /// Stop wherever the curtain is; the position stays whatever we last
    /// knew until the next poll reports better.
    pub async fn stop(&mut self) {
        let sent = self.ctx.coordinator.send_command(&self.ctx.topic, "pause").await;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, "cover stop command not confirmed");
        }
    }

    pub(crate) fn render(&self) -> Rendered {
        let mut attributes = self.ctx.base_attrs();
        attributes.insert("device_class".to_string(), Value::String("curtain".to_string()));
        attributes.insert("current_position".to_string(), Value::from(self.position));
        Rendered {
            entity_id: self.ctx.entity_id("cover"),
            state: if self.is_closed() { "closed" } else { "open" }.to_string(),
            attributes,
        }
    }
}
