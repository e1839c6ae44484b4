//! On/off lights. The simplest mapper: one boolean, two command strings.

use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::device::DeviceRecord;

use super::{EntityContext, Rendered};

pub struct LightEntity {
    pub(crate) ctx: EntityContext,
    is_on: bool,
}

impl LightEntity {
    pub fn new(coordinator: Arc<Coordinator>, record: &DeviceRecord) -> Self {
        let ctx = EntityContext::new(
            coordinator,
            record,
            format!("bemfa_{}", record.topic),
            record.name.clone(),
        );
        let mut entity = Self { ctx, is_on: false };
        entity.handle_update(Some(record));
        entity
    }

    pub(crate) fn handle_update(&mut self, record: Option<&DeviceRecord>) {
        self.ctx.update_record(record);
        // Absent field means unchanged, not off
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
        // Optimistic, no rollback; the next poll reconciles
        self.is_on = on;
        if !sent {
            tracing::error!(topic = %self.ctx.topic, cmd = %cmd, "light command not confirmed");
        }
    }

    pub(crate) fn render(&self) -> Rendered {
        Rendered {
            entity_id: self.ctx.entity_id("light"),
            state: if self.is_on { "on" } else { "off" }.to_string(),
            attributes: self.ctx.base_attrs(),
        }
    }
}
