//! Read-only temperature/humidity sensors.
//!
//! One entity per reading field present in the device's first message;
//! units ride on the record itself (`unit[0]` temperature, `unit[1]`
//! humidity). There is no command path.

use std::sync::Arc;

use serde_json::Value;

use crate::coordinator::Coordinator;
use crate::device::{DeviceMessage, DeviceRecord};

use super::{EntityContext, Rendered};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl SensorKind {
    /// The message field this kind reads.
    pub fn reading(self, msg: &DeviceMessage) -> Option<f64> {
        match self {
            SensorKind::Temperature => msg.t,
            SensorKind::Humidity => msg.h,
        }
    }

    /// Unique-id suffix, matching the wire field name.
    pub fn suffix(self) -> &'static str {
        match self {
            SensorKind::Temperature => "t",
            SensorKind::Humidity => "h",
        }
    }

    pub fn device_class(self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
        }
    }

    fn unit_index(self) -> usize {
        match self {
            SensorKind::Temperature => 0,
            SensorKind::Humidity => 1,
        }
    }
}

pub struct SensorEntity {
    pub(crate) ctx: EntityContext,
    kind: SensorKind,
    unit: Option<String>,
    value: Option<f64>,
}

impl SensorEntity {
    pub fn new(coordinator: Arc<Coordinator>, record: &DeviceRecord, kind: SensorKind) -> Self {
        let ctx = EntityContext::new(
            coordinator,
            record,
            format!("bemfa_{}_{}", record.topic, kind.suffix()),
            format!("{} {}", record.name, kind.device_class()),
        );
        let unit = record.unit.get(kind.unit_index()).cloned();
        let mut entity = Self { ctx, kind, unit, value: None };
        entity.handle_update(Some(record));
        entity
    }

    pub(crate) fn handle_update(&mut self, record: Option<&DeviceRecord>) {
        self.ctx.update_record(record);
        // A reading that vanishes from a message keeps its last value;
        // staleness handles a sensor that went quiet for good
        if let Some(value) = self.kind.reading(&self.ctx.record.msg) {
            self.value = Some(value);
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub(crate) fn render(&self) -> Rendered {
        let mut attributes = self.ctx.base_attrs();
        attributes.insert(
            "device_class".to_string(),
            Value::String(self.kind.device_class().to_string()),
        );
        if let Some(unit) = &self.unit {
            attributes.insert("unit_of_measurement".to_string(), Value::String(unit.clone()));
        }
        Rendered {
            entity_id: self.ctx.entity_id("sensor"),
            state: match self.value {
                Some(v) => format!("{v}"),
                None => "unknown".to_string(),
            },
            attributes,
        }
    }
}
