//! Device records as the Bemfa cloud reports them.
//!
//! One poll returns the full list of devices on the account; the list is
//! replaced wholesale, never merged record-by-record. `topic` is the only
//! stable key; list order changes between polls.

use std::sync::Arc;

use serde::Deserialize;

/// The full device list from one successful poll.
pub type Snapshot = Arc<Vec<DeviceRecord>>;

/// Device category, from the wire field `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Light,
    #[serde(rename = "aircondition")]
    AirConditioner,
    Fan,
    Curtain,
    Sensor,
    Outlet,
    Switch,
    /// Anything this bridge doesn't model. Never fails a poll.
    #[serde(other)]
    Unknown,
}

/// One device on the account, fresh from a poll.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    /// Stable key, unique within an account.
    pub topic: String,
    #[serde(rename = "id", default = "DeviceClass::unknown")]
    pub class: DeviceClass,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub msg: DeviceMessage,
    /// Epoch seconds of the last remote-reported change.
    #[serde(default)]
    pub unix: i64,
    /// Sensor units: `unit[0]` temperature, `unit[1]` humidity.
    #[serde(default)]
    pub unit: Vec<String>,
}

impl DeviceClass {
    fn unknown() -> Self {
        DeviceClass::Unknown
    }
}

/// The per-device message blob. Which fields are present depends on the
/// device class, and any field may be missing from any given poll.
/// Absence means "unchanged", not "default".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceMessage {
    #[serde(default)]
    pub on: Option<bool>,
    /// Climate mode code (1-7).
    #[serde(default)]
    pub mode: Option<u8>,
    /// Temperature: target for climate, reading for sensors.
    #[serde(default)]
    pub t: Option<f64>,
    /// Fan speed step (fan) or fan speed code 1-3 (climate).
    #[serde(default)]
    pub level: Option<u32>,
    /// Curtain position, 0-100.
    #[serde(default)]
    pub position: Option<u8>,
    /// Oscillation flag, 0/1.
    #[serde(default)]
    pub shake: Option<u8>,
    /// Humidity reading for sensors.
    #[serde(default)]
    pub h: Option<f64>,
}

/// Find a device in a snapshot by its topic.
pub fn find_record<'a>(snapshot: &'a [DeviceRecord], topic: &str) -> Option<&'a DeviceRecord> {
    snapshot.iter().find(|r| r.topic == topic)
}
