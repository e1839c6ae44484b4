//! Bemfa cloud bridge.
//!
//! Polls one Bemfa account's device list on a timer, maps each device
//! into typed host entities (lights, switches, covers, fans, climates,
//! sensors), and passes entity commands back through the same cloud API
//! as `#`-delimited command strings. The host embeds [`integration::BemfaIntegration`]
//! and reads rendered entities out of [`state::EntityStore`].

pub mod api;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod entities;
pub mod integration;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::{BemfaClient, UpdateFailed};
pub use entities::{FanMode, HvacMode};
pub use config::{load_config, BridgeConfig, ConfigError};
pub use coordinator::{Coordinator, CoordinatorEvent};
pub use device::{DeviceClass, DeviceMessage, DeviceRecord, Snapshot};
pub use integration::{BemfaIntegration, SetupError};
pub use state::{EntityState, EntityStore};
