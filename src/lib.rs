//! Keeps a wake-up/blind controller's alarms and light threshold in sync with
//! its remote configuration store.

pub mod alarm;
pub mod device;
pub mod emulator;
pub mod error;
pub mod settings;
pub mod sync;

pub use alarm::{AlarmSet, NextAlarm, NextAlarmLabels, TimeValue, normalize};
pub use device::{DeviceConfig, DeviceId, SyncSnapshot};
pub use error::{Error, Result, SyncError, ValidationError};
pub use sync::{ConfigSyncClient, ConfigTransport, HttpTransport, SyncState};
