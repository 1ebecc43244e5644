use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::model::AlarmSet;
use crate::alarm::scheduler::{NextAlarm, NextAlarmLabels};
use crate::sync::wire::{ConfigUpdate, RemoteConfig};

pub const MIN_LIGHT_THRESHOLD: u16 = 0;
pub const MAX_LIGHT_THRESHOLD: u16 = 4095;

/// Opaque identity assigned to the device by its backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Clamps a raw reading into the ADC range the device understands.
pub fn clamp_threshold(value: i64) -> u16 {
    value.clamp(i64::from(MIN_LIGHT_THRESHOLD), i64::from(MAX_LIGHT_THRESHOLD)) as u16
}

/// Alarms and light threshold of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    device_id: DeviceId,
    alarms: AlarmSet,
    light_threshold: u16,
    updated_at: Option<DateTime<Utc>>,
}

impl DeviceConfig {
    pub fn new(device_id: DeviceId, alarms: AlarmSet, light_threshold: i64) -> Self {
        Self {
            device_id,
            alarms,
            light_threshold: clamp_threshold(light_threshold),
            updated_at: None,
        }
    }

    /// Converts the API payload, repairing what the device would reject.
    pub fn from_remote(remote: RemoteConfig) -> Self {
        Self {
            device_id: DeviceId::new(remote.device_id),
            alarms: AlarmSet::from_wire(remote.alarms.as_slice()),
            light_threshold: clamp_threshold(remote.light_threshold),
            updated_at: remote.updated_at,
        }
    }

    pub fn to_update(&self) -> ConfigUpdate {
        ConfigUpdate {
            alarms: self.alarms.to_wire(),
            light_threshold: i64::from(self.light_threshold),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn alarms(&self) -> &AlarmSet {
        &self.alarms
    }

    pub fn light_threshold(&self) -> u16 {
        self.light_threshold
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Out-of-range values are clamped, never rejected.
    pub fn with_threshold(&self, value: i64) -> DeviceConfig {
        DeviceConfig {
            light_threshold: clamp_threshold(value),
            ..self.clone()
        }
    }

    pub fn with_alarms(&self, alarms: AlarmSet) -> DeviceConfig {
        DeviceConfig {
            alarms,
            ..self.clone()
        }
    }

    pub fn next_alarm<T: Timelike>(&self, now: &T) -> NextAlarm {
        self.alarms.next_at(now)
    }

    pub fn next_alarm_description<T: Timelike>(&self, now: &T) -> String {
        self.next_alarm_description_with(now, &NextAlarmLabels::default())
    }

    pub fn next_alarm_description_with<T: Timelike>(
        &self,
        now: &T,
        labels: &NextAlarmLabels,
    ) -> String {
        self.next_alarm(now).describe(labels)
    }
}

/// Last configuration confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    config: DeviceConfig,
}

impl SyncSnapshot {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Alarms are saved on every edit, so only the threshold can diverge.
    pub fn has_changes(&self, current: &DeviceConfig) -> bool {
        current.light_threshold != self.config.light_threshold
    }
}
