use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Timelike;
use tracing::{debug, info, warn};

use crate::alarm::model::TimeValue;
use crate::alarm::scheduler::{NextAlarm, NextAlarmLabels};
use crate::device::{DeviceConfig, DeviceId, SyncSnapshot};
use crate::error::{Error, SyncError};
use crate::sync::transport::ConfigTransport;
use crate::sync::wire::{LogEntry, RemoteConfig};

/// Lifecycle of the configuration held by a [`ConfigSyncClient`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SyncState {
    Idle,
    Loading,
    Saving,
    /// `rolled_back` is set after a save the server never confirmed.
    Ready { rolled_back: bool },
}

#[derive(Debug, Default)]
struct SyncInner {
    current: Option<DeviceConfig>,
    snapshot: Option<SyncSnapshot>,
    stale: bool,
    rolled_back: bool,
}

/// Owns one device's configuration and keeps it in step with the remote copy.
///
/// Alarm edits are persisted as soon as they are made. The light threshold is
/// staged locally and only sent by [`ConfigSyncClient::save_threshold`]. At
/// most one save is in flight at a time; loads that finish after a newer load
/// or save was started are discarded.
pub struct ConfigSyncClient<T> {
    transport: T,
    device_id: DeviceId,
    inner: Mutex<SyncInner>,
    saving: AtomicBool,
    loads_in_flight: AtomicUsize,
    generation: AtomicU64,
}

struct SaveGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct LoadGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T: ConfigTransport> ConfigSyncClient<T> {
    pub fn new(transport: T, device_id: DeviceId) -> Self {
        Self {
            transport,
            device_id,
            inner: Mutex::new(SyncInner::default()),
            saving: AtomicBool::new(false),
            loads_in_flight: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> SyncState {
        if self.is_saving() {
            return SyncState::Saving;
        }
        let inner = self.lock();
        match inner.current {
            Some(_) => SyncState::Ready {
                rolled_back: inner.rolled_back,
            },
            None if self.loads_in_flight.load(Ordering::Acquire) > 0 => SyncState::Loading,
            None => SyncState::Idle,
        }
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Set when the last load failed; the data shown may be out of date.
    pub fn is_stale(&self) -> bool {
        self.lock().stale
    }

    pub fn current(&self) -> Option<DeviceConfig> {
        self.lock().current.clone()
    }

    pub fn snapshot(&self) -> Option<DeviceConfig> {
        self.lock()
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.config().clone())
    }

    pub fn has_changes(&self) -> bool {
        let inner = self.lock();
        match (&inner.current, &inner.snapshot) {
            (Some(current), Some(snapshot)) => snapshot.has_changes(current),
            _ => false,
        }
    }

    /// Fetches the remote configuration and replaces both the live copy and
    /// the snapshot. A failure leaves existing data in place, marked stale.
    pub async fn load(&self) -> Result<DeviceConfig, SyncError> {
        let ticket = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.loads_in_flight.fetch_add(1, Ordering::AcqRel);
        let _in_flight = LoadGuard {
            counter: &self.loads_in_flight,
        };
        debug!(device = %self.device_id, ticket, "loading configuration");

        let result = self.transport.fetch_config(&self.device_id).await;

        let mut inner = self.lock();
        if self.generation.load(Ordering::Acquire) != ticket {
            debug!(device = %self.device_id, ticket, "discarding superseded load");
            return Err(SyncError::Superseded);
        }
        match result {
            Ok(remote) => {
                let config = self.adopt(remote);
                inner.snapshot = Some(SyncSnapshot::new(config.clone()));
                inner.current = Some(config.clone());
                inner.stale = false;
                inner.rolled_back = false;
                info!(
                    device = %self.device_id,
                    alarms = config.alarms().len(),
                    threshold = config.light_threshold(),
                    "configuration loaded"
                );
                Ok(config)
            }
            Err(err) => {
                if inner.current.is_some() {
                    inner.stale = true;
                }
                warn!(device = %self.device_id, %err, "configuration load failed");
                Err(err)
            }
        }
    }

    /// Replaces the remote configuration with `config`. On success the
    /// server's copy becomes both snapshot and live config; on failure
    /// nothing local changes.
    pub async fn save(&self, config: DeviceConfig) -> Result<DeviceConfig, SyncError> {
        self.commit(config, false).await
    }

    /// Adds an alarm and persists it at once.
    pub async fn add_alarm(&self, input: &str) -> Result<DeviceConfig, Error> {
        let time = TimeValue::parse(input)?;
        let confirmed = self.confirmed()?;
        let alarms = confirmed.alarms().add(time)?;
        debug!(device = %self.device_id, alarm = %time, "adding alarm");
        Ok(self.commit(confirmed.with_alarms(alarms), true).await?)
    }

    /// Removes an alarm and persists the result. Removing an alarm that is
    /// not configured changes nothing and sends nothing.
    pub async fn remove_alarm(&self, input: &str) -> Result<DeviceConfig, Error> {
        let time = TimeValue::parse(input)?;
        let confirmed = self.confirmed()?;
        if !confirmed.alarms().contains(time) {
            debug!(device = %self.device_id, alarm = %time, "alarm not configured, nothing to remove");
            return self
                .current()
                .ok_or_else(|| SyncError::NotLoaded(self.device_id.to_string()).into());
        }
        let alarms = confirmed.alarms().remove(time);
        debug!(device = %self.device_id, alarm = %time, "removing alarm");
        Ok(self.commit(confirmed.with_alarms(alarms), true).await?)
    }

    /// Stages a threshold edit locally; see [`Self::save_threshold`].
    pub fn stage_threshold(&self, value: i64) -> Result<DeviceConfig, SyncError> {
        let mut inner = self.lock();
        let current = inner
            .current
            .as_ref()
            .ok_or_else(|| SyncError::NotLoaded(self.device_id.to_string()))?;
        let staged = current.with_threshold(value);
        inner.current = Some(staged.clone());
        Ok(staged)
    }

    /// Drops a staged threshold edit, returning to the confirmed value.
    pub fn discard_changes(&self) -> Option<DeviceConfig> {
        let mut inner = self.lock();
        let confirmed = inner.snapshot.as_ref()?.config().light_threshold();
        let reverted = inner
            .current
            .as_ref()?
            .with_threshold(i64::from(confirmed));
        inner.current = Some(reverted.clone());
        Some(reverted)
    }

    /// Persists the staged threshold together with the confirmed alarms.
    /// After a failure the staged value stays in place for a retry.
    pub async fn save_threshold(&self) -> Result<DeviceConfig, SyncError> {
        let (confirmed, staged) = {
            let inner = self.lock();
            let not_loaded = || SyncError::NotLoaded(self.device_id.to_string());
            let confirmed = inner.snapshot.as_ref().ok_or_else(not_loaded)?.config().clone();
            let staged = inner.current.as_ref().ok_or_else(not_loaded)?.light_threshold();
            (confirmed, staged)
        };
        self.commit(confirmed.with_threshold(i64::from(staged)), false)
            .await
    }

    /// Read-only device history.
    pub async fn fetch_logs(&self, limit: u32) -> Result<Vec<LogEntry>, SyncError> {
        self.transport.fetch_logs(&self.device_id, limit).await
    }

    pub fn next_alarm<N: Timelike>(&self, now: &N) -> NextAlarm {
        self.lock()
            .current
            .as_ref()
            .map_or(NextAlarm::None, |config| config.next_alarm(now))
    }

    pub fn next_alarm_description<N: Timelike>(&self, now: &N, labels: &NextAlarmLabels) -> String {
        self.next_alarm(now).describe(labels)
    }

    /// `keep_staged` preserves a staged threshold across an alarm save.
    async fn commit(
        &self,
        candidate: DeviceConfig,
        keep_staged: bool,
    ) -> Result<DeviceConfig, SyncError> {
        let _guard = self.begin_save()?;
        let update = candidate.to_update();
        debug!(
            device = %self.device_id,
            alarms = ?update.alarms,
            threshold = update.light_threshold,
            "saving configuration"
        );

        match self.transport.replace_config(&self.device_id, &update).await {
            Ok(remote) => {
                // Loads started before this save would bring back older data.
                self.generation.fetch_add(1, Ordering::AcqRel);
                let saved = self.adopt(remote);
                let mut inner = self.lock();
                let live = match (&inner.current, keep_staged) {
                    (Some(current), true) => {
                        saved.with_threshold(i64::from(current.light_threshold()))
                    }
                    _ => saved.clone(),
                };
                inner.snapshot = Some(SyncSnapshot::new(saved.clone()));
                inner.current = Some(live);
                inner.stale = false;
                inner.rolled_back = false;
                info!(device = %self.device_id, "configuration saved");
                Ok(saved)
            }
            Err(err) => {
                let mut inner = self.lock();
                if inner.current.is_some() {
                    inner.rolled_back = true;
                }
                warn!(device = %self.device_id, %err, "configuration save failed, keeping local edits");
                Err(err)
            }
        }
    }

    fn begin_save(&self) -> Result<SaveGuard<'_>, SyncError> {
        self.saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::SaveInProgress(self.device_id.to_string()))?;
        Ok(SaveGuard { flag: &self.saving })
    }

    fn confirmed(&self) -> Result<DeviceConfig, SyncError> {
        self.snapshot()
            .ok_or_else(|| SyncError::NotLoaded(self.device_id.to_string()))
    }

    fn adopt(&self, mut remote: RemoteConfig) -> DeviceConfig {
        if remote.device_id.is_empty() {
            remote.device_id = self.device_id.to_string();
        } else if remote.device_id != self.device_id.as_str() {
            warn!(
                expected = %self.device_id,
                received = %remote.device_id,
                "device API answered for a different device id"
            );
        }
        DeviceConfig::from_remote(remote)
    }

    fn lock(&self) -> MutexGuard<'_, SyncInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
