//! In-process stand-in for the device backend, serving the same REST routes.
//!
//! Used by the integration tests and by `blindsync emulate` when no real
//! backend is around.

use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, warn};

use crate::alarm::model::TimeValue;
use crate::device::MAX_LIGHT_THRESHOLD;
use crate::sync::wire::{
    ConfigUpdate, DEFAULT_LIGHT_THRESHOLD, DEFAULT_LOG_LIMIT, Envelope, LogEntry, RemoteConfig,
};

#[derive(Debug, Default)]
pub struct EmulatorState {
    configs: HashMap<String, RemoteConfig>,
    logs: HashMap<String, Vec<LogEntry>>,
    failures_remaining: u32,
    response_delay: Duration,
    total_requests: u64,
}

impl EmulatorState {
    pub fn config(&self, device_id: &str) -> Option<&RemoteConfig> {
        self.configs.get(device_id)
    }

    pub fn put_config(&mut self, config: RemoteConfig) {
        self.configs.insert(config.device_id.clone(), config);
    }

    /// Appends history rows, oldest first.
    pub fn push_logs(&mut self, device_id: &str, entries: impl IntoIterator<Item = LogEntry>) {
        self.logs
            .entry(device_id.to_string())
            .or_default()
            .extend(entries);
    }

    /// The next `count` requests are answered with HTTP 503.
    pub fn fail_next(&mut self, count: u32) {
        self.failures_remaining = count;
    }

    pub fn set_response_delay(&mut self, delay: Duration) {
        self.response_delay = delay;
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    fn config_or_default(&mut self, device_id: &str) -> RemoteConfig {
        self.configs
            .entry(device_id.to_string())
            .or_insert_with(|| RemoteConfig {
                alarms: Vec::new(),
                light_threshold: DEFAULT_LIGHT_THRESHOLD,
                device_id: device_id.to_string(),
                updated_at: Some(Utc::now()),
            })
            .clone()
    }

    fn recent_logs(&self, device_id: &str, limit: usize) -> Vec<LogEntry> {
        self.logs
            .get(device_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

pub struct DeviceEmulator {
    pub state: Arc<Mutex<EmulatorState>>,
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl DeviceEmulator {
    /// Binds and starts serving on a background thread. Port 0 picks a free port.
    pub fn start(config: EmulatorConfig) -> Result<Self> {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow!("failed to start device emulator on {bind}: {err}"))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| anyhow!("device emulator is not listening on an IP address"))?;
        let state = Arc::new(Mutex::new(EmulatorState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let state_for_thread = Arc::clone(&state);
        let stop_for_thread = Arc::clone(&stop);
        let http_join =
            thread::spawn(move || run_server_loop(server, state_for_thread, stop_for_thread));

        Ok(Self {
            state,
            addr,
            stop,
            http_join: Some(http_join),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn lock_state(&self) -> MutexGuard<'_, EmulatorState> {
        lock(&self.state)
    }

    /// Blocks until the process is interrupted.
    pub fn wait(mut self) {
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for DeviceEmulator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn lock(state: &Mutex<EmulatorState>) -> MutexGuard<'_, EmulatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_server_loop(server: Server, state: Arc<Mutex<EmulatorState>>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => {
                if let Err(err) = handle_request(request, &state) {
                    warn!(%err, "device emulator failed to answer");
                }
            }
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
}

enum Route<'a> {
    Config(&'a str),
    Logs(&'a str),
}

fn route(path: &str) -> Option<Route<'_>> {
    let rest = path.strip_prefix("/api/")?;
    let (resource, device_id) = rest.split_once('/')?;
    if device_id.is_empty() || device_id.contains('/') {
        return None;
    }
    match resource {
        "config" => Some(Route::Config(device_id)),
        "logs" => Some(Route::Logs(device_id)),
        _ => None,
    }
}

fn handle_request(mut request: tiny_http::Request, state: &Arc<Mutex<EmulatorState>>) -> Result<()> {
    let url = request.url().to_string();
    let method = request.method().clone();
    debug!(%method, %url, "device emulator request");

    let (delay, inject_failure) = {
        let mut guard = lock(state);
        guard.total_requests += 1;
        let inject_failure = guard.failures_remaining > 0;
        if inject_failure {
            guard.failures_remaining -= 1;
        }
        (guard.response_delay, inject_failure)
    };
    if !delay.is_zero() {
        thread::sleep(delay);
    }
    if inject_failure {
        return send_failure(request, StatusCode(503), "device emulator: injected failure");
    }

    let (path, query) = split_path_query(&url);
    match (route(path), &method) {
        (Some(Route::Config(device_id)), Method::Get) => {
            let config = lock(state).config_or_default(device_id);
            send_json(request, StatusCode(200), &Envelope::ok(config))
        }
        (Some(Route::Config(device_id)), Method::Put) => {
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body)?;
            let update = match serde_json::from_str::<ConfigUpdate>(&body) {
                Ok(update) => update,
                Err(err) => {
                    return send_failure(request, StatusCode(400), &format!("invalid body: {err}"));
                }
            };
            if let Err(message) = validate_update(&update) {
                return send_failure(request, StatusCode(400), &message);
            }
            let stored = RemoteConfig {
                alarms: update.alarms,
                light_threshold: update.light_threshold,
                device_id: device_id.to_string(),
                updated_at: Some(Utc::now()),
            };
            lock(state).put_config(stored.clone());
            send_json(request, StatusCode(200), &Envelope::ok(stored))
        }
        (Some(Route::Logs(device_id)), Method::Get) => {
            let limit = query_param(query, "limit")
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(DEFAULT_LOG_LIMIT as usize);
            let logs = lock(state).recent_logs(device_id, limit);
            send_json(request, StatusCode(200), &Envelope::ok(logs))
        }
        (Some(_), _) => send_failure(request, StatusCode(405), "method not allowed"),
        (None, _) => send_failure(request, StatusCode(404), "not found"),
    }
}

fn validate_update(update: &ConfigUpdate) -> Result<(), String> {
    for alarm in &update.alarms {
        let time = TimeValue::parse(alarm).map_err(|err| err.to_string())?;
        if time.to_string() != *alarm {
            return Err(format!("alarm '{alarm}' is not in canonical HH:MM form"));
        }
    }
    if !(0..=i64::from(MAX_LIGHT_THRESHOLD)).contains(&update.light_threshold) {
        return Err(format!(
            "lightThreshold {} outside 0..={MAX_LIGHT_THRESHOLD}",
            update.light_threshold
        ));
    }
    Ok(())
}

fn send_failure(request: tiny_http::Request, status: StatusCode, message: &str) -> Result<()> {
    send_json(request, status, &Envelope::<()>::failure(message))
}

fn send_json<T: Serialize>(request: tiny_http::Request, status: StatusCode, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        if k == key {
            return Some(v);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_config_and_logs_paths() {
        assert!(matches!(route("/api/config/d1"), Some(Route::Config("d1"))));
        assert!(matches!(route("/api/logs/d1"), Some(Route::Logs("d1"))));
        assert!(route("/api/config/").is_none());
        assert!(route("/api/config/a/b").is_none());
        assert!(route("/api/other/d1").is_none());
        assert!(route("/healthz").is_none());
    }

    #[test]
    fn query_param_extracts_value() {
        let query = "limit=10&foo=bar";
        assert_eq!(query_param(query, "limit"), Some("10"));
        assert_eq!(query_param(query, "missing"), None);
        assert_eq!(split_path_query("/api/logs/d1?limit=5"), ("/api/logs/d1", "limit=5"));
    }

    #[test]
    fn update_validation_matches_device_rules() {
        let ok = ConfigUpdate {
            alarms: vec!["07:30".into()],
            light_threshold: 4095,
        };
        assert!(validate_update(&ok).is_ok());

        let padded = ConfigUpdate {
            alarms: vec!["7:30".into()],
            light_threshold: 300,
        };
        assert!(validate_update(&padded).is_err());

        let high = ConfigUpdate {
            alarms: Vec::new(),
            light_threshold: 4096,
        };
        assert!(validate_update(&high).is_err());
    }

    #[test]
    fn recent_logs_are_newest_first_and_limited() {
        let mut state = EmulatorState::default();
        let base = Utc::now();
        state.push_logs(
            "d1",
            (0..5).map(|i| LogEntry {
                timestamp: base + chrono::Duration::minutes(i),
                light: i * 100,
                alarm_triggered: false,
                servo_opened: false,
            }),
        );
        let logs = state.recent_logs("d1", 2);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].light, 400);
        assert_eq!(logs[1].light, 300);
        assert!(state.recent_logs("unknown", 10).is_empty());
    }

    #[test]
    fn unknown_device_gets_default_config() {
        let mut state = EmulatorState::default();
        let config = state.config_or_default("novo");
        assert_eq!(config.light_threshold, DEFAULT_LIGHT_THRESHOLD);
        assert!(config.alarms.is_empty());
        assert!(state.config("novo").is_some());
    }
}
