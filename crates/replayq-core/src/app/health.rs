//! HealthSupervisor - 依存サービスの死活監視
//!
//! 依存ごとの状態: `Unknown → {Up, Down}`。起動時は常に Unknown で、永続化しない。
//! 1 サイクルで全 probe を実行し、1 つでも Down ならアラートを 1 回送る。
//! Down が続く限りサイクルごとに送る（重複排除はしない）。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::periodic::PeriodicTask;
use crate::ports::{AlertSink, JobStore};
use crate::queue::JobQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyState {
    Unknown,
    Up,
    Down,
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DependencyState::Unknown => "UNKNOWN",
            DependencyState::Up => "UP",
            DependencyState::Down => "DOWN",
        })
    }
}

/// One dependency check.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries a short reason for the alert text.
    async fn check(&self) -> Result<(), String>;
}

/// Native round-trip of a store-type dependency.
#[async_trait]
pub trait Ping: Send + Sync {
    async fn ping(&self) -> Result<(), String>;
}

#[async_trait]
impl Ping for dyn JobStore {
    async fn ping(&self) -> Result<(), String> {
        JobStore::ping(self).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Ping for dyn JobQueue {
    async fn ping(&self) -> Result<(), String> {
        JobQueue::ping(self).await.map_err(|e| e.to_string())
    }
}

/// Probe over anything implementing `Ping` (job store, queue broker).
pub struct PingProbe<T: ?Sized> {
    name: String,
    target: Arc<T>,
}

impl<T: ?Sized + Ping> PingProbe<T> {
    pub fn new(name: impl Into<String>, target: Arc<T>) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }
}

#[async_trait]
impl<T: ?Sized + Ping> Probe for PingProbe<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), String> {
        self.target.ping().await
    }
}

/// `GET <url>` expecting 200 and a recognised healthy body.
pub struct HttpProbe {
    name: String,
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_client(name, url, Client::new())
    }

    pub fn with_client(name: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
            url: url.into(),
        }
    }
}

/// `ok` (any case), or a JSON object whose `status` is `ok`, `healthy` or `up`.
pub fn is_healthy_body(body: &str) -> bool {
    let trimmed = body.trim();
    if trimmed.eq_ignore_ascii_case("ok") {
        return true;
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_ascii_lowercase))
        .is_some_and(|s| matches!(s.as_str(), "ok" | "healthy" | "up"))
}

#[async_trait]
impl Probe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(format!("status {}", status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| format!("unreadable body: {e}"))?;
        if !is_healthy_body(&body) {
            return Err("unrecognized health body".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub state: DependencyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub dependencies: Vec<DependencyHealth>,
    pub alert_fired: bool,
}

impl HealthReport {
    pub fn state(&self, name: &str) -> Option<DependencyState> {
        self.dependencies
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.state)
    }

    pub fn down(&self) -> impl Iterator<Item = &DependencyHealth> {
        self.dependencies
            .iter()
            .filter(|d| d.state == DependencyState::Down)
    }

    pub fn any_down(&self) -> bool {
        self.down().next().is_some()
    }
}

pub struct HealthSupervisor {
    probes: Vec<Arc<dyn Probe>>,
    alerts: Arc<dyn AlertSink>,
    timeout: Duration,
    states: Mutex<HashMap<String, DependencyState>>,
}

impl HealthSupervisor {
    pub fn new(alerts: Arc<dyn AlertSink>, timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            alerts,
            timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        if let Ok(mut states) = self.states.lock() {
            states.insert(probe.name().to_string(), DependencyState::Unknown);
        }
        self.probes.push(probe);
        self
    }

    /// Current state per dependency.
    pub fn states(&self) -> HashMap<String, DependencyState> {
        self.states
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Probe every dependency once, update states, alert if anything is down.
    pub async fn run_cycle(&self) -> HealthReport {
        let mut dependencies = Vec::with_capacity(self.probes.len());

        for probe in &self.probes {
            let outcome = match tokio::time::timeout(self.timeout, probe.check()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(reason),
                Err(_) => Err(format!("no answer within {}s", self.timeout.as_secs())),
            };
            let (state, detail) = match outcome {
                Ok(()) => (DependencyState::Up, None),
                Err(reason) => (DependencyState::Down, Some(reason)),
            };

            let previous = self.record(probe.name(), state);
            match (previous, state) {
                (DependencyState::Up | DependencyState::Unknown, DependencyState::Down) => warn!(
                    dependency = probe.name(),
                    from = %previous,
                    reason = detail.as_deref().unwrap_or(""),
                    "dependency DOWN"
                ),
                (DependencyState::Down, DependencyState::Up) => {
                    info!(dependency = probe.name(), "dependency recovered")
                }
                (DependencyState::Unknown, DependencyState::Up) => {
                    info!(dependency = probe.name(), "dependency UP")
                }
                _ => debug!(dependency = probe.name(), state = %state, "probe"),
            }

            dependencies.push(DependencyHealth {
                name: probe.name().to_string(),
                state,
                detail,
            });
        }

        let mut report = HealthReport {
            dependencies,
            alert_fired: false,
        };

        if report.any_down() {
            let message = alert_message(&report);
            report.alert_fired = true;
            if let Err(e) = self.alerts.send(&message).await {
                warn!(error = %e, "alert sink failed");
            }
        }
        report
    }

    fn record(&self, name: &str, state: DependencyState) -> DependencyState {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .insert(name.to_string(), state)
            .unwrap_or(DependencyState::Unknown)
    }
}

fn alert_message(report: &HealthReport) -> String {
    let down: Vec<String> = report
        .down()
        .map(|d| match &d.detail {
            Some(reason) => format!("{} ({reason})", d.name),
            None => d.name.clone(),
        })
        .collect();
    format!("replayq health check: DOWN: {}", down.join(", "))
}

#[async_trait]
impl PeriodicTask for HealthSupervisor {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn tick(&self) {
        let report = self.run_cycle().await;
        debug!(down = report.down().count(), alert = report.alert_fired, "health cycle done");
    }
}
