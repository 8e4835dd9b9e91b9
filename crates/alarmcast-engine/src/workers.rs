// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory worker liveness registry.
//!
//! Workers heartbeat into the registry; a periodic sweep marks silent
//! workers stale and removes dead ones. The registry is informational and
//! never gates consumption.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alarmcast_config::model::{ServiceConfig, WorkersConfig};
use alarmcast_core::{WorkerRecord, WorkerStatus};

/// Result of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub active: usize,
    pub stale: usize,
    /// Ids removed as dead.
    pub removed: Vec<String>,
}

#[derive(Debug)]
pub struct WorkerRegistry {
    workers: DashMap<String, WorkerRecord>,
    stale_after: chrono::Duration,
    dead_after: chrono::Duration,
}

impl WorkerRegistry {
    pub fn new(config: &WorkersConfig) -> Self {
        let dead_after = config.dead_after_secs.max(config.stale_after_secs);
        Self {
            workers: DashMap::new(),
            stale_after: chrono::Duration::seconds(config.stale_after_secs as i64),
            dead_after: chrono::Duration::seconds(dead_after as i64),
        }
    }

    /// Record a heartbeat, registering the worker on first sight.
    pub fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) {
        self.workers
            .entry(worker_id.to_string())
            .and_modify(|w| {
                w.last_heartbeat = now;
                w.status = WorkerStatus::Active;
            })
            .or_insert_with(|| {
                info!(worker_id, "worker registered");
                WorkerRecord {
                    worker_id: worker_id.to_string(),
                    started_at: now,
                    last_heartbeat: now,
                    status: WorkerStatus::Active,
                }
            });
    }

    pub fn deregister(&self, worker_id: &str) -> bool {
        self.workers.remove(worker_id).is_some()
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.workers.get(worker_id).map(|w| w.clone())
    }

    /// Every known worker, ordered by id.
    pub fn list(&self) -> Vec<WorkerRecord> {
        let mut all: Vec<WorkerRecord> = self.workers.iter().map(|w| w.clone()).collect();
        all.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        all
    }

    /// Reclassify every worker by silence at `now` and drop the dead.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for mut entry in self.workers.iter_mut() {
            let silence = now - entry.last_heartbeat;
            let status = if silence >= self.dead_after {
                WorkerStatus::Dead
            } else if silence >= self.stale_after {
                WorkerStatus::Stale
            } else {
                WorkerStatus::Active
            };
            if status != entry.status {
                debug!(worker_id = %entry.worker_id, from = %entry.status, to = %status, "worker status changed");
            }
            entry.status = status;
            match status {
                WorkerStatus::Active => report.active += 1,
                WorkerStatus::Stale => report.stale += 1,
                WorkerStatus::Dead => report.removed.push(entry.worker_id.clone()),
            }
        }
        for id in &report.removed {
            self.workers.remove(id);
            warn!(worker_id = %id, "dead worker removed");
        }

        alarmcast_prometheus::set_workers("active", report.active);
        alarmcast_prometheus::set_workers("stale", report.stale);
        report
    }

    /// Heartbeat `worker_id` every `interval` until `shutdown` fires, then
    /// deregister it.
    pub async fn heartbeat_loop(
        self: Arc<Self>,
        worker_id: String,
        interval: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.heartbeat(&worker_id, Utc::now()),
            }
        }
        self.deregister(&worker_id);
        info!(worker_id, "worker deregistered");
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn cleanup_loop(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep(Utc::now());
                }
            }
        }
    }
}

/// Configured worker id, or `<service>-<pid>-<random>`.
pub fn worker_id(service: &ServiceConfig) -> String {
    if let Some(id) = service.worker_id.as_deref().filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", service.name, std::process::id(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(&WorkersConfig {
            stale_after_secs: 30,
            dead_after_secs: 120,
            ..WorkersConfig::default()
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_770_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn heartbeats_keep_workers_active() {
        let r = registry();
        r.heartbeat("w1", at(0));
        r.heartbeat("w1", at(25));
        let report = r.sweep(at(50));
        assert_eq!(report.active, 1);
        assert_eq!(r.get("w1").unwrap().started_at, at(0));
    }

    #[test]
    fn silent_workers_go_stale_then_are_removed() {
        let r = registry();
        r.heartbeat("w1", at(0));
        r.heartbeat("w2", at(100));

        let report = r.sweep(at(119));
        assert_eq!((report.active, report.stale), (1, 1));
        assert_eq!(r.get("w1").unwrap().status, WorkerStatus::Stale);

        let report = r.sweep(at(120));
        assert_eq!(report.removed, vec!["w1".to_string()]);
        assert!(r.get("w1").is_none());
        assert_eq!(r.list().len(), 1);
    }

    #[test]
    fn heartbeat_revives_a_stale_worker() {
        let r = registry();
        r.heartbeat("w1", at(0));
        r.sweep(at(60));
        r.heartbeat("w1", at(61));
        assert_eq!(r.get("w1").unwrap().status, WorkerStatus::Active);
    }

    #[test]
    fn configured_worker_id_wins() {
        let mut service = ServiceConfig::default();
        service.worker_id = Some("edge-1".into());
        assert_eq!(worker_id(&service), "edge-1");

        service.worker_id = None;
        let generated = worker_id(&service);
        assert!(generated.starts_with(&format!("{}-{}-", service.name, std::process::id())));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_loop_registers_and_deregisters() {
        let r = Arc::new(registry());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(r.clone().heartbeat_loop(
            "w1".into(),
            Duration::from_secs(10),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(r.get("w1").is_some());
        shutdown.cancel();
        task.await.unwrap();
        assert!(r.get("w1").is_none());
    }
}
