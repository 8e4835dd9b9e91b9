// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tiered SMS modem pool.
//!
//! Selection runs three tiers in order: the modem dedicated to the device,
//! the pool of modems allowed for the requested service, and finally any
//! usable modem (a `pool_exhausted` signal). Quota is reserved under the
//! modem's own lock when it is picked, so concurrent sends cannot overrun a
//! `sent_limit`. Each modem has its own breaker (`modem:<id>`) and its own
//! concurrency semaphore.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use alarmcast_config::model::ModemPoolConfig;
use alarmcast_core::{
    AlarmcastError, ClassifiedError, Modem, ModemHealth, ModemStore, ServiceTag,
};
use alarmcast_resilience::{BreakerRegistry, CircuitState};

use crate::gateway::ModemGateway;

/// Breaker name for a modem.
pub fn breaker_name(modem_id: &str) -> String {
    format!("modem:{modem_id}")
}

/// Which selection tier produced a modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTier {
    Device,
    Service,
    Fallback,
}

impl SelectionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Service => "service",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SelectionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsReceipt {
    pub modem_id: String,
    pub message_id: String,
    pub tier: SelectionTier,
}

/// Health thresholds, in consecutive failed sends.
#[derive(Debug, Clone, Copy)]
struct HealthThresholds {
    degraded_after: u32,
    unhealthy_after: u32,
}

impl HealthThresholds {
    fn health_for(&self, consecutive_failures: u32) -> ModemHealth {
        if consecutive_failures >= self.unhealthy_after {
            ModemHealth::Unhealthy
        } else if consecutive_failures >= self.degraded_after {
            ModemHealth::Degraded
        } else {
            ModemHealth::Healthy
        }
    }
}

#[derive(Debug)]
struct ModemState {
    modem: Modem,
    /// Sends selected but not yet settled.
    reserved: u64,
    consecutive_failures: u32,
}

/// Concurrency gate of one modem, replaced whole when its size changes.
#[derive(Debug)]
struct Limiter {
    size: u32,
    semaphore: Arc<Semaphore>,
}

impl Limiter {
    fn new(size: u32) -> Self {
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size as usize)),
        }
    }
}

#[derive(Debug)]
struct ModemSlot {
    id: String,
    limiter: Mutex<Limiter>,
    state: Mutex<ModemState>,
    /// Serializes usage persistence for this modem.
    persist: tokio::sync::Mutex<()>,
}

impl ModemSlot {
    fn new(modem: Modem) -> Self {
        Self {
            id: modem.id.clone(),
            limiter: Mutex::new(Limiter::new(modem.max_concurrent.max(1))),
            state: Mutex::new(ModemState {
                modem,
                reserved: 0,
                consecutive_failures: 0,
            }),
            persist: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        let limiter = self.limiter.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&limiter.semaphore)
    }

    /// Take the stored roster entry, keeping reservations and failure counts.
    ///
    /// Permits held on a replaced semaphore stay valid until their sends end.
    fn refresh(&self, modem: Modem) {
        let size = modem.max_concurrent.max(1);
        {
            let mut limiter = self.limiter.lock().unwrap_or_else(|e| e.into_inner());
            if limiter.size != size {
                debug!(
                    modem = %self.id,
                    from = limiter.size,
                    to = size,
                    "modem concurrency resized"
                );
                *limiter = Limiter::new(size);
            }
        }
        self.lock().modem = modem;
    }

    fn release(&self) {
        let mut st = self.lock();
        st.reserved = st.reserved.saturating_sub(1);
    }
}

/// A quota reservation on one modem.
///
/// Dropping an unsettled reservation returns the quota.
#[derive(Debug)]
pub struct Reservation {
    slot: Arc<ModemSlot>,
    tier: SelectionTier,
    settled: bool,
}

impl Reservation {
    pub fn modem_id(&self) -> &str {
        &self.slot.id
    }

    pub fn tier(&self) -> SelectionTier {
        self.tier
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.slot.release();
        }
    }
}

/// Eligibility rule of one selection tier.
#[derive(Debug, Clone, Copy)]
struct Rule {
    service: Option<ServiceTag>,
    require_healthy: bool,
}

/// Pool of SMS modems with tiered selection and quota accounting.
pub struct ModemPool {
    store: Arc<dyn ModemStore>,
    gateway: Arc<dyn ModemGateway>,
    breakers: Arc<BreakerRegistry>,
    service: ServiceTag,
    thresholds: HealthThresholds,
    slots: RwLock<HashMap<String, Arc<ModemSlot>>>,
}

impl fmt::Debug for ModemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModemPool")
            .field("service", &self.service)
            .field("modems", &self.read_slots().len())
            .finish_non_exhaustive()
    }
}

impl ModemPool {
    /// Build the pool and load the modem roster from `store`.
    pub async fn new(
        store: Arc<dyn ModemStore>,
        gateway: Arc<dyn ModemGateway>,
        breakers: Arc<BreakerRegistry>,
        config: &ModemPoolConfig,
    ) -> Result<Self, AlarmcastError> {
        let service = config.service.parse::<ServiceTag>().map_err(|_| {
            AlarmcastError::Config(format!("unknown modem_pool.service `{}`", config.service))
        })?;
        let pool = Self {
            store,
            gateway,
            breakers,
            service,
            thresholds: HealthThresholds {
                degraded_after: config.degraded_after_failures,
                unhealthy_after: config.unhealthy_after_failures,
            },
            slots: RwLock::new(HashMap::new()),
        };
        pool.reload().await?;
        Ok(pool)
    }

    /// Service tag used by [`send`](Self::send).
    pub fn service(&self) -> ServiceTag {
        self.service
    }

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ModemSlot>>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Reload the roster from the store. In-flight reservations survive.
    pub async fn reload(&self) -> Result<usize, AlarmcastError> {
        let modems = self.store.list_modems().await?;
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::with_capacity(modems.len());
        for modem in modems {
            let slot = match slots.get(&modem.id) {
                Some(existing) => {
                    existing.refresh(modem);
                    Arc::clone(existing)
                }
                None => Arc::new(ModemSlot::new(modem)),
            };
            next.insert(slot.id.clone(), slot);
        }
        *slots = next;
        info!(modems = slots.len(), "modem roster loaded");
        Ok(slots.len())
    }

    /// Current view of every modem.
    pub fn snapshot(&self) -> Vec<Modem> {
        let mut modems: Vec<Modem> = self
            .read_slots()
            .values()
            .map(|s| s.lock().modem.clone())
            .collect();
        modems.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        modems
    }

    /// Health as seen by selection, folding in the modem's breaker.
    ///
    /// A breaker that rejects calls makes the modem unhealthy. A breaker that
    /// is ready to probe re-admits the modem as degraded.
    fn effective_health(&self, modem: &Modem) -> ModemHealth {
        let Some(breaker) = self.breakers.find(&breaker_name(&modem.id)) else {
            return modem.health;
        };
        if !breaker.is_available() {
            ModemHealth::Unhealthy
        } else if breaker.state() != CircuitState::Closed {
            ModemHealth::Degraded
        } else {
            modem.health
        }
    }

    fn eligible(&self, st: &ModemState, rule: Rule, now: chrono::DateTime<Utc>) -> bool {
        let m = &st.modem;
        if !m.enabled || !m.has_quota(st.reserved, now) {
            return false;
        }
        if rule.service.is_some_and(|s| !m.permits(s)) {
            return false;
        }
        match self.effective_health(m) {
            ModemHealth::Healthy => true,
            ModemHealth::Degraded => !rule.require_healthy,
            ModemHealth::Unhealthy => false,
        }
    }

    /// Re-check eligibility and reserve one send under the modem's lock.
    fn try_reserve(
        &self,
        slot: &Arc<ModemSlot>,
        rule: Rule,
        tier: SelectionTier,
    ) -> Option<Reservation> {
        let now = Utc::now();
        let mut st = slot.lock();
        if !self.eligible(&st, rule, now) {
            return None;
        }
        st.reserved += 1;
        Some(Reservation {
            slot: Arc::clone(slot),
            tier,
            settled: false,
        })
    }

    /// Candidates for a pool tier: priority, then remaining quota, then id.
    fn ranked(&self, rule: Rule) -> Vec<Arc<ModemSlot>> {
        let now = Utc::now();
        let mut ranked: Vec<(i32, f64, String, Arc<ModemSlot>)> = self
            .read_slots()
            .values()
            .filter_map(|slot| {
                let st = slot.lock();
                self.eligible(&st, rule, now).then(|| {
                    (
                        st.modem.priority,
                        st.modem.remaining_fraction(st.reserved),
                        slot.id.clone(),
                        Arc::clone(slot),
                    )
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| b.1.total_cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        ranked.into_iter().map(|(_, _, _, slot)| slot).collect()
    }

    /// Pick a modem for a send from device `imei` and reserve quota on it.
    pub async fn select(
        &self,
        imei: &str,
        service: ServiceTag,
    ) -> Result<Reservation, ClassifiedError> {
        let dedicated = self
            .store
            .device_modem(imei)
            .await
            .map_err(|e| e.classify())?;
        if let Some(id) = dedicated {
            let slot = self.read_slots().get(&id).cloned();
            let rule = Rule {
                service: Some(service),
                require_healthy: true,
            };
            if let Some(r) = slot.and_then(|s| self.try_reserve(&s, rule, SelectionTier::Device)) {
                return Ok(self.selected(r));
            }
            debug!(imei, modem = %id, "dedicated modem not usable, trying service pool");
        }

        let tiers = [
            (
                SelectionTier::Service,
                Rule {
                    service: Some(service),
                    require_healthy: false,
                },
            ),
            (
                SelectionTier::Fallback,
                Rule {
                    service: None,
                    require_healthy: false,
                },
            ),
        ];
        for (tier, rule) in tiers {
            if tier == SelectionTier::Fallback {
                warn!(%service, "no modem left for service, falling back to any modem");
                alarmcast_prometheus::record_pool_exhausted(&service.to_string());
            }
            for slot in self.ranked(rule) {
                if let Some(r) = self.try_reserve(&slot, rule, tier) {
                    return Ok(self.selected(r));
                }
            }
        }

        Err(ClassifiedError::configuration(format!(
            "no modem available for service `{service}`"
        )))
    }

    fn selected(&self, r: Reservation) -> Reservation {
        debug!(modem = r.modem_id(), tier = %r.tier, "modem selected");
        alarmcast_prometheus::record_modem_selection(r.tier.as_str());
        r
    }

    /// Send `text` to `to` on behalf of device `imei`.
    pub async fn send(
        &self,
        imei: &str,
        to: &str,
        text: &str,
    ) -> Result<SmsReceipt, ClassifiedError> {
        let reservation = self.select(imei, self.service).await?;
        let slot = Arc::clone(&reservation.slot);
        let _permit = slot
            .semaphore()
            .acquire_owned()
            .await
            .map_err(|_| {
                ClassifiedError::configuration(format!("modem {} limiter closed", slot.id))
            })?;
        let modem = slot.lock().modem.clone();

        let breaker = self.breakers.get(&breaker_name(&modem.id));
        let result = breaker
            .execute(|| self.gateway.send_sms(&modem, to, text))
            .await;
        let tier = reservation.tier;
        self.settle(reservation, &result).await;

        result.map(|message_id| SmsReceipt {
            modem_id: modem.id.clone(),
            message_id,
            tier,
        })
    }

    /// Commit or release the reservation and persist usage and health.
    async fn settle(
        &self,
        mut reservation: Reservation,
        result: &Result<String, ClassifiedError>,
    ) {
        let slot = Arc::clone(&reservation.slot);
        {
            let mut st = slot.lock();
            st.reserved = st.reserved.saturating_sub(1);
            let before = st.modem.health;
            match result {
                Ok(_) => {
                    st.modem.sent_count += 1;
                    st.consecutive_failures = 0;
                    st.modem.health = ModemHealth::Healthy;
                }
                // Rejections and recipient-level errors say nothing about the modem.
                Err(e) if e.is_circuit_rejection() || !e.is_retryable() => {}
                Err(_) => {
                    st.consecutive_failures += 1;
                    st.modem.health = self.thresholds.health_for(st.consecutive_failures);
                }
            }
            if st.modem.health != before {
                warn!(
                    modem = %slot.id,
                    from = %before,
                    to = %st.modem.health,
                    failures = st.consecutive_failures,
                    "modem health changed"
                );
            }
        }
        reservation.settled = true;

        // Persist the latest state, not the one captured above.
        let _guard = slot.persist.lock().await;
        let (sent_count, health) = {
            let st = slot.lock();
            (st.modem.sent_count, st.modem.health)
        };
        alarmcast_prometheus::set_modem_usage(&slot.id, sent_count);
        if let Err(e) = self.store.update_modem_usage(&slot.id, sent_count, health).await {
            warn!(modem = %slot.id, error = %e, "failed to persist modem usage");
        }
    }

    /// Administrative package reset: zero usage, mark healthy, close the breaker.
    pub async fn reset_usage(&self, modem_id: &str) -> Result<(), AlarmcastError> {
        self.store.reset_modem_usage(modem_id).await?;
        let slot = self.read_slots().get(modem_id).cloned();
        if let Some(slot) = slot {
            let mut st = slot.lock();
            st.modem.sent_count = 0;
            st.modem.health = ModemHealth::Healthy;
            st.consecutive_failures = 0;
        }
        self.breakers.reset(&breaker_name(modem_id));
        alarmcast_prometheus::set_modem_usage(modem_id, 0);
        info!(modem = modem_id, "modem usage reset");
        Ok(())
    }

    /// Modems currently selectable for the pool's service, by any tier.
    pub fn usable_count(&self) -> usize {
        let now = Utc::now();
        let rule = Rule {
            service: None,
            require_healthy: false,
        };
        self.read_slots()
            .values()
            .filter(|slot| self.eligible(&slot.lock(), rule, now))
            .count()
    }
}
