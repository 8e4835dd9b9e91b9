// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Name-keyed collection of circuit breakers.
//!
//! Endpoint names follow `<channel>:<provider>` (e.g. `email:smtp.example.com`,
//! `voice:callhub`) and `modem:<id>` for SMS modems.

use std::sync::Arc;

use dashmap::DashMap;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus};

/// Shared registry of breakers, created lazily on first use.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `endpoint`, created with the registry defaults if new.
    pub fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(endpoint) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config.clone())));
        Arc::clone(entry.value())
    }

    /// Existing breaker for `endpoint`, without creating one.
    pub fn find(&self, endpoint: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(endpoint).map(|b| Arc::clone(b.value()))
    }

    /// Whether `endpoint` would admit a call. Unknown endpoints are available.
    pub fn is_available(&self, endpoint: &str) -> bool {
        self.find(endpoint).is_none_or(|b| b.is_available())
    }

    /// Status of every known breaker, sorted by name.
    pub fn statuses(&self) -> Vec<CircuitBreakerStatus> {
        let mut out: Vec<_> = self.breakers.iter().map(|b| b.status()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Reset one breaker. Returns false if it does not exist.
    pub fn reset(&self, endpoint: &str) -> bool {
        match self.find(endpoint) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for b in self.breakers.iter() {
            b.reset();
        }
    }
}
