//! In-memory per-identity quota bookkeeping.
//!
//! Records live for the lifetime of the process and expire lazily: a record
//! whose window has elapsed is treated as absent on the next access. The
//! optional [`QuotaLedger::sweep_expired`] bounds key growth on long-running
//! deployments.
//!
//! Admission and the eventual consumption for one identity go through a
//! [`Reservation`], taken under the identity's shard lock, so two concurrent
//! requests can never both pass admission for the last remaining slot.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Source of the current time for window bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Rate-limit bucket: one wallet seen from one origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    wallet: String,
    origin: String,
}

impl IdentityKey {
    pub fn new(wallet: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            origin: origin.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.wallet, self.origin)
    }
}

/// Consumption state of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRecord {
    /// Confirmed dispenses inside the current window
    pub consumed: u32,
    /// Admitted requests whose transfer has not finished yet
    pub in_flight: u32,
    pub window_start: DateTime<Utc>,
}

impl QuotaRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            consumed: 0,
            in_flight: 0,
            window_start: now,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.window_start) >= window
    }

    /// Start a fresh window if the current one has elapsed. In-flight
    /// reservations carry over.
    fn roll_window(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        if self.is_expired(now, window) {
            self.consumed = 0;
            self.window_start = now;
        }
    }

    fn used(&self) -> u32 {
        self.consumed.saturating_add(self.in_flight)
    }

    fn is_idle(&self) -> bool {
        self.consumed == 0 && self.in_flight == 0
    }

    fn consume(&mut self, now: DateTime<Utc>) {
        if self.consumed == 0 {
            self.window_start = now;
        }
        self.consumed = self.consumed.saturating_add(1);
    }
}

/// Per-identity quota ledger.
///
/// Constructed once by the hosting process and handed to the dispense
/// coordinator; tests build a fresh instance each.
pub struct QuotaLedger {
    records: DashMap<IdentityKey, QuotaRecord>,
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window.to_std().unwrap_or(Duration::MAX)
    }

    /// Whether `key` may dispense now. Expired records are discarded.
    pub fn is_admitted(&self, key: &IdentityKey, max_per_window: u32) -> bool {
        let now = self.clock.now();
        let admitted = match self.records.get_mut(key) {
            None => return true,
            Some(mut record) => {
                record.roll_window(now, self.window);
                record.used() < max_per_window
            }
        };
        self.prune_if_idle(key);
        admitted
    }

    /// Atomically check admission and hold one slot for `key`.
    ///
    /// Returns `None` when the identity has no allowance left. The slot is
    /// released when the reservation is dropped without being committed.
    pub fn try_reserve(&self, key: &IdentityKey, max_per_window: u32) -> Option<Reservation<'_>> {
        let now = self.clock.now();
        let admitted = {
            let mut record = self
                .records
                .entry(key.clone())
                .or_insert_with(|| QuotaRecord::new(now));
            record.roll_window(now, self.window);

            if record.used() < max_per_window {
                record.in_flight += 1;
                true
            } else {
                false
            }
        };

        if !admitted {
            self.prune_if_idle(key);
            debug!(identity = %key, "Quota exhausted");
            return None;
        }

        Some(Reservation {
            ledger: self,
            key: key.clone(),
            settled: false,
        })
    }

    /// Count one confirmed dispense for `key`, opening a new window if the
    /// previous one has expired.
    pub fn record_consumption(&self, key: &IdentityKey) {
        let now = self.clock.now();
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| QuotaRecord::new(now));
        record.roll_window(now, self.window);
        record.consume(now);
    }

    /// Requests `key` may still make in the current window.
    pub fn remaining(&self, key: &IdentityKey, max_per_window: u32) -> u32 {
        let now = self.clock.now();
        match self.records.get(key) {
            None => max_per_window,
            Some(record) if record.is_expired(now, self.window) => {
                max_per_window.saturating_sub(record.in_flight)
            }
            Some(record) => max_per_window.saturating_sub(record.used()),
        }
    }

    /// Snapshot of the record for `key`, if any.
    pub fn record(&self, key: &IdentityKey) -> Option<QuotaRecord> {
        self.records.get(key).map(|record| record.clone())
    }

    /// Remove every expired record with nothing in flight. Returns how many
    /// were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.records.len();
        self.records
            .retain(|_, record| !(record.is_expired(now, self.window) && record.in_flight == 0));
        before.saturating_sub(self.records.len())
    }

    pub fn tracked_identities(&self) -> usize {
        self.records.len()
    }

    fn commit(&self, key: &IdentityKey) {
        let now = self.clock.now();
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| QuotaRecord::new(now));
        record.in_flight = record.in_flight.saturating_sub(1);
        record.roll_window(now, self.window);
        record.consume(now);
    }

    fn release(&self, key: &IdentityKey) {
        if let Some(mut record) = self.records.get_mut(key) {
            record.in_flight = record.in_flight.saturating_sub(1);
        }
        self.prune_if_idle(key);
    }

    fn prune_if_idle(&self, key: &IdentityKey) {
        self.records.remove_if(key, |_, record| record.is_idle());
    }
}

impl fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("tracked_identities", &self.records.len())
            .field("window", &self.window)
            .finish()
    }
}

/// A slot held for one in-progress dispense.
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation<'a> {
    ledger: &'a QuotaLedger,
    key: IdentityKey,
    settled: bool,
}

impl Reservation<'_> {
    /// Turn the slot into a recorded consumption. Call only after the
    /// transfer is confirmed.
    pub fn commit(mut self) {
        self.settled = true;
        self.ledger.commit(&self.key);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.release(&self.key);
        }
    }
}
