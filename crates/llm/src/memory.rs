//! Memory-pressure admission control
//!
//! Before a request is admitted, system memory usage picks a throttle band
//! that bounds in-flight requests. At the top band, new requests park until
//! usage falls back under the recovery threshold; an emergency cleanup hook
//! fires once per excursion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::LlmError;

/// Usage fraction above which requests park.
const PARK_THRESHOLD: f64 = 0.90;
/// Parked requests resume below this fraction.
const RECOVER_THRESHOLD: f64 = 0.85;
/// Poll interval while parked or waiting for an in-flight slot.
const WAIT_POLL: Duration = Duration::from_millis(200);

/// Memory usage source. The sysinfo implementation is the production path;
/// tests force bands through the stub.
pub trait MemoryMonitor: Send + Sync {
    /// Used fraction of total memory, `0.0..=1.0`.
    fn usage_fraction(&self) -> f64;
}

/// Reads usage from the operating system.
pub struct SysinfoMemoryMonitor {
    system: RwLock<System>,
}

impl SysinfoMemoryMonitor {
    pub fn new() -> Self {
        Self { system: RwLock::new(System::new()) }
    }
}

impl Default for SysinfoMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for SysinfoMemoryMonitor {
    fn usage_fraction(&self) -> f64 {
        let mut system = self.system.write();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }
}

/// Fixed-value monitor for tests.
#[derive(Default)]
pub struct StubMemoryMonitor {
    usage_millis: AtomicUsize,
}

impl StubMemoryMonitor {
    pub fn new(fraction: f64) -> Self {
        let stub = Self::default();
        stub.set(fraction);
        stub
    }

    pub fn set(&self, fraction: f64) {
        self.usage_millis.store((fraction * 1000.0) as usize, Ordering::SeqCst);
    }
}

impl MemoryMonitor for StubMemoryMonitor {
    fn usage_fraction(&self) -> f64 {
        self.usage_millis.load(Ordering::SeqCst) as f64 / 1000.0
    }
}

/// Throttle band derived from memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleBand {
    /// < 65%: full worker budget.
    Full,
    /// 65–75%: reduced budget.
    Reduced,
    /// 75–85%: conservative budget.
    Conservative,
    /// 85–90%: one request at a time.
    SingleFile,
    /// >= 90%: no admissions until recovery.
    Parked,
}

impl ThrottleBand {
    pub fn from_usage(fraction: f64) -> Self {
        if fraction < 0.65 {
            ThrottleBand::Full
        } else if fraction < 0.75 {
            ThrottleBand::Reduced
        } else if fraction < 0.85 {
            ThrottleBand::Conservative
        } else if fraction < PARK_THRESHOLD {
            ThrottleBand::SingleFile
        } else {
            ThrottleBand::Parked
        }
    }

    /// In-flight request bound for this band given the full worker budget.
    pub fn max_in_flight(&self, base_workers: usize) -> usize {
        let base = base_workers.max(1);
        match self {
            ThrottleBand::Full => base,
            ThrottleBand::Reduced => ((base * 2) / 3).max(1),
            ThrottleBand::Conservative => (base / 2).max(1),
            ThrottleBand::SingleFile => 1,
            ThrottleBand::Parked => 0,
        }
    }
}

/// Gate every request passes before touching a backend semaphore.
pub struct AdmissionController {
    monitor: Arc<dyn MemoryMonitor>,
    base_workers: usize,
    in_flight: AtomicUsize,
    /// Hysteresis latch: set at the park threshold, cleared below recovery.
    parked: AtomicBool,
    emergency_cleanup: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl AdmissionController {
    pub fn new(monitor: Arc<dyn MemoryMonitor>, base_workers: usize) -> Self {
        Self {
            monitor,
            base_workers: base_workers.max(1),
            in_flight: AtomicUsize::new(0),
            parked: AtomicBool::new(false),
            emergency_cleanup: None,
        }
    }

    /// Register a hook run once per parked excursion (model-cache flush etc).
    pub fn set_emergency_cleanup(&mut self, hook: Arc<dyn Fn() + Send + Sync>) {
        self.emergency_cleanup = Some(hook);
    }

    pub fn current_band(&self) -> ThrottleBand {
        ThrottleBand::from_usage(self.monitor.usage_fraction())
    }

    /// Wait until the current band admits another request, then take a slot.
    /// The returned guard releases the slot on drop.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<AdmissionGuard<'_>, LlmError> {
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let usage = self.monitor.usage_fraction();

            if usage >= PARK_THRESHOLD && !self.parked.swap(true, Ordering::SeqCst) {
                warn!(
                    usage = %format!("{:.0}%", usage * 100.0),
                    "memory pressure critical, parking new requests"
                );
                if let Some(hook) = &self.emergency_cleanup {
                    hook();
                }
            }

            if self.parked.load(Ordering::SeqCst) {
                // Latched: stay parked until usage falls below recovery
                if usage >= RECOVER_THRESHOLD {
                    tokio::time::sleep(WAIT_POLL).await;
                    continue;
                }
                self.parked.store(false, Ordering::SeqCst);
            }

            let limit = ThrottleBand::from_usage(usage).max_in_flight(self.base_workers);
            let current = self.in_flight.load(Ordering::SeqCst);
            if current < limit
                && self
                    .in_flight
                    .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Ok(AdmissionGuard { controller: self });
            }

            tokio::time::sleep(WAIT_POLL).await;
        }
    }
}

/// Releases an in-flight slot on drop.
pub struct AdmissionGuard<'a> {
    controller: &'a AdmissionController,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.controller.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
