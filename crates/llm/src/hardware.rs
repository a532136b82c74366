//! Hardware tier detection and worker sizing
//!
//! Each worker is expected to spawn roughly five backend threads, and the
//! total thread/core ratio should stay at or below 1.5x. Worker count is
//! therefore `floor(cores * 1.5 / 5)` clamped to the tier cap.

use sysinfo::System;

/// Machine class, decided from core count and installed memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareTier {
    Consumer,
    Prosumer,
    Enterprise,
}

impl HardwareTier {
    pub fn classify(cores: usize, total_memory_gb: f64) -> Self {
        if cores >= 16 && total_memory_gb >= 64.0 {
            HardwareTier::Enterprise
        } else if cores >= 8 && total_memory_gb >= 24.0 {
            HardwareTier::Prosumer
        } else {
            HardwareTier::Consumer
        }
    }

    /// Upper bound on effective workers regardless of core count.
    pub fn worker_cap(&self) -> usize {
        match self {
            HardwareTier::Consumer => 4,
            HardwareTier::Prosumer => 6,
            HardwareTier::Enterprise => 8,
        }
    }

    /// Semaphore sizes `(local, hosted)`.
    pub fn semaphore_limits(&self) -> SemaphoreLimits {
        match self {
            HardwareTier::Consumer => SemaphoreLimits { local: 3, hosted: 2 },
            HardwareTier::Prosumer => SemaphoreLimits { local: 5, hosted: 4 },
            HardwareTier::Enterprise => SemaphoreLimits { local: 8, hosted: 8 },
        }
    }
}

/// Per-family concurrency limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreLimits {
    pub local: usize,
    pub hosted: usize,
}

/// Detected hardware and the worker budget derived from it.
#[derive(Debug, Clone, Copy)]
pub struct HardwareProfile {
    pub cores: usize,
    pub total_memory_gb: f64,
    pub tier: HardwareTier,
    pub workers: usize,
}

impl HardwareProfile {
    /// Detect from the running machine.
    pub fn detect() -> Self {
        let cores = num_cpus::get();
        let mut system = System::new();
        system.refresh_memory();
        let total_memory_gb = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        Self::from_specs(cores, total_memory_gb)
    }

    /// Build from explicit specs. Used by tests and overrides.
    pub fn from_specs(cores: usize, total_memory_gb: f64) -> Self {
        let tier = HardwareTier::classify(cores, total_memory_gb);
        let raw = ((cores as f64) * 1.5 / 5.0).floor() as usize;
        let workers = raw.clamp(1, tier.worker_cap());
        Self { cores, total_memory_gb, tier, workers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_classification() {
        assert_eq!(HardwareTier::classify(4, 8.0), HardwareTier::Consumer);
        assert_eq!(HardwareTier::classify(8, 32.0), HardwareTier::Prosumer);
        assert_eq!(HardwareTier::classify(24, 128.0), HardwareTier::Enterprise);
        // Plenty of cores but little memory stays consumer
        assert_eq!(HardwareTier::classify(32, 8.0), HardwareTier::Consumer);
    }

    #[test]
    fn worker_formula_and_caps() {
        // 4 cores: floor(4*1.5/5) = 1
        assert_eq!(HardwareProfile::from_specs(4, 8.0).workers, 1);
        // 8 cores: floor(8*1.5/5) = 2
        assert_eq!(HardwareProfile::from_specs(8, 32.0).workers, 2);
        // 32 cores: floor(32*1.5/5) = 9, capped at 8 for enterprise
        assert_eq!(HardwareProfile::from_specs(32, 128.0).workers, 8);
        // 64 cores but consumer memory: capped at 4
        assert_eq!(HardwareProfile::from_specs(64, 8.0).workers, 4);
    }

    #[test]
    fn semaphore_limits_by_tier() {
        assert_eq!(
            HardwareTier::Enterprise.semaphore_limits(),
            SemaphoreLimits { local: 8, hosted: 8 }
        );
        assert_eq!(
            HardwareTier::Consumer.semaphore_limits(),
            SemaphoreLimits { local: 3, hosted: 2 }
        );
    }
}
