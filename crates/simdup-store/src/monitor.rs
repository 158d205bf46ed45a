use std::sync::{Arc, Mutex};

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

const WARNING_PERCENT: f64 = 75.0;
const THROTTLE_PERCENT: f64 = 85.0;
const CRITICAL_PERCENT: f64 = 95.0;
const CONCURRENCY_LIMIT_PERCENT: f64 = 80.0;
const CRITICAL_BATCH_SIZE: usize = 5;
const THROTTLED_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Normal,
    Warning,
    Throttle,
    Critical,
}

impl MemoryPressure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Throttle => "throttle",
            Self::Critical => "critical",
        }
    }

    pub fn from_usage(percent: f64) -> Self {
        if percent >= CRITICAL_PERCENT {
            Self::Critical
        } else if percent >= THROTTLE_PERCENT {
            Self::Throttle
        } else if percent >= WARNING_PERCENT {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

/// Source of the current memory usage, as a percentage of the budget.
pub trait MemoryProbe: Send + Sync {
    fn usage_percent(&self) -> f64;
}

/// Resident memory of this process measured against a byte budget, or against
/// total system memory when no budget is set.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Pid,
    budget_bytes: Option<u64>,
}

impl SystemMemoryProbe {
    pub fn new(max_memory_gb: Option<f64>) -> Self {
        let budget_bytes = max_memory_gb
            .filter(|gb| gb.is_finite() && *gb > 0.0)
            .map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64);

        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
            budget_bytes,
        }
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn usage_percent(&self) -> f64 {
        let mut system = match self.system.lock() {
            Ok(system) => system,
            Err(err) => {
                tracing::warn!(error = ?err, "failed to lock system memory probe");
                return 0.0;
            }
        };

        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let Some(used) = system.process(self.pid).map(|process| process.memory()) else {
            return 0.0;
        };

        let budget = match self.budget_bytes {
            Some(budget) => budget,
            None => {
                system.refresh_memory();
                system.total_memory()
            }
        };
        if budget == 0 {
            return 0.0;
        }
        used as f64 / budget as f64 * 100.0
    }
}

/// Shrinks batch sizes and concurrency as memory usage climbs.
#[derive(Clone)]
pub struct MemoryMonitor {
    probe: Arc<dyn MemoryProbe>,
}

impl MemoryMonitor {
    pub fn new(probe: Arc<dyn MemoryProbe>) -> Self {
        Self { probe }
    }

    pub fn system(max_memory_gb: Option<f64>) -> Self {
        Self::new(Arc::new(SystemMemoryProbe::new(max_memory_gb)))
    }

    pub fn usage_percent(&self) -> f64 {
        self.probe.usage_percent()
    }

    pub fn pressure(&self) -> MemoryPressure {
        MemoryPressure::from_usage(self.usage_percent())
    }

    pub fn adaptive_batch_size(&self, base: usize) -> usize {
        let base = base.max(1);
        let pressure = self.pressure();
        let adjusted = match pressure {
            MemoryPressure::Normal => base,
            MemoryPressure::Warning => base * 3 / 4,
            MemoryPressure::Throttle => base / 2,
            MemoryPressure::Critical => base.min(CRITICAL_BATCH_SIZE),
        };
        if pressure != MemoryPressure::Normal {
            tracing::warn!(
                pressure = pressure.as_str(),
                base,
                adjusted,
                "reducing batch size under memory pressure"
            );
        }
        adjusted.max(1)
    }

    pub fn concurrency_ceiling(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        if self.usage_percent() > CONCURRENCY_LIMIT_PERCENT {
            requested.min(THROTTLED_CONCURRENCY)
        } else {
            requested
        }
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedUsage(f64);

    impl MemoryProbe for FixedUsage {
        fn usage_percent(&self) -> f64 {
            self.0
        }
    }

    fn monitor(percent: f64) -> MemoryMonitor {
        MemoryMonitor::new(Arc::new(FixedUsage(percent)))
    }

    #[test]
    fn pressure_levels_follow_usage() {
        assert_eq!(monitor(10.0).pressure(), MemoryPressure::Normal);
        assert_eq!(monitor(75.0).pressure(), MemoryPressure::Warning);
        assert_eq!(monitor(85.0).pressure(), MemoryPressure::Throttle);
        assert_eq!(monitor(95.0).pressure(), MemoryPressure::Critical);
    }

    #[test]
    fn batch_size_shrinks_with_pressure() {
        assert_eq!(monitor(10.0).adaptive_batch_size(100), 100);
        assert_eq!(monitor(80.0).adaptive_batch_size(100), 75);
        assert_eq!(monitor(90.0).adaptive_batch_size(100), 50);
        assert_eq!(monitor(99.0).adaptive_batch_size(100), 5);
        assert_eq!(monitor(99.0).adaptive_batch_size(3), 3);
        assert_eq!(monitor(90.0).adaptive_batch_size(1), 1);
    }

    #[test]
    fn concurrency_is_capped_above_eighty_percent() {
        assert_eq!(monitor(80.0).concurrency_ceiling(5), 5);
        assert_eq!(monitor(80.5).concurrency_ceiling(5), 2);
        assert_eq!(monitor(99.0).concurrency_ceiling(1), 1);
        assert_eq!(monitor(0.0).concurrency_ceiling(0), 1);
    }

    #[test]
    fn system_probe_reports_a_percentage() {
        let usage = SystemMemoryProbe::new(Some(1024.0)).usage_percent();
        assert!((0.0..100.0).contains(&usage));
    }
}
