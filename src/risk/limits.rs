use crate::state::SimulationParameters;

/// Refuse to start when usage is above this fraction of the limit.
pub const START_USAGE_LIMIT: f64 = 0.8;
/// Warn between batches above this fraction of the limit.
pub const WARN_USAGE_LIMIT: f64 = 0.9;
/// Share of the free memory a run may plan to use.
pub const PLANNING_SHARE: f64 = 0.8;
/// Fallback for the controller pre-check when the host cannot be probed.
pub const DEFAULT_AVAILABLE_MB: f64 = 2048.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Memory usage against a limit, in bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySnapshot {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl MemorySnapshot {
    #[inline]
    pub fn usage_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }

    #[inline]
    pub fn available_bytes(&self) -> u64 {
        self.limit_bytes.saturating_sub(self.used_bytes)
    }

    #[inline]
    pub fn available_mb(&self) -> f64 {
        self.available_bytes() as f64 / BYTES_PER_MB
    }
}

/// Source of memory introspection. `None` means introspection is
/// unavailable and memory checks are skipped.
pub trait MemoryProbe: Send + Sync {
    fn snapshot(&self) -> Option<MemorySnapshot>;
}

/// Host memory from procfs: resident set of this process against MemTotal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    /// `None` off Linux, where procfs is absent.
    fn snapshot(&self) -> Option<MemorySnapshot> {
        let used_kb = read_proc_kb("/proc/self/status", "VmRSS:")?;
        let limit_kb = read_proc_kb("/proc/meminfo", "MemTotal:")?;
        Some(MemorySnapshot {
            used_bytes: used_kb * 1024,
            limit_bytes: limit_kb * 1024,
        })
    }
}

fn read_proc_kb(path: &str, key: &str) -> Option<u64> {
    std::fs::read_to_string(path).ok().and_then(|content| {
        content
            .lines()
            .find(|l| l.starts_with(key))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse::<u64>().ok())
    })
}

/// Caller-imposed budget with a fixed baseline usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedBudget {
    pub limit_bytes: u64,
    pub used_bytes: u64,
}

impl FixedBudget {
    pub fn from_mb(limit_mb: f64) -> Self {
        Self {
            limit_bytes: (limit_mb.max(0.0) * BYTES_PER_MB) as u64,
            used_bytes: 0,
        }
    }
}

impl MemoryProbe for FixedBudget {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        Some(MemorySnapshot {
            used_bytes: self.used_bytes,
            limit_bytes: self.limit_bytes,
        })
    }
}

/// Memory check result
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryCheck {
    /// Within budget, or introspection unavailable
    Allowed,
    /// Usage ratio over the threshold
    Blocked { usage_ratio: f64 },
}

impl MemoryCheck {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, MemoryCheck::Allowed)
    }
}

/// Pure check of a snapshot against a usage threshold.
#[inline]
pub fn check_memory_usage(snapshot: Option<MemorySnapshot>, threshold: f64) -> MemoryCheck {
    match snapshot {
        Some(s) if s.usage_ratio() > threshold => MemoryCheck::Blocked {
            usage_ratio: s.usage_ratio(),
        },
        _ => MemoryCheck::Allowed,
    }
}

/// One f64 per simulated day plus the (final price, payout) pair.
#[inline]
pub fn estimated_bytes_per_trial(time_horizon: usize) -> u64 {
    time_horizon as u64 * 8 + 16
}

/// Trials that fit in the planning share of the free memory.
pub fn max_trials_for(snapshot: &MemorySnapshot, time_horizon: usize) -> usize {
    let budget = snapshot.available_bytes() as f64 * PLANNING_SHARE;
    (budget / estimated_bytes_per_trial(time_horizon) as f64).floor() as usize
}

/// Whole-run footprint in MB: per-trial outcome pairs, up to 100 retained
/// sample paths, and one f64 of working space per trial.
pub fn estimate_memory_mb(params: &SimulationParameters) -> f64 {
    let n = params.num_simulations as f64;
    let t = params.time_horizon as f64;
    let sample_paths = params.num_simulations.min(100) as f64;
    let total_bytes = n * 16.0 + sample_paths * t * 8.0 + n * 8.0;
    total_bytes / BYTES_PER_MB
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_no_snapshot_is_allowed() {
        assert!(check_memory_usage(None, START_USAGE_LIMIT).is_allowed());
    }

    #[test]
    fn test_high_usage_blocks() {
        let s = MemorySnapshot { used_bytes: 85 * MB, limit_bytes: 100 * MB };
        let check = check_memory_usage(Some(s), START_USAGE_LIMIT);
        assert!(!check.is_allowed());
        assert!(check_memory_usage(Some(s), WARN_USAGE_LIMIT).is_allowed());
    }

    #[test]
    fn test_max_trials_for_budget() {
        let s = MemorySnapshot { used_bytes: 0, limit_bytes: 10 * MB };
        // 8 MB planning budget / (252 * 8 + 16) bytes
        let expected = (8.0 * MB as f64 / 2032.0).floor() as usize;
        assert_eq!(max_trials_for(&s, 252), expected);
    }

    #[test]
    fn test_estimate_memory_mb() {
        let p = SimulationParameters {
            num_simulations: 1_000,
            time_horizon: 100,
            ..SimulationParameters::default()
        };
        let expected = (1_000.0 * 24.0 + 100.0 * 100.0 * 8.0) / (MB as f64);
        assert!((estimate_memory_mb(&p) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_budget_from_mb() {
        let b = FixedBudget::from_mb(2.0);
        let s = b.snapshot().expect("fixed budget always reports");
        assert_eq!(s.limit_bytes, 2 * MB);
        assert!((s.available_mb() - 2.0).abs() < 1e-12);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_memory_reads_procfs() {
        let s = SystemMemory.snapshot().expect("procfs available on linux");
        assert!(s.limit_bytes > 0);
        assert!(s.used_bytes > 0);
    }
}
