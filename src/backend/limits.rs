//! Resource limits for extraction containers.
//!
//! The extraction run only copies staged files to a bind mount, so the limits
//! are deliberately small; they keep a misbehaving image from starving the
//! builds running alongside it.

use crate::error::{ConfigError, Result};
use sysinfo::System;

/// Minimum memory accepted for a container, in megabytes
const MIN_MEMORY_MB: u64 = 128;

/// Maximum memory accepted for a container, in megabytes (1 TB)
const MAX_MEMORY_MB: u64 = 1024 * 1024;

/// Resource limits passed to `docker run`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerLimits {
    /// Maximum memory (e.g., "1g", "512m")
    pub memory: String,

    /// Maximum memory + swap, normalized to megabytes (e.g., "1536m")
    pub memory_swap: String,

    /// Number of CPUs (fractional allowed, e.g., "2", "1.5")
    pub cpus: String,

    /// Maximum number of processes
    pub pids_limit: u32,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self::detect_safe_limits()
    }
}

impl ContainerLimits {
    /// Derives limits from the host:
    /// - Memory: 25% of total RAM, between 512 MB and 2 GB
    /// - Swap: memory + 512 MB
    /// - CPUs: at most 2
    /// - PIDs: 256
    pub fn detect_safe_limits() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let total_mb = sys.total_memory() / 1024 / 1024;
        let memory_mb = (total_mb / 4).clamp(512, 2048);
        let cpus = num_cpus::get().clamp(1, 2);

        Self {
            memory: format!("{}m", memory_mb),
            memory_swap: format!("{}m", memory_mb + 512),
            cpus: cpus.to_string(),
            pids_limit: 256,
        }
    }

    /// Parses "4g", "4096m", "4GB", "2048" (megabytes when unitless) to megabytes.
    fn parse_memory_to_mb(memory: &str) -> std::result::Result<u64, String> {
        let memory = memory.trim().to_lowercase();
        let invalid = || format!("Invalid memory value: {}", memory);

        let (digits, factor) = if let Some(v) = memory.strip_suffix("gb") {
            (v, 1024)
        } else if let Some(v) = memory.strip_suffix('g') {
            (v, 1024)
        } else if let Some(v) = memory.strip_suffix("mb") {
            (v, 1)
        } else if let Some(v) = memory.strip_suffix('m') {
            (v, 1)
        } else {
            (memory.as_str(), 1)
        };

        digits
            .parse::<u64>()
            .map(|v| v * factor)
            .map_err(|_| invalid())
    }

    /// Builds limits from explicit values, validating each.
    ///
    /// Swap defaults to memory + 512 MB and must not be below memory.
    pub fn from_cli(
        memory: String,
        memory_swap: Option<String>,
        cpus: Option<String>,
        pids_limit: u32,
    ) -> std::result::Result<Self, String> {
        let memory_mb = Self::parse_memory_to_mb(&memory)?;
        if memory_mb < MIN_MEMORY_MB {
            return Err(format!(
                "Memory limit too low: {} MB (minimum: {} MB)",
                memory_mb, MIN_MEMORY_MB
            ));
        }
        if memory_mb > MAX_MEMORY_MB {
            return Err(format!(
                "Memory limit too high: {} MB (maximum: 1 TB)",
                memory_mb
            ));
        }

        let memory_swap = match memory_swap {
            Some(swap) => {
                let swap_mb = Self::parse_memory_to_mb(&swap)?;
                if swap_mb < memory_mb {
                    return Err(format!(
                        "Memory swap ({} MB) must be >= memory ({} MB)",
                        swap_mb, memory_mb
                    ));
                }
                format!("{}m", swap_mb)
            }
            None => format!("{}m", memory_mb + 512),
        };

        let cpus = match cpus {
            Some(cpus_str) => {
                let value: f32 = cpus_str.parse().map_err(|_| {
                    format!(
                        "Invalid cpus value: '{}' (expected number like '2' or '1.5')",
                        cpus_str
                    )
                })?;
                if value <= 0.0 || value > 1024.0 {
                    return Err(format!("CPU limit must be in (0, 1024], got: {}", value));
                }
                cpus_str
            }
            None => num_cpus::get().clamp(1, 2).to_string(),
        };

        if !(10..=1_000_000).contains(&pids_limit) {
            return Err(format!(
                "PID limit out of range: {} (expected 10..=1,000,000)",
                pids_limit
            ));
        }

        Ok(Self {
            memory,
            memory_swap,
            cpus,
            pids_limit,
        })
    }

    /// Applies optional overrides on top of host-derived defaults.
    pub fn with_overrides(
        memory: Option<String>,
        memory_swap: Option<String>,
        cpus: Option<String>,
        pids_limit: Option<u32>,
    ) -> Result<Self> {
        let defaults = Self::detect_safe_limits();
        if memory.is_none() && memory_swap.is_none() && cpus.is_none() && pids_limit.is_none() {
            return Ok(defaults);
        }

        Self::from_cli(
            memory.unwrap_or(defaults.memory),
            memory_swap,
            cpus.or(Some(defaults.cpus)),
            pids_limit.unwrap_or(defaults.pids_limit),
        )
        .map_err(|reason| {
            ConfigError::InvalidValue {
                field: "container limits".to_string(),
                reason,
            }
            .into()
        })
    }
}
