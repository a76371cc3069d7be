//! Kernel Configuration
//!
//! Scheduling algorithms, burst estimation parameters and suspension timing.
//! Algorithms are closed enums resolved once when the kernel is built.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Short-term (dispatch) algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShortTermAlgorithm {
    /// First come, first served
    Fifo,
    /// Shortest estimated burst first, no preemption
    Sjf,
    /// Shortest remaining time, preemptive
    Srt,
}

impl ShortTermAlgorithm {
    /// Whether a new READY arrival may interrupt a running process
    pub fn is_preemptive(self) -> bool {
        matches!(self, ShortTermAlgorithm::Srt)
    }

    /// Whether READY is kept ordered by estimated burst
    pub fn orders_by_estimate(self) -> bool {
        matches!(self, ShortTermAlgorithm::Sjf | ShortTermAlgorithm::Srt)
    }
}

impl Default for ShortTermAlgorithm {
    fn default() -> Self {
        Self::Fifo
    }
}

impl std::fmt::Display for ShortTermAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShortTermAlgorithm::Fifo => write!(f, "FIFO"),
            ShortTermAlgorithm::Sjf => write!(f, "SJF"),
            ShortTermAlgorithm::Srt => write!(f, "SRT"),
        }
    }
}

impl std::str::FromStr for ShortTermAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FIFO" => Ok(ShortTermAlgorithm::Fifo),
            "SJF" => Ok(ShortTermAlgorithm::Sjf),
            "SRT" | "SJF_PREEMPTIVE" => Ok(ShortTermAlgorithm::Srt),
            _ => Err(format!("Unknown short-term algorithm: {}", s)),
        }
    }
}

/// Long-term (admission) algorithm, also used to pick swap-in candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LongTermAlgorithm {
    /// Admit in arrival order, never skipping the head
    Fifo,
    /// Smallest process first
    Pmcp,
}

impl Default for LongTermAlgorithm {
    fn default() -> Self {
        Self::Fifo
    }
}

impl std::fmt::Display for LongTermAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LongTermAlgorithm::Fifo => write!(f, "FIFO"),
            LongTermAlgorithm::Pmcp => write!(f, "PMCP"),
        }
    }
}

impl std::str::FromStr for LongTermAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "FIFO" => Ok(LongTermAlgorithm::Fifo),
            "PMCP" | "SMALLEST" => Ok(LongTermAlgorithm::Pmcp),
            _ => Err(format!("Unknown long-term algorithm: {}", s)),
        }
    }
}

/// Kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Dispatch algorithm
    pub short_term_algorithm: ShortTermAlgorithm,

    /// Admission algorithm
    pub long_term_algorithm: LongTermAlgorithm,

    /// Smoothing factor for burst estimation
    pub alpha: f64,

    /// Estimated burst assigned to every new process (ms)
    pub initial_estimate_ms: f64,

    /// Time a process may stay BLOCKED before it is suspended (ms)
    pub suspension_time_ms: u64,

    /// Capacity of the kernel event channel
    pub event_capacity: usize,

    /// Log level
    pub log_level: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            short_term_algorithm: ShortTermAlgorithm::Fifo,
            long_term_algorithm: LongTermAlgorithm::Fifo,
            alpha: 0.5,
            initial_estimate_ms: 10_000.0,
            suspension_time_ms: 4_500,
            event_capacity: 1_024,
            log_level: "info".into(),
        }
    }
}

impl KernelConfig {
    /// Configuration with the given algorithms and defaults elsewhere
    pub fn with_algorithms(short_term: ShortTermAlgorithm, long_term: LongTermAlgorithm) -> Self {
        Self {
            short_term_algorithm: short_term,
            long_term_algorithm: long_term,
            ..Default::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;

        let config: KernelConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::Io(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::Invalid("Alpha must be within [0, 1]".into()));
        }

        if !self.initial_estimate_ms.is_finite() || self.initial_estimate_ms < 0.0 {
            return Err(ConfigError::Invalid("Initial estimate must be a non-negative number".into()));
        }

        if self.suspension_time_ms == 0 {
            return Err(ConfigError::Invalid("Suspension time must be greater than zero".into()));
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("Event capacity must be greater than zero".into()));
        }

        Ok(())
    }

    /// Suspension time as a duration
    pub fn suspension_time(&self) -> Duration {
        Duration::from_millis(self.suspension_time_ms)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
