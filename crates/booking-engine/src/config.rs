//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};

/// Tunables for a [`SchedulingCoordinator`](crate::coordinator::SchedulingCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Step between candidate slot starts.
    pub granularity_minutes: u32,
    /// How long a write waits for a resource lock before giving up.
    pub lock_timeout_ms: u64,
    /// Largest number of occurrences a series may be committed with.
    pub max_series_occurrences: usize,
    /// Widest slot search window, in days.
    pub max_query_days: u32,
    /// How far ahead bookings are accepted. `None` means no limit.
    pub booking_horizon_days: Option<u32>,
    /// Reject commits outside working hours or on holidays.
    pub enforce_working_hours: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            granularity_minutes: 15,
            lock_timeout_ms: 2_000,
            max_series_occurrences: 366,
            max_query_days: 62,
            booking_horizon_days: Some(365),
            enforce_working_hours: true,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BookingError::InvalidInput(format!("config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|e| BookingError::InvalidInput(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let zero = |name: &str| BookingError::InvalidInput(format!("{name} must be > 0"));
        if self.granularity_minutes == 0 {
            return Err(zero("granularity_minutes"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(zero("lock_timeout_ms"));
        }
        if self.max_series_occurrences == 0 {
            return Err(zero("max_series_occurrences"));
        }
        if self.max_query_days == 0 {
            return Err(zero("max_query_days"));
        }
        if self.booking_horizon_days == Some(0) {
            return Err(zero("booking_horizon_days"));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
