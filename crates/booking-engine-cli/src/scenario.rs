//! Scenario files: a store snapshot plus optional engine settings.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use booking_engine::{
    Clock, EngineConfig, FixedClock, InMemoryStore, SchedulingCoordinator, StoreSnapshot,
    SystemClock,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(flatten)]
    pub snapshot: StoreSnapshot,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing scenario {}", path.display()))
    }

    /// Build a coordinator over the scenario's data. `now` pins the clock;
    /// without it the system clock is used.
    pub fn into_coordinator(
        self,
        now: Option<DateTime<Utc>>,
    ) -> anyhow::Result<SchedulingCoordinator> {
        let store = InMemoryStore::from_snapshot(self.snapshot)?;
        let clock: Arc<dyn Clock> = match now {
            Some(now) => Arc::new(FixedClock::new(now)),
            None => Arc::new(SystemClock),
        };
        Ok(SchedulingCoordinator::new(Arc::new(store), self.config, clock)?)
    }
}
