//! Reconciler configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tags::{DefaultTags, IgnoreTags};

/// Timeout and backoff policy per operation class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// How long a just-created object may stay invisible to reads (default: 120)
    pub propagation_timeout_secs: u64,

    /// Bound on a single steady-state read call (default: 60)
    pub read_timeout_secs: u64,

    /// First delay between propagation polls (default: 500)
    pub initial_delay_ms: u64,

    /// Cap on the exponential backoff (default: 10000)
    pub max_delay_ms: u64,

    /// Random jitter added to each delay, as a fraction (default: 0.25)
    pub jitter: f64,

    /// Tags merged into every resource that supports tags
    pub default_tags: DefaultTags,

    /// Tags never managed or reported
    pub ignore_tags: IgnoreTags,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            propagation_timeout_secs: 120,
            read_timeout_secs: 60,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: 0.25,
            default_tags: DefaultTags::default(),
            ignore_tags: IgnoreTags::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn propagation_timeout(&self) -> Duration {
        Duration::from_secs(self.propagation_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Backoff settings for the create propagation window
    pub fn propagation_wait(&self) -> crate::wait::WaitConfig {
        crate::wait::WaitConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            timeout: self.propagation_timeout(),
            jitter: self.jitter,
        }
    }

    pub fn with_default_tags(mut self, tags: DefaultTags) -> Self {
        self.default_tags = tags;
        self
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
