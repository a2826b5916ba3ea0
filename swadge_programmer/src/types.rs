use std::time::Duration;

use serde::{Deserialize, Serialize};
use swadge_flash::{FlashPlan, TargetDevice, Timing};

/// Commands sent from the front end to the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop watching, then cancel and wait for every worker.
    Shutdown,
}

/// Settings stored on disk. Any missing field falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target: TargetDevice,
    /// esptool executable, looked up on `PATH` when not absolute.
    pub esptool: String,
    pub plan: FlashPlan,
    pub settle_before_flash_ms: u64,
    pub settle_before_reset_ms: u64,
    pub poll_interval_ms: u64,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Settings {
    fn default() -> Self {
        let timing = Timing::default();
        Self {
            target: TargetDevice::default(),
            esptool: "esptool.py".to_owned(),
            plan: FlashPlan::default(),
            settle_before_flash_ms: millis(timing.settle_before_flash),
            settle_before_reset_ms: millis(timing.settle_before_reset),
            poll_interval_ms: 50,
        }
    }
}

impl Settings {
    pub fn timing(&self) -> Timing {
        Timing {
            settle_before_flash: Duration::from_millis(self.settle_before_flash_ms),
            settle_before_reset: Duration::from_millis(self.settle_before_reset_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
