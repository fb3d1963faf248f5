//! Process health sampling

use serde::Serialize;
use std::sync::Mutex;
use sysinfo::{Pid, System};
use tracing::warn;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ProcessHealth {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// Samples CPU and resident memory of the current process.
///
/// CPU usage is computed between consecutive samples, so the first reading
/// after startup is 0.
pub struct HealthProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl HealthProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Process health unavailable: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }

    pub fn sample(&self) -> ProcessHealth {
        let Some(pid) = self.pid else {
            return ProcessHealth::default();
        };

        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !system.refresh_process(pid) {
            return ProcessHealth::default();
        }

        system
            .process(pid)
            .map(|process| ProcessHealth {
                cpu_percent: process.cpu_usage(),
                memory_bytes: process.memory(),
            })
            .unwrap_or_default()
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}
