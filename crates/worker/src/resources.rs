//! Resource reporting
//!
//! The broker treats resource figures as informational, and OS-level
//! probing (meminfo, vendor GPU tools) lives outside this system, so the
//! probe simply serves the figures operators put in the worker config.

use modelgrid_common::config::ResourceConfig;
use modelgrid_proto::ResourceSnapshot;

/// Produces the snapshot sent at registration and on every periodic push.
#[derive(Debug, Clone)]
pub struct ResourceProbe {
    snapshot: ResourceSnapshot,
}

impl ResourceProbe {
    pub fn from_config(config: &ResourceConfig) -> Self {
        Self {
            snapshot: ResourceSnapshot {
                total_ram: config.total_ram,
                free_ram: config.free_ram,
                total_vram: config.total_vram,
                free_vram: config.free_vram,
            },
        }
    }

    pub fn current(&self) -> ResourceSnapshot {
        self.snapshot
    }
}
