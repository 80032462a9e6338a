use crate::Collector;
use anyhow::Result;
use pulsemon_common::types::Metric;
use sysinfo::System;

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let swap_total = self.system.total_swap();
        let swap_used = self.system.used_swap();

        Ok(vec![
            Metric::gauge("TotalMemory", total as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
            Metric::gauge("AvailableMemory", self.system.available_memory() as f64),
            Metric::gauge("UsedMemory", used as f64),
            Metric::gauge("UsedMemoryPercent", percent(used, total)),
            Metric::gauge("TotalSwap", swap_total as f64),
            Metric::gauge("UsedSwap", swap_used as f64),
            Metric::gauge("UsedSwapPercent", percent(swap_used, swap_total)),
        ])
    }
}
