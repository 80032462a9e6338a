use crate::Collector;
use anyhow::Result;
use pulsemon_common::types::Metric;
use sysinfo::System;

/// Overall and per-core CPU utilization in percent.
///
/// Cores are reported as `CPUutilization1`, `CPUutilization2`, ... in
/// enumeration order.
pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_cpu_all();

        let mut metrics = vec![Metric::gauge(
            "CPUutilization",
            self.system.global_cpu_usage() as f64,
        )];
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", i + 1),
                cpu.cpu_usage() as f64,
            ));
        }
        Ok(metrics)
    }
}
