//! Runtime samplers for the pulsemon agent.
//!
//! Each [`Collector`] reads one category of host or process statistics
//! (memory, CPU, load, the agent process itself) and returns them as gauge
//! [`Metric`]s ready to be placed in the next batch.

pub mod cpu;
pub mod load;
pub mod memory;
pub mod process;

use anyhow::Result;
use pulsemon_common::types::Metric;

/// A sampler that runs on the agent host.
///
/// Implementations are registered in the agent's poll loop and called once
/// per poll interval.
pub trait Collector: Send + Sync {
    /// Returns the collector name (e.g., `"cpu"`, `"memory"`), used for
    /// logging.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}

/// The default sampler set used by the agent.
pub fn default_collectors() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(memory::MemoryCollector::new()),
        Box::new(cpu::CpuCollector::new()),
        Box::new(load::LoadCollector::new()),
        Box::new(process::ProcessCollector::new()),
    ]
}

/// Runs every collector, logging and skipping the ones that fail.
pub fn collect_all(collectors: &mut [Box<dyn Collector>]) -> Vec<Metric> {
    let mut metrics = Vec::new();
    for collector in collectors.iter_mut() {
        match collector.collect() {
            Ok(mut sampled) => metrics.append(&mut sampled),
            Err(e) => {
                tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
            }
        }
    }
    metrics
}
