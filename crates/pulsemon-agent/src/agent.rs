//! Poll and report loops.
//!
//! One poll task samples the collectors every `poll_interval` and publishes
//! the batch through a `watch` channel. Each of `report_workers` report tasks
//! picks up whatever batch is current every `report_interval` and hands it
//! to the shared [`Reporter`]. Gauges are lossy: a batch may be sent twice
//! or not at all if polls and reports drift apart. `PollCount` is not: it
//! carries the number of polls since the last successful delivery.

use crate::config::AgentConfig;
use crate::reporter::Reporter;
use pulsemon_collector::{collect_all, Collector};
use pulsemon_common::types::{Metric, MetricBatch};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

/// Polls not yet acknowledged by the server.
#[derive(Debug, Default)]
pub struct PollCounter(AtomicI64);

impl PollCounter {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Claims every pending poll. A worker that fails to deliver hands the
    /// claim back with [`PollCounter::restore`].
    pub fn take(&self) -> i64 {
        self.0.swap(0, Ordering::SeqCst)
    }

    pub fn restore(&self, polls: i64) {
        self.0.fetch_add(polls, Ordering::SeqCst);
    }

    pub fn pending(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Samples every collector once and appends the `RandomValue` gauge.
pub fn poll_once(collectors: &mut [Box<dyn Collector>]) -> MetricBatch {
    let mut batch = collect_all(collectors);
    batch.push(Metric::gauge(RANDOM_VALUE, rand::random::<f64>()));
    batch
}

pub async fn run_poller(
    mut collectors: Vec<Box<dyn Collector>>,
    every: Duration,
    current: watch::Sender<Arc<MetricBatch>>,
    polls: Arc<PollCounter>,
    shutdown: CancellationToken,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let batch = poll_once(&mut collectors);
                polls.record();
                tracing::debug!(count = batch.len(), pending_polls = polls.pending(), "Polled metrics");
                current.send_replace(Arc::new(batch));
            }
        }
    }
    tracing::debug!("Poll loop stopped");
}

/// Sends the current batch plus the pending poll count. On failure the
/// claimed polls go back to the counter for the next report.
async fn report_once(
    worker: usize,
    reporter: &Reporter,
    current: &watch::Receiver<Arc<MetricBatch>>,
    polls: &PollCounter,
) {
    let mut batch: MetricBatch = (**current.borrow()).clone();
    let claimed = polls.take();
    if claimed > 0 {
        batch.push(Metric::counter(POLL_COUNT, claimed));
    }
    if let Err(e) = reporter.send(&batch).await {
        polls.restore(claimed);
        tracing::error!(
            worker,
            attempts = e.attempts,
            count = batch.len(),
            error = %e.source,
            "Dropping batch after failed delivery"
        );
    }
}

/// Reports every `every` until cancelled. Cancellation is only observed
/// between reports, so a send in progress finishes its retries first.
pub async fn run_report_worker(
    worker: usize,
    reporter: Arc<Reporter>,
    every: Duration,
    current: watch::Receiver<Arc<MetricBatch>>,
    polls: Arc<PollCounter>,
    shutdown: CancellationToken,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => report_once(worker, &reporter, &current, &polls).await,
        }
    }
    tracing::debug!(worker, "Report loop stopped");
}

/// Starts the poll loop and all report workers. Every task stops once
/// `shutdown` is cancelled; join the returned set to wait for them.
pub fn spawn(
    config: &AgentConfig,
    collectors: Vec<Box<dyn Collector>>,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinSet<()>> {
    let reporter = Arc::new(Reporter::new(config)?);
    let (tx, rx) = watch::channel(Arc::new(MetricBatch::new()));
    let polls = Arc::new(PollCounter::default());

    let mut tasks = JoinSet::new();
    tasks.spawn(run_poller(
        collectors,
        config.poll_interval(),
        tx,
        polls.clone(),
        shutdown.clone(),
    ));
    for worker in 0..config.report_workers {
        tasks.spawn(run_report_worker(
            worker,
            reporter.clone(),
            config.report_interval(),
            rx.clone(),
            polls.clone(),
            shutdown.clone(),
        ));
    }

    tracing::info!(
        poll_interval_secs = config.poll_interval_secs,
        report_interval_secs = config.report_interval_secs,
        workers = config.report_workers,
        url = %reporter.url(),
        "Agent loops started"
    );
    Ok(tasks)
}
