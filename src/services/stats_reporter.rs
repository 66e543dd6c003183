//! Periodic pipeline statistics log line, driven by a cron schedule.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::error::PipelineError;
use crate::resilience::CircuitState;
use crate::services::orchestrator::{PipelineStats, StatsHandle};

/// Every five minutes.
pub const DEFAULT_STATS_CRON: &str = "0 */5 * * * *";

/// Breaker states published by the dispatch task for the reporter to read.
pub type BreakerStates = Arc<Mutex<HashMap<String, CircuitState>>>;

pub struct StatsReporter {
    stats: StatsHandle,
    breakers: BreakerStates,
    schedule: String,
    scheduler: Option<JobScheduler>,
}

impl StatsReporter {
    pub fn new(stats: StatsHandle, breakers: BreakerStates, schedule: Option<String>) -> Self {
        Self {
            stats,
            breakers,
            schedule: schedule.unwrap_or_else(|| DEFAULT_STATS_CRON.to_string()),
            scheduler: None,
        }
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    /// One formatted report line; also used for the final report at shutdown.
    pub fn render(stats: &PipelineStats, breakers: &HashMap<String, CircuitState>) -> String {
        let mut names: Vec<_> = breakers.iter().collect();
        names.sort_by(|a, b| a.0.cmp(b.0));
        let circuits = names
            .into_iter()
            .map(|(name, state)| format!("{}={}", name, state.as_str()))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "received={} processed={} rejected={} failed={} | orders placed={} filled={} failed={} | avg_exec={:.1}ms | circuits[{}]",
            stats.alerts_received,
            stats.alerts_processed,
            stats.alerts_rejected,
            stats.alerts_failed,
            stats.orders_placed,
            stats.orders_filled,
            stats.orders_failed,
            stats.execution.avg_execution_time_ms,
            circuits
        )
    }

    pub fn report_now(&self) -> String {
        let breakers = self.breakers.lock().map(|b| b.clone()).unwrap_or_default();
        let line = Self::render(&self.stats.snapshot(), &breakers);
        info!("📊 [STATS] {}", line);
        line
    }

    pub async fn start(&mut self) -> Result<(), PipelineError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| PipelineError::Scheduler(e.to_string()))?;

        let stats = self.stats.clone();
        let breakers = self.breakers.clone();

        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let stats = stats.clone();
            let breakers = breakers.clone();

            Box::pin(async move {
                let states = breakers.lock().map(|b| b.clone()).unwrap_or_default();
                info!("📊 [STATS] {}", Self::render(&stats.snapshot(), &states));
            })
        })
        .map_err(|e| PipelineError::Scheduler(e.to_string()))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| PipelineError::Scheduler(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| PipelineError::Scheduler(e.to_string()))?;

        info!("🔔 [STATS] Reporter scheduled: {}", self.schedule);
        self.scheduler = Some(scheduler);
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.shutdown().await {
                tracing::warn!("⚠️ [STATS] Scheduler shutdown failed: {}", e);
            }
        }
        self.report_now();
    }
}
