use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::execution_engine::RunHandle;
use crate::application::trigger::TriggerDispatcher;
use crate::config::EngineConfig;
use crate::domain::repository::WorkflowRepository;
use crate::domain::workflow::WorkflowId;
use crate::{CoreError, DataPacket};

/// Fires active workflows on the `scheduled` execution mode
///
/// A workflow first becomes due one interval after the runner sees it
/// active. Workflows that stop being active or scheduled are forgotten, so
/// reactivating one restarts its interval.
pub struct ScheduleRunner {
    repo: Arc<dyn WorkflowRepository>,
    dispatcher: TriggerDispatcher,
    tick: Duration,
    last_fired: HashMap<WorkflowId, Instant>,
}

impl ScheduleRunner {
    /// Create a new runner polling every `scheduler_tick_ms`
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        dispatcher: TriggerDispatcher,
        config: &EngineConfig,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            tick: config.scheduler_tick(),
            last_fired: HashMap::new(),
        }
    }

    /// Check every scheduled workflow once, starting the runs that are due
    pub async fn tick(&mut self, now: Instant) -> Result<Vec<RunHandle>, CoreError> {
        let scheduled: Vec<(WorkflowId, Duration)> = self
            .repo
            .find_active()
            .await?
            .into_iter()
            .filter_map(|w| w.settings.schedule.interval().map(|i| (w.id, i)))
            .collect();

        self.last_fired
            .retain(|id, _| scheduled.iter().any(|(scheduled_id, _)| scheduled_id == id));

        let mut handles = Vec::new();
        for (workflow_id, interval) in scheduled {
            let Some(last) = self.last_fired.get(&workflow_id).copied() else {
                debug!(workflow_id = %workflow_id, ?interval, "Scheduling workflow");
                self.last_fired.insert(workflow_id, now);
                continue;
            };
            if now.saturating_duration_since(last) < interval {
                continue;
            }

            self.last_fired.insert(workflow_id.clone(), now);
            match self.dispatcher.run_now(&workflow_id, DataPacket::null()).await {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(workflow_id = %workflow_id, error = %e, "Scheduled run failed to start"),
            }
        }
        Ok(handles)
    }

    /// Run the polling loop until `shutdown` is cancelled
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(tick_ms = self.tick.as_millis() as u64, "Schedule runner started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    instant = interval.tick() => {
                        if let Err(e) = self.tick(instant).await {
                            warn!(error = %e, "Schedule tick failed");
                        }
                    }
                }
            }
            info!("Schedule runner stopped");
        })
    }
}
