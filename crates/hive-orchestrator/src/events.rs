use hive_core::{channels, AgentInfo, AgentStatus, HiveResult, ModelId, OrchestratorCommand};
use hive_registry::CapabilityProbe;
use hive_store::{QueueStore, TransactionLogEntry, TxEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Start every background loop and pub/sub listener. Returns the
    /// handles; aborting them shuts the orchestrator down.
    ///
    /// Loops: assignment tick, stuck-task scan, due-retry promotion, failure
    /// analysis, heartbeat sweep, queue balancing, health publishing, and
    /// (given a probe) capability discovery. Listeners: registration, status,
    /// errors, completions, failures, and operator commands.
    pub async fn run(
        self: &Arc<Self>,
        probe: Option<Arc<dyn CapabilityProbe>>,
    ) -> HiveResult<Vec<JoinHandle<()>>> {
        {
            let store = self.pool.acquire().await?;
            for queue in ModelId::ALL {
                store
                    .append_tx(TransactionLogEntry::new(
                        TxEvent::Initialized,
                        queue,
                        serde_json::json!({"orchestrator": self.id()}),
                    ))
                    .await?;
            }
        }
        info!(id = %self.id(), "Orchestrator starting");

        let mut handles = Vec::new();

        // --- Periodic loops ---

        let o = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(o.config.tick_interval_ms));
            loop {
                tick.tick().await;
                if let Err(e) = o.tick().await {
                    // StoreUnavailable is orchestrator-fatal for this tick
                    // only: log and retry on the next one, never drop work.
                    error!(error = %e, "Assignment tick failed; retrying next tick");
                }
            }
        }));

        let o = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(o.config.stuck_scan_interval_secs));
            loop {
                tick.tick().await;
                if let Err(e) = o.scan_stuck_tasks().await {
                    error!(error = %e, "Stuck-task scan failed");
                }
            }
        }));

        let o = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(
                o.config.retry_promotion_interval_ms,
            ));
            loop {
                tick.tick().await;
                if let Err(e) = o.process_due_retries().await {
                    error!(error = %e, "Retry promotion failed");
                }
                if let Err(e) = o.process_failures().await {
                    error!(error = %e, "Failure analysis failed");
                }
            }
        }));

        let o = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(o.config.heartbeat_interval_secs));
            loop {
                tick.tick().await;
                if let Err(e) = o.sweep_heartbeats().await {
                    error!(error = %e, "Heartbeat sweep failed");
                }
            }
        }));

        let o = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(o.config.balance_interval_secs));
            loop {
                tick.tick().await;
                if let Err(e) = o.rebalance().await {
                    error!(error = %e, "Queue balancing failed");
                }
            }
        }));

        let o = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(o.config.health_check_interval_secs));
            loop {
                tick.tick().await;
                if let Err(e) = o.publish_health().await {
                    error!(error = %e, "Health publish failed");
                }
            }
        }));

        if let Some(probe) = probe {
            let o = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let mut tick =
                    tokio::time::interval(Duration::from_secs(o.config.discovery_interval_secs));
                loop {
                    tick.tick().await;
                    let agents = match o.pool.acquire().await {
                        Ok(store) => store.list_agents().await,
                        Err(e) => Err(e),
                    };
                    match agents {
                        Ok(agents) => {
                            if let Err(e) = o.matcher.discovery_pass(&agents, probe.as_ref()).await
                            {
                                error!(error = %e, "Capability discovery failed");
                            }
                        }
                        Err(e) => error!(error = %e, "Capability discovery could not list agents"),
                    }
                }
            }));
        }

        // --- Pub/sub listeners ---

        for channel in [
            channels::AGENT_REGISTER,
            channels::AGENT_STATUS,
            channels::AGENT_ERROR,
            channels::TASK_COMPLETE,
            channels::TASK_FAILED,
            channels::ORCHESTRATOR_COMMAND,
        ] {
            let o = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                o.listen(channel).await;
            }));
        }

        Ok(handles)
    }

    async fn listen(self: Arc<Self>, channel: &'static str) {
        let mut rx = match self.bus.subscribe(channel).await {
            Ok(rx) => rx,
            Err(e) => {
                error!(channel, error = %e, "Subscription failed");
                return;
            }
        };
        loop {
            match rx.recv().await {
                Ok(raw) => {
                    // Tampered or unverifiable envelopes are logged by the
                    // bus and dropped here.
                    let Ok(payload) = self.bus.open_envelope(&raw) else {
                        continue;
                    };
                    if let Err(e) = self.dispatch(channel, payload).await {
                        warn!(channel, error = %e, "Message handling failed");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(channel, missed, "Subscriber lagged; messages dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn dispatch(&self, channel: &str, payload: serde_json::Value) -> HiveResult<()> {
        match channel {
            channels::AGENT_REGISTER => {
                let agent: AgentInfo = serde_json::from_value(payload)?;
                self.register_agent(agent).await
            }
            channels::AGENT_STATUS => self.apply_status_report(&payload).await,
            channels::AGENT_ERROR => {
                warn!(
                    agent_id = payload["agent_id"].as_str().unwrap_or("?"),
                    error = payload["error"].as_str().unwrap_or("?"),
                    "Agent reported an error"
                );
                Ok(())
            }
            channels::TASK_COMPLETE => {
                let (queue, task_id, agent_id) = parse_report(&payload)?;
                let duration_ms = payload["duration_ms"].as_u64().unwrap_or(0);
                self.handle_completion(queue, &task_id, &agent_id, duration_ms)
                    .await
            }
            channels::TASK_FAILED => {
                let (queue, task_id, agent_id) = parse_report(&payload)?;
                let error_text = payload["error"].as_str().unwrap_or("unknown error");
                self.handle_failure(queue, &task_id, &agent_id, error_text).await
            }
            channels::ORCHESTRATOR_COMMAND => {
                let command: OrchestratorCommand = serde_json::from_value(payload)?;
                self.handle_command(command).await
            }
            other => {
                warn!(channel = other, "Message on unexpected channel");
                Ok(())
            }
        }
    }

    async fn apply_status_report(&self, payload: &serde_json::Value) -> HiveResult<()> {
        let agent_id = payload["agent_id"]
            .as_str()
            .ok_or_else(|| hive_core::HiveError::Orchestrator("status report without agent_id".into()))?
            .to_string();
        if payload["deregister"].as_bool().unwrap_or(false) {
            return self.deregister_agent(&agent_id).await;
        }
        let load = payload["current_load"].as_u64();
        let status: Option<AgentStatus> = payload
            .get("status")
            .and_then(|s| serde_json::from_value(s.clone()).ok());

        let store = self.pool.acquire().await?;
        self.update_agent(&store, &agent_id, |agent| {
            if let Some(load) = load {
                agent.current_load = load as u32;
            }
            if let Some(status) = status {
                agent.status = status;
            }
        })
        .await
    }
}

/// Pull `(queue, task_id, agent_id)` out of a completion/failure report.
fn parse_report(payload: &serde_json::Value) -> HiveResult<(ModelId, String, String)> {
    let queue_name = payload["queue"]
        .as_str()
        .ok_or_else(|| hive_core::HiveError::Orchestrator("report without queue".into()))?;
    let queue = Orchestrator::parse_queue_name(queue_name)?;
    let task_id = payload["task_id"]
        .as_str()
        .ok_or_else(|| hive_core::HiveError::Orchestrator("report without task_id".into()))?;
    let agent_id = payload["agent_id"]
        .as_str()
        .ok_or_else(|| hive_core::HiveError::Orchestrator("report without agent_id".into()))?;
    Ok((queue, task_id.to_string(), agent_id.to_string()))
}
