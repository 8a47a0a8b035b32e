//! Sequential probe runner.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClientHandle, Connector, MqttConnector, Released};
use crate::config::{ProbeConfig, generate_client_id};
use crate::outcome::{AttemptOutcome, AttemptRecord, Tally};
use crate::reason::{ReasonCode, is_transport_refusal};
use crate::report::ProbeReport;

type AttemptCallback = Box<dyn Fn(&AttemptRecord, u32) + Send + Sync>;

/// What one attempt observed, before it is turned into a record.
struct Observation {
    outcome: AttemptOutcome,
    code: Option<ReasonCode>,
    message: Option<String>,
}

impl Observation {
    fn connected() -> Self {
        Self {
            outcome: AttemptOutcome::Connected,
            code: None,
            message: None,
        }
    }

    fn failure(code: ReasonCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            outcome: AttemptOutcome::from_failure(code, message.clone()),
            code: Some(code),
            message: Some(message),
        }
    }
}

/// Runs connection attempts one after another and classifies each outcome.
pub struct ProbeRunner<C: Connector = MqttConnector> {
    config: Arc<ProbeConfig>,
    connector: Arc<C>,
    on_attempt: Option<AttemptCallback>,
}

impl ProbeRunner<MqttConnector> {
    /// Create a runner that connects with rumqttc.
    pub fn new(config: ProbeConfig) -> Self {
        let config = Arc::new(config);
        let connector = MqttConnector::new(Arc::clone(&config));
        Self::from_parts(config, connector)
    }
}

impl<C: Connector> ProbeRunner<C> {
    /// Create a runner with a custom connector.
    pub fn with_connector(config: ProbeConfig, connector: C) -> Self {
        Self::from_parts(Arc::new(config), connector)
    }

    fn from_parts(config: Arc<ProbeConfig>, connector: C) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            on_attempt: None,
        }
    }

    /// Call `f` with each record and the planned attempt count as soon as the
    /// attempt completes.
    pub fn with_on_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptRecord, u32) + Send + Sync + 'static,
    {
        self.on_attempt = Some(Box::new(f));
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run all configured attempts.
    ///
    /// Cancelling `cancel` stops the run at the next delay (or before the next
    /// attempt). The report then covers the attempts that completed.
    pub async fn run(&self, cancel: &CancellationToken) -> ProbeReport {
        let started_at = Utc::now();
        let planned = self.config.attempts;
        let run_client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id);

        info!(
            "Probing {} with {} attempts ({}ms apart)",
            self.config.broker_addr(),
            planned,
            self.config.delay_ms
        );
        if self.config.auto_reconnect {
            warn!("Auto-reconnect is enabled; retries can hide a missing CONNACK");
        }

        let mut tally = Tally::default();
        let mut attempts = Vec::with_capacity(planned as usize);
        let mut cancelled = false;

        for index in 1..=planned {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let client_id = if self.config.fresh_client_id {
                generate_client_id()
            } else {
                run_client_id.clone()
            };

            let record = self.attempt(index, client_id).await;
            tally.record(&record.outcome);
            if let Some(f) = &self.on_attempt {
                f(&record, planned);
            }
            attempts.push(record);
            debug_assert_eq!(tally.total(), attempts.len());

            if index < planned {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = sleep(self.config.delay()) => {}
                }
            }
        }

        if cancelled {
            warn!("Run cancelled after {} of {} attempts", attempts.len(), planned);
        }

        ProbeReport {
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            broker: self.config.broker_addr(),
            planned,
            cancelled,
            tally,
            attempts,
        }
    }

    /// Run one attempt in its own task so that a panic inside the client
    /// library is classified instead of tearing down the run.
    async fn attempt(&self, index: u32, client_id: String) -> AttemptRecord {
        let start = Instant::now();
        let connector = Arc::clone(&self.connector);
        let id = client_id.clone();

        let task = tokio::spawn(async move { probe_once(connector.as_ref(), &id).await });
        let observation = match task.await {
            Ok(observation) => observation,
            Err(e) => {
                warn!("Attempt {} aborted: {}", index, e);
                Observation::failure(
                    ReasonCode::CLIENT_EXCEPTION,
                    format!("attempt task failed: {}", e),
                )
            }
        };

        let transport_refusal = match &observation {
            Observation {
                outcome: AttemptOutcome::RefusedWithoutAck { .. },
                code: Some(code),
                message: Some(message),
            } => is_transport_refusal(*code, message),
            _ => false,
        };

        match &observation.outcome {
            AttemptOutcome::Connected => info!("Attempt {}: connected", index),
            AttemptOutcome::RefusedWithAck { kind } => {
                info!("Attempt {}: refused with CONNACK: {}", index, kind)
            }
            AttemptOutcome::RefusedWithoutAck { kind, message } => {
                info!("Attempt {}: no CONNACK: {}: {}", index, kind, message)
            }
        }
        if transport_refusal {
            warn!(
                "Attempt {}: TCP-level connection failure, likely no CONNACK was received",
                index
            );
        }

        AttemptRecord {
            index,
            client_id,
            outcome: observation.outcome,
            code: observation.code,
            message: observation.message,
            transport_refusal,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Acquire, connect, disconnect and release one client handle.
async fn probe_once<C: Connector>(connector: &C, client_id: &str) -> Observation {
    let handle = match connector.acquire(client_id) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Could not acquire client handle {}: {}", client_id, e);
            return Observation::failure(ReasonCode::CLIENT_EXCEPTION, e.to_string());
        }
    };
    let mut handle = Released::new(handle);

    let observation = match handle.connect().await {
        Ok(()) if handle.is_connected() => match handle.disconnect().await {
            Ok(()) => Observation::connected(),
            Err(failure) => {
                warn!("Disconnect of {} failed: {}", client_id, failure);
                Observation::failure(
                    ReasonCode::CLIENT_EXCEPTION,
                    format!("disconnect after successful connect failed: {}", failure.message),
                )
            }
        },
        Ok(()) => {
            warn!("Connect for {} returned without an active connection", client_id);
            Observation::failure(
                ReasonCode::CLIENT_EXCEPTION,
                "connect reported success but the client is not connected",
            )
        }
        Err(failure) => {
            debug!("Connect for {} failed: {}", client_id, failure);
            Observation::failure(failure.code, failure.message)
        }
    };

    handle.close();
    observation
}
