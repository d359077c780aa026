//! Control plane: periodic lease expiry and cron emission.
//!
//! Engine operations are synchronous and block on the store lock, so each
//! round runs on the blocking pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Configuration for the control plane.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Pause between maintenance rounds.
    pub poll_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Runs [`Engine::expire`] and [`Engine::ticker`] until shut down.
pub struct ControlPlane {
    engine: Arc<Engine>,
    config: ControlConfig,
    shutdown: Arc<Notify>,
    rounds: Arc<AtomicUsize>,
}

impl Clone for ControlPlane {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            rounds: Arc::clone(&self.rounds),
        }
    }
}

impl ControlPlane {
    pub fn new(engine: Arc<Engine>, config: ControlConfig) -> Self {
        Self {
            engine,
            config,
            shutdown: Arc::new(Notify::new()),
            rounds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Signal the control plane to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Completed maintenance rounds.
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Run the maintenance loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        info!(
            worker = self.engine.worker(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "control plane started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("control plane shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if let Err(e) = self.maintain().await {
                error!("maintenance error: {e}");
            }
            self.rounds.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One round: reclaim lapsed leases, then advance cron templates.
    async fn maintain(&self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            match engine.expire() {
                Ok(()) => {}
                Err(e) if e.is_task_not_revoked() => warn!("fairness not restored: {e}"),
                Err(e) => return Err(e),
            }
            engine.ticker()?;
            debug!("maintenance round done");
            Ok(())
        })
        .await
        .map_err(|e| Error::Other(format!("maintenance task panicked: {e}")))?
    }
}
