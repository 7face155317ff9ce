//! Periodic cleanup of expired sessions and spent recovery tokens.

use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::store::{RecoveryTokenStore, SessionStore};

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 300;

/// Counts from one pass; `None` when that store failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: Option<u64>,
    pub tokens: Option<u64>,
}

#[derive(Clone)]
pub struct Sweeper {
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<dyn RecoveryTokenStore>,
    interval: Duration,
}

impl Sweeper {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<dyn RecoveryTokenStore>,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            tokens,
            interval,
        }
    }

    /// One pass. Errors are logged and the other store is still swept.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> SweepReport {
        let sessions = match self.sessions.purge_expired().await {
            Ok(count) => Some(count),
            Err(err) => {
                error!(error = %err, "Failed to purge expired sessions");
                None
            }
        };
        let tokens = match self.tokens.purge_expired().await {
            Ok(count) => Some(count),
            Err(err) => {
                error!(error = %err, "Failed to purge recovery tokens");
                None
            }
        };

        if sessions.unwrap_or(0) > 0 || tokens.unwrap_or(0) > 0 {
            info!(?sessions, ?tokens, "Sweep finished");
        } else {
            debug!("Sweep found nothing to purge");
        }
        SweepReport { sessions, tokens }
    }

    /// Run forever on the current runtime. The first pass happens immediately.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}
