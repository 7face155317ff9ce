//! Best-effort audit trail.
//!
//! Writes never fail or stall the primary operation: each append is bounded
//! by the storage timeout, and a failed or timed-out append is reported at
//! error level so a gap in the trail shows up in observability.

use std::{sync::Arc, time::Duration};
use tracing::{error, info_span, Instrument};
use uuid::Uuid;

use crate::{
    clock::Clock,
    crypto::SearchHash,
    model::{AuditAction, DenialReason, LoginAttempt, SensitiveAccess},
    store::{with_timeout, AuditSink},
};

/// Where a request came from, as recorded next to each attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    #[must_use]
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            sink,
            clock,
            timeout,
        }
    }

    /// Record one login or refresh attempt. `identifier` is stored as supplied.
    pub async fn log_attempt(
        &self,
        identifier: &str,
        client: &ClientInfo,
        outcome: Result<Uuid, (Option<Uuid>, DenialReason)>,
    ) {
        let (success, account_id, reason) = match outcome {
            Ok(account_id) => (true, Some(account_id), None),
            Err((account_id, reason)) => (false, account_id, Some(reason.as_str().to_string())),
        };
        let attempt = LoginAttempt {
            identifier: identifier.to_string(),
            account_id,
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            success,
            reason,
            attempted_at: self.clock.now(),
        };

        let span = info_span!("audit.attempt", success);
        let append = self.sink.append_attempt(&attempt).instrument(span);
        if let Err(err) = with_timeout(self.timeout, append).await {
            error!(
                error = %err,
                account_id = ?attempt.account_id,
                success,
                "Failed to write login attempt audit record"
            );
        }
    }

    /// Record access to a protected field. Only the value's search hash is kept.
    pub async fn log_sensitive_access(
        &self,
        action: AuditAction,
        entity_type: &str,
        entity_id: Option<&str>,
        actor_id: Option<Uuid>,
        actor_ip: Option<&str>,
        value_hash: Option<&SearchHash>,
    ) {
        let access = SensitiveAccess {
            action,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.map(str::to_string),
            actor_id,
            actor_ip: actor_ip.map(str::to_string),
            value_hash: value_hash.cloned(),
            accessed_at: self.clock.now(),
        };

        let span = info_span!("audit.sensitive", action = action.as_str(), entity_type);
        let append = self.sink.append_access(&access).instrument(span);
        if let Err(err) = with_timeout(self.timeout, append).await {
            error!(
                error = %err,
                action = action.as_str(),
                entity_type,
                "Failed to write sensitive access audit record"
            );
        }
    }
}
