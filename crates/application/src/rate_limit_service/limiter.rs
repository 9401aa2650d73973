use std::future::Future;
use std::sync::Arc;

use tempo_core::AppResult;
use tempo_domain::{BlockStatus, CountingMode, ThrottlePolicy, ThrottleStatus};

use super::service::{AttemptInfo, ThrottleService};

/// Outcome of a guarded operation.
#[derive(Debug)]
pub enum Guarded<T> {
    /// The client was blocked and the operation never ran.
    Rejected(BlockStatus),
    /// The operation ran to completion.
    Completed(T),
}

/// A throttle bound to one policy and counting mode.
///
/// Cheap to clone; bind one per protected route group.
#[derive(Clone)]
pub struct Limiter {
    service: ThrottleService,
    policy: Arc<ThrottlePolicy>,
    mode: CountingMode,
}

impl Limiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(service: ThrottleService, policy: ThrottlePolicy, mode: CountingMode) -> Self {
        Self {
            service,
            policy: Arc::new(policy),
            mode,
        }
    }

    /// Returns the bound policy.
    #[must_use]
    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Returns the counting mode.
    #[must_use]
    pub fn mode(&self) -> CountingMode {
        self.mode
    }

    /// Returns the limiter namespace.
    #[must_use]
    pub fn limit_type(&self) -> &str {
        self.policy.limit_type()
    }

    /// Returns the current block decision for a client.
    pub async fn is_blocked(&self, client_id: &str) -> BlockStatus {
        self.service
            .check_blocked(client_id, self.policy.limit_type())
            .await
    }

    /// Records one attempt and returns whether it tripped a block.
    pub async fn increment(&self, client_id: &str) -> bool {
        self.service.record_attempt(client_id, &self.policy).await
    }

    /// Records one attempt and returns the resulting window state.
    pub async fn track(&self, client_id: &str) -> AttemptInfo {
        self.service.track_attempt(client_id, &self.policy).await
    }

    /// Returns whether the client is blocked or out of allowance.
    pub async fn is_limited(&self, client_id: &str) -> bool {
        self.service.is_limited(client_id, &self.policy).await
    }

    /// Returns the client's standing.
    pub async fn status(&self, client_id: &str) -> AppResult<ThrottleStatus> {
        self.service.status(client_id, &self.policy).await
    }

    /// Clears every window and block for the client.
    pub async fn reset(&self, client_id: &str) -> AppResult<u64> {
        self.service
            .reset(client_id, self.policy.limit_type())
            .await
    }

    /// Records an attempt if the counting mode counts this outcome.
    pub async fn record_outcome(&self, client_id: &str, succeeded: bool) -> Option<AttemptInfo> {
        if !self.mode.counts(succeeded) {
            return None;
        }

        Some(self.track(client_id).await)
    }

    /// Runs `operation` unless the client is blocked, then records the
    /// outcome according to the counting mode.
    ///
    /// The future is not polled when the client is blocked. `succeeded`
    /// classifies an `Ok` value; an `Err` always counts as a failure and is
    /// returned unchanged after the attempt is recorded.
    pub async fn guard<T, E, Fut>(
        &self,
        client_id: &str,
        succeeded: impl FnOnce(&T) -> bool,
        operation: Fut,
    ) -> Result<Guarded<T>, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let block = self.is_blocked(client_id).await;
        if block.blocked {
            return Ok(Guarded::Rejected(block));
        }

        match operation.await {
            Ok(value) => {
                self.record_outcome(client_id, succeeded(&value)).await;
                Ok(Guarded::Completed(value))
            }
            Err(error) => {
                self.record_outcome(client_id, false).await;
                Err(error)
            }
        }
    }
}
