//! Per-request context: operator identity, deadline and cancellation.
//!
//! Services receive a [`RequestContext`] from the adapter layer and wrap
//! every store and cache call in [`RequestContext::run`], so that an expired
//! deadline surfaces as [`OrgChartError::Timeout`] and an aborted request as
//! [`OrgChartError::Cancelled`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{OrgChartError, OrgChartResult};

/// The operator on whose behalf a mutation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Fallback identity used for audit records when the adapter could not
    /// identify the operator.
    pub fn system() -> Self {
        Self::new("system", "System")
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    actor: Actor,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn system() -> Self {
        Self::new(Actor::system())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns a copy carrying `timeout` as deadline unless one is set.
    pub fn or_timeout(&self, timeout: Duration) -> Self {
        let mut ctx = self.clone();
        if ctx.deadline.is_none() {
            ctx.deadline = Some(Instant::now() + timeout);
        }
        ctx
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Fail fast when the request is already cancelled or past its deadline.
    pub fn check(&self) -> OrgChartResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(OrgChartError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(OrgChartError::Timeout);
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the request is cancelled or its
    /// deadline passes first.
    pub async fn run<T>(
        &self,
        fut: impl Future<Output = OrgChartResult<T>>,
    ) -> OrgChartResult<T> {
        self.check()?;

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => Err(OrgChartError::Cancelled),
                result = fut => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(OrgChartError::Timeout)),
            None => guarded.await,
        }
    }

    /// Drive a store write to completion. Request cancellation is only
    /// checked before the write starts: once issued, the write is not
    /// abandoned because the caller went away, so post-commit work still
    /// sees its outcome. The deadline still applies.
    pub async fn commit<T>(
        &self,
        fut: impl Future<Output = OrgChartResult<T>>,
    ) -> OrgChartResult<T> {
        self.check()?;
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .unwrap_or(Err(OrgChartError::Timeout)),
            None => fut.await,
        }
    }

    /// Derive a context for work that must still run after the originating
    /// request was cancelled (post-commit cache invalidation). The new
    /// context keeps the actor, drops the cancellation and gets a fresh
    /// deadline.
    pub fn background(&self, timeout: Duration) -> Self {
        Self {
            actor: self.actor.clone(),
            deadline: Some(Instant::now() + timeout),
            cancellation: CancellationToken::new(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::system()
    }
}
