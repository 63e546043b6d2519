//! Cooperative suspension for asynchronous algorithms.
//!
//! An asynchronous algorithm runs as a task on the scheduler's executor and
//! may be resumed on any executor thread. [`WithContext`] is the post-resume
//! hook: every poll of the wrapped task installs the task's own
//! [`EventContext`] as the thread's current context and restores whatever
//! was there before once the poll returns. The helpers below ([`yield_now`],
//! [`sleep_for`], [`sleep_until`], [`suspend_on`]) record the context before
//! suspending and check, on resume, that the thread reports the same slot
//! again. A mismatch is fatal to the task.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use eventide_core::{ContextGuard, EventContext, current_context};
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuspendError {
    #[error("suspension point reached with no current event context")]
    NoContext,
    #[error("context lost across suspension: expected {expected}, found {found}")]
    ContextLost { expected: String, found: String },
}

// ── Post-resume hook ──────────────────────────────────────────

/// A future that runs with `ctx` as the thread's current context on every
/// poll.
pub struct WithContext<F> {
    ctx: EventContext,
    inner: Pin<Box<F>>,
}

impl<F: Future> WithContext<F> {
    pub fn new(ctx: EventContext, inner: F) -> Self {
        Self {
            ctx,
            inner: Box::pin(inner),
        }
    }

    pub fn context(&self) -> &EventContext {
        &self.ctx
    }
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let _guard = ContextGuard::enter(this.ctx.clone());
        this.inner.as_mut().poll(cx)
    }
}

/// Attach an event context to any future.
pub trait InContext: Future + Sized {
    fn in_context(self, ctx: EventContext) -> WithContext<Self> {
        WithContext::new(ctx, self)
    }
}

impl<F: Future> InContext for F {}

// ── Saved context ─────────────────────────────────────────────

/// The context a task was serving when it suspended.
#[derive(Debug, Clone)]
pub struct SavedContext(EventContext);

impl SavedContext {
    /// Record the current thread's context.
    pub fn capture() -> Result<Self, SuspendError> {
        current_context().map(Self).ok_or(SuspendError::NoContext)
    }

    pub fn context(&self) -> &EventContext {
        &self.0
    }

    /// Install the recorded context on this thread until the guard drops.
    /// For executors that resume tasks without a [`WithContext`] wrapper.
    pub fn resume(&self) -> ContextGuard {
        ContextGuard::enter(self.0.clone())
    }

    /// Check that this thread reports the recorded slot again.
    pub fn verify(&self) -> Result<(), SuspendError> {
        match current_context() {
            Some(ctx) if ctx.same_coordinates(&self.0) => Ok(()),
            other => {
                let found = other.map_or_else(|| "none".to_string(), |c| c.to_string());
                error!(expected = %self.0, found = %found, "event context lost across suspension");
                Err(SuspendError::ContextLost {
                    expected: self.0.to_string(),
                    found,
                })
            }
        }
    }
}

// ── Suspension points ─────────────────────────────────────────

/// Await `fut` as a suspension point.
pub async fn suspend_on<F: Future>(fut: F) -> Result<F::Output, SuspendError> {
    let saved = SavedContext::capture()?;
    let out = fut.await;
    saved.verify()?;
    Ok(out)
}

/// Give the executor thread to other ready tasks.
pub async fn yield_now() -> Result<(), SuspendError> {
    suspend_on(tokio::task::yield_now()).await
}

pub async fn sleep_for(duration: Duration) -> Result<(), SuspendError> {
    suspend_on(tokio::time::sleep(duration)).await
}

pub async fn sleep_until(deadline: tokio::time::Instant) -> Result<(), SuspendError> {
    suspend_on(tokio::time::sleep_until(deadline)).await
}
