//! Event context and the per-thread "current context" cell.
//!
//! An [`EventContext`] names one event (by number) occupying one processing
//! slot, optionally a sub-slot when it belongs to a view. Legacy algorithm
//! code that cannot take the context as a parameter reads it back through
//! [`current_context`]; the scheduler installs it with a [`ContextGuard`]
//! around every invocation.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Sentinel event number meaning "not set".
pub const INVALID_EVENT: u64 = u64::MAX;

/// Sentinel slot index meaning "not set".
pub const INVALID_SLOT: usize = usize::MAX;

/// Identity metadata of an event as delivered by the input source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId {
    pub run: u32,
    pub event: u64,
    pub time: Option<DateTime<Utc>>,
}

impl EventId {
    pub fn new(run: u32, event: u64) -> Self {
        Self {
            run,
            event,
            time: None,
        }
    }
}

/// One (event number, slot index) pair plus optional payload.
///
/// Cloning is cheap: the extension payload is reference counted.
#[derive(Clone)]
pub struct EventContext {
    evt: u64,
    slot: usize,
    sub_slot: Option<usize>,
    valid: bool,
    event_id: Option<EventId>,
    extension: Option<Arc<dyn Any + Send + Sync>>,
}

impl Default for EventContext {
    fn default() -> Self {
        Self {
            evt: INVALID_EVENT,
            slot: INVALID_SLOT,
            sub_slot: None,
            valid: false,
            event_id: None,
            extension: None,
        }
    }
}

impl EventContext {
    pub fn new(evt: u64, slot: usize) -> Self {
        let mut ctx = Self::default();
        ctx.set(evt, slot);
        ctx
    }

    /// A context for event `evt` whose slot is chosen at admission.
    pub fn for_event(evt: u64) -> Self {
        Self {
            evt,
            ..Self::default()
        }
    }

    pub fn evt(&self) -> u64 {
        self.evt
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn sub_slot(&self) -> Option<usize> {
        self.sub_slot
    }

    pub fn uses_sub_slot(&self) -> bool {
        self.sub_slot.is_some()
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Set both coordinates; validity follows from them.
    pub fn set(&mut self, evt: u64, slot: usize) {
        self.evt = evt;
        self.slot = slot;
        self.valid = evt != INVALID_EVENT && slot != INVALID_SLOT;
    }

    /// Setting the sentinel invalidates the context. Any other value leaves
    /// the validity flag as it was.
    pub fn set_evt(&mut self, evt: u64) {
        if evt == INVALID_EVENT {
            self.valid = false;
        }
        self.evt = evt;
    }

    pub fn set_slot(&mut self, slot: usize) {
        if slot == INVALID_SLOT {
            self.valid = false;
        }
        self.slot = slot;
    }

    /// Mark the context valid or invalid. Marking valid only succeeds when
    /// neither coordinate is a sentinel.
    pub fn set_valid(&mut self, valid: bool) -> bool {
        self.valid = valid && self.evt != INVALID_EVENT && self.slot != INVALID_SLOT;
        self.valid
    }

    pub fn set_sub_slot(&mut self, sub_slot: usize) {
        self.sub_slot = Some(sub_slot);
    }

    pub fn event_id(&self) -> Option<&EventId> {
        self.event_id.as_ref()
    }

    pub fn set_event_id(&mut self, id: EventId) {
        self.event_id = Some(id);
    }

    pub fn set_extension<T: Any + Send + Sync>(&mut self, value: T) {
        self.extension = Some(Arc::new(value));
    }

    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// Typed view of the extension payload, `None` if absent or of another type.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extension.as_deref().and_then(|e| e.downcast_ref::<T>())
    }

    pub fn reset_extension(&mut self) {
        self.extension = None;
    }

    /// Same event, slot and sub-slot.
    pub fn same_coordinates(&self, other: &EventContext) -> bool {
        self.evt == other.evt && self.slot == other.slot && self.sub_slot == other.sub_slot
    }
}

impl PartialEq for EventContext {
    fn eq(&self, other: &Self) -> bool {
        self.same_coordinates(other) && self.valid == other.valid && self.event_id == other.event_id
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid {
            return f.write_str("INVALID");
        }
        write!(f, "s: {}  e: {}", self.slot, self.evt)?;
        if let Some(sub) = self.sub_slot {
            write!(f, " sub: {sub}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("evt", &self.evt)
            .field("slot", &self.slot)
            .field("sub_slot", &self.sub_slot)
            .field("valid", &self.valid)
            .field("event_id", &self.event_id)
            .field("extension", &self.extension.is_some())
            .finish()
    }
}

// ── Thread-local current context ─────────────────────────────

thread_local! {
    static CURRENT: RefCell<Option<EventContext>> = const { RefCell::new(None) };
}

/// The context the calling thread is presently working for, if any.
pub fn current_context() -> Option<EventContext> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Replace the calling thread's current context, returning the previous one.
pub fn set_current_context(ctx: Option<EventContext>) -> Option<EventContext> {
    CURRENT.with(|c| std::mem::replace(&mut *c.borrow_mut(), ctx))
}

/// Installs a context on the current thread for the guard's lifetime and
/// restores whatever was there before on drop.
#[must_use = "the context is uninstalled when the guard is dropped"]
pub struct ContextGuard {
    previous: Option<EventContext>,
}

impl ContextGuard {
    pub fn enter(ctx: EventContext) -> Self {
        Self {
            previous: set_current_context(Some(ctx)),
        }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        set_current_context(self.previous.take());
    }
}
