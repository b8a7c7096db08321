//! Listener bus: ordered, named-phase handler registration.
//!
//! A [`ListenerSet`] is an ordered list of `(phase, name, handler)` entries.
//! A request attaches several sets (core, format, service, global, client,
//! request-local) to a [`ListenerBus`]; invoking a phase runs every matching
//! handler in attachment order, FIFO within a set, and stops at the first
//! handler that returns an error.
//!
//! The bus has no synchronization of its own. It runs on whichever task is
//! driving the owning request.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use cumulus_core::RequestError;

use crate::request::RequestContext;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// A named step of the request pipeline. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Validate,
    Build,
    Sign,
    Send,
    ExtractError,
    ExtractData,
    Retry,
    Complete,
}

impl Phase {
    /// Phases of one attempt before the response is classified.
    pub const ATTEMPT: [Phase; 4] = [Self::Validate, Self::Build, Self::Sign, Self::Send];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Build => "build",
            Self::Sign => "sign",
            Self::Send => "send",
            Self::ExtractError => "extractError",
            Self::ExtractData => "extractData",
            Self::Retry => "retry",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PhaseHandler
// ---------------------------------------------------------------------------

/// A listener for one phase.
///
/// Handlers may mutate the context (set headers, populate parsed data) or
/// fail, which aborts the remaining handlers of the phase and fails the
/// attempt. Handlers that touch cumulative state must tolerate being re-run
/// on every retry.
#[async_trait]
pub trait PhaseHandler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RequestError>;
}

/// Adapter turning a synchronous closure into a [`PhaseHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> PhaseHandler for FnHandler<F>
where
    F: Fn(&mut RequestContext) -> Result<(), RequestError> + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), RequestError> {
        (self.0)(ctx)
    }
}

/// Wraps a synchronous closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn PhaseHandler>
where
    F: Fn(&mut RequestContext) -> Result<(), RequestError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// ---------------------------------------------------------------------------
// ListenerSet
// ---------------------------------------------------------------------------

/// One registered handler.
#[derive(Clone)]
pub struct Listener {
    pub phase: Phase,
    pub name: Cow<'static, str>,
    pub handler: Arc<dyn PhaseHandler>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("phase", &self.phase)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Ordered collection of listeners attached to requests as a unit.
#[derive(Debug, Clone, Default)]
pub struct ListenerSet {
    name: Cow<'static, str>,
    entries: Vec<Listener>,
}

impl ListenerSet {
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a handler for `phase`.
    pub fn on(
        &mut self,
        phase: Phase,
        name: impl Into<Cow<'static, str>>,
        handler: Arc<dyn PhaseHandler>,
    ) -> &mut Self {
        self.entries.push(Listener {
            phase,
            name: name.into(),
            handler,
        });
        self
    }

    /// Builder form of [`ListenerSet::on`].
    #[must_use]
    pub fn with(
        mut self,
        phase: Phase,
        name: impl Into<Cow<'static, str>>,
        handler: Arc<dyn PhaseHandler>,
    ) -> Self {
        self.on(phase, name, handler);
        self
    }

    /// Removes every handler registered under `name` for `phase`.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, phase: Phase, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| !(l.phase == phase && l.name == name));
        self.entries.len() != before
    }

    #[must_use]
    pub fn contains(&self, phase: Phase, name: &str) -> bool {
        self.entries.iter().any(|l| l.phase == phase && l.name == name)
    }

    /// Handlers for `phase` in registration order.
    pub fn listeners(&self, phase: Phase) -> impl Iterator<Item = &Listener> {
        self.entries.iter().filter(move |l| l.phase == phase)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ListenerBus
// ---------------------------------------------------------------------------

/// The listener sets attached to one request, in attachment order.
#[derive(Debug, Clone, Default)]
pub struct ListenerBus {
    sets: Vec<Arc<ListenerSet>>,
}

impl ListenerBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a set after all previously attached sets.
    pub fn attach(&mut self, set: Arc<ListenerSet>) {
        self.sets.push(set);
    }

    /// Names of the attached sets, in order.
    pub fn set_names(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(|s| s.name())
    }

    /// Runs every handler for `phase`; stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a handler.
    pub async fn invoke(&self, phase: Phase, ctx: &mut RequestContext) -> Result<(), RequestError> {
        for set in &self.sets {
            for listener in set.listeners(phase) {
                tracing::trace!(
                    phase = %phase,
                    set = set.name(),
                    listener = %listener.name,
                    "invoking listener"
                );
                listener.handler.handle(ctx).await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Process-wide listener registry applied to every request.
///
/// Passed explicitly to each [`ClientContext`](crate::client::ClientContext).
/// Registration is copy-on-write: a request snapshots the current set when it
/// is constructed, so later registrations never affect in-flight requests.
#[derive(Debug)]
pub struct EventBus {
    listeners: ArcSwap<ListenerSet>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(ListenerSet::new("global")),
        }
    }

    /// Registers a handler for every subsequently constructed request.
    pub fn on(
        &self,
        phase: Phase,
        name: impl Into<Cow<'static, str>>,
        handler: Arc<dyn PhaseHandler>,
    ) {
        let name = name.into();
        self.listeners.rcu(|current| {
            let mut next = ListenerSet::clone(current);
            next.on(phase, name.clone(), Arc::clone(&handler));
            next
        });
    }

    /// Removes a handler by name. Returns whether anything was removed.
    pub fn remove(&self, phase: Phase, name: &str) -> bool {
        let mut removed = false;
        self.listeners.rcu(|current| {
            let mut next = ListenerSet::clone(current);
            removed = next.remove(phase, name);
            next
        });
        removed
    }

    /// The current global set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ListenerSet> {
        self.listeners.load_full()
    }
}
