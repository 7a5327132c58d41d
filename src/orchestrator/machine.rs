//! The pagination state machine, as a typed transition table.
//!
//! The table is pure: it knows nothing about storage, queues, or the loader,
//! so the control flow can be unit-tested in isolation. The driver in the
//! parent module performs each phase's effect and feeds the resulting event
//! back through [`transition`].

use thiserror::Error;

/// States of the pagination state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Invoke the loader with the current state.
    Load,
    /// Decide whether more pages remain.
    Decide,
    /// Terminal: the enumeration completed.
    Success,
    /// Run the failure fallback chain.
    Fallback,
    /// Terminal: the run failed fatally.
    Failure,
}

impl Phase {
    /// Whether the machine has reached a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Events produced by performing a phase's effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The loader returned a new state.
    PageLoaded,
    /// The loader raised an error.
    LoadFailed,
    /// The loader's output carries a continuation cursor.
    MorePages,
    /// The loader's output carries no cursor.
    Exhausted,
    /// The fallback chain published its notification.
    FallbackPublished,
}

/// A `(phase, event)` pair with no entry in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No transition from {phase:?} on {event:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in.
    pub phase: Phase,
    /// The event that had no transition.
    pub event: Event,
}

/// The transition table.
///
/// ```text
/// Load     --PageLoaded-------> Decide
/// Load     --LoadFailed-------> Fallback
/// Decide   --MorePages--------> Load
/// Decide   --Exhausted--------> Success
/// Fallback --FallbackPublished-> Failure
/// ```
///
/// # Errors
///
/// Returns [`InvalidTransition`] for any pair outside the table, including
/// any event delivered to a terminal phase.
pub const fn transition(phase: Phase, event: Event) -> Result<Phase, InvalidTransition> {
    match (phase, event) {
        (Phase::Load, Event::PageLoaded) => Ok(Phase::Decide),
        (Phase::Load, Event::LoadFailed) => Ok(Phase::Fallback),
        (Phase::Decide, Event::MorePages) => Ok(Phase::Load),
        (Phase::Decide, Event::Exhausted) => Ok(Phase::Success),
        (Phase::Fallback, Event::FallbackPublished) => Ok(Phase::Failure),
        _ => Err(InvalidTransition { phase, event }),
    }
}
