//! An observed-disable flag: a boolean with enable-wins semantics under
//! concurrent enable/disable, structurally a degenerate `Orswot` with a
//! single implicit element whose dot set is the flag's enable history.

use serde::{Deserialize, Serialize};

use crate::traits::Crdt;
use crate::vclock::{Actor, Stamp, VClock};

/// Observed-disable flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = ""))]
pub struct ODFlag<A: Actor> {
    clock: VClock<A>,
    enabled_dots: VClock<A>,
}

impl<A: Actor> Default for ODFlag<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Actor> ODFlag<A> {
    /// Returns a new, disabled flag.
    pub fn new() -> Self {
        ODFlag {
            clock: VClock::new(),
            enabled_dots: VClock::new(),
        }
    }

    /// The flag's observable value.
    pub fn value(&self) -> bool {
        !self.enabled_dots.is_empty()
    }

    /// Enables the flag: allocates a new dot (or adopts a pre-stamped one),
    /// adds it to the enabled set, and bumps the clock. Never fails.
    pub fn enable(&mut self, stamp: impl Into<Stamp<A>>) {
        let dot = match stamp.into() {
            Stamp::Actor(actor) => self.clock.inc(actor),
            Stamp::Dot(dot) => dot,
        };
        self.clock.apply(dot.clone());
        self.enabled_dots.apply(dot);
    }

    /// Disables the flag. This does *not* bump the clock or allocate a
    /// dot: disable is purely local evidence that this actor has seen the
    /// current enable dots. Convergence comes from a peer's clock
    /// eventually dominating those dots on merge, not from this replica
    /// advertising a disable event of its own.
    pub fn disable(&mut self) {
        self.enabled_dots = VClock::new();
    }

    /// Merges `other` into `self`. An enable dot the other side hasn't
    /// witnessed survives (enable-wins); one it has already seen and
    /// disabled (i.e. already removed from its `enabled_dots`, but
    /// dominated by its clock) does not.
    pub fn merge(&mut self, other: &Self) {
        let common = self.enabled_dots.intersection(&other.enabled_dots);
        let l_only = self.enabled_dots.subtract(&common).subtract(&other.clock);
        let r_only = other.enabled_dots.subtract(&common).subtract(&self.clock);

        let mut dots = common;
        dots.merge(&l_only);
        dots.merge(&r_only);

        self.enabled_dots = dots;
        self.clock.merge(&other.clock);
    }

    /// Returns this flag's clock: sufficient for a peer to determine
    /// whether this replica's enable dots are stale.
    pub fn precondition_context(&self) -> VClock<A> {
        self.clock.clone()
    }
}

impl<A: Actor> Crdt for ODFlag<A> {
    const TYPE_TAG: u8 = crate::binary::tag::OD_FLAG;

    fn stats(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("actor_count", self.clock.actor_count()),
            ("dot_length", self.enabled_dots.actor_count()),
        ]
    }
}
