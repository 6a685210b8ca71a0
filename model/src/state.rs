// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Per-object lifecycle states.
//!
//! Every graph object moves through the lattice
//! `New → Ok`, `Ok → Renew → Ok`, `{New, Ok, Renew} → Delete`.
//! `Delete` is absorbing: a deleted object is never re-promoted, it only
//! leaves the graph.  The transitions are pure functions so that illegal
//! moves are unrepresentable rather than asserted.

/// The lifecycle state of one graph object.
#[cfg_attr(any(test, feature = "bolero"), derive(bolero::TypeGenerator))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Created in memory, never committed.
    New,
    /// Committed and unchanged since.
    Ok,
    /// Committed, but must be torn down and rebuilt.
    Renew,
    /// Removal requested; awaits decommit.
    Delete,
}

impl Lifecycle {
    /// Mark a committed object as needing a rebuild.
    ///
    /// `New` has nothing to rebuild and `Renew` already is one; `Delete`
    /// never reaches here because mutation entry points refuse deleted
    /// objects.
    #[must_use]
    pub fn renew(self) -> Lifecycle {
        match self {
            Lifecycle::Ok => Lifecycle::Renew,
            other => other,
        }
    }

    /// Carry a renewal across a dependency edge from `from` onto `self`.
    #[must_use]
    pub fn propagate(self, from: Lifecycle) -> Lifecycle {
        if from == Lifecycle::Renew && self == Lifecycle::Ok {
            Lifecycle::Renew
        } else {
            self
        }
    }

    /// Acknowledge a successful (re)commit.
    #[must_use]
    pub fn ack_commit(self) -> Lifecycle {
        match self {
            Lifecycle::New | Lifecycle::Renew => Lifecycle::Ok,
            other => other,
        }
    }

    /// Decide whether the object needs decommitting, and the state it takes
    /// afterwards: a renewed object re-enters the graph as `New`.
    #[must_use]
    pub fn ack_uncommit(self) -> (Lifecycle, bool) {
        match self {
            Lifecycle::Renew => (Lifecycle::New, true),
            Lifecycle::Delete => (Lifecycle::Delete, true),
            Lifecycle::Ok => (Lifecycle::Ok, false),
            Lifecycle::New => (Lifecycle::New, false),
        }
    }

    /// The state taken when the user frees the object, or `None` when a
    /// never-committed object can simply be removed from the graph.
    #[must_use]
    pub fn freed(self) -> Option<Lifecycle> {
        match self {
            Lifecycle::New => None,
            _ => Some(Lifecycle::Delete),
        }
    }

    /// Returns true iff removal has been requested.
    #[must_use]
    pub fn is_deleted(self) -> bool {
        self == Lifecycle::Delete
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;

    #[test]
    fn delete_is_absorbing() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|state: Lifecycle| {
                if state == Lifecycle::Delete {
                    assert_eq!(state.renew(), Lifecycle::Delete);
                    assert_eq!(state.ack_commit(), Lifecycle::Delete);
                    assert_eq!(state.propagate(Lifecycle::Renew), Lifecycle::Delete);
                    assert_eq!(state.freed(), Some(Lifecycle::Delete));
                }
            });
    }

    #[test]
    fn ack_commit_settles_everything_live() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|state: Lifecycle| {
                let settled = state.ack_commit();
                match state {
                    Lifecycle::Delete => assert_eq!(settled, Lifecycle::Delete),
                    _ => assert_eq!(settled, Lifecycle::Ok),
                }
            });
    }

    #[test]
    fn propagation_only_lifts_ok() {
        bolero::check!()
            .with_type()
            .cloned()
            .for_each(|(from, to): (Lifecycle, Lifecycle)| {
                let after = to.propagate(from);
                if from == Lifecycle::Renew && to == Lifecycle::Ok {
                    assert_eq!(after, Lifecycle::Renew);
                } else {
                    assert_eq!(after, to);
                }
            });
    }

    #[test]
    fn uncommit_tears_down_exactly_the_realised_and_changed() {
        assert_eq!(Lifecycle::Renew.ack_uncommit(), (Lifecycle::New, true));
        assert_eq!(Lifecycle::Delete.ack_uncommit(), (Lifecycle::Delete, true));
        assert_eq!(Lifecycle::Ok.ack_uncommit(), (Lifecycle::Ok, false));
        assert_eq!(Lifecycle::New.ack_uncommit(), (Lifecycle::New, false));
    }

    #[test]
    fn renew_round_trip() {
        let state = Lifecycle::New.ack_commit();
        assert_eq!(state, Lifecycle::Ok);
        let state = state.renew();
        assert_eq!(state, Lifecycle::Renew);
        let (state, needs_teardown) = state.ack_uncommit();
        assert!(needs_teardown);
        assert_eq!(state, Lifecycle::New);
        assert_eq!(state.ack_commit(), Lifecycle::Ok);
    }
}
