// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Broadcast action lists spread over a chain of TC filters.
//!
//! A kernel filter carries at most [`MAX_ACTIONS_PER_FILTER`] actions, and a
//! broadcast (flood every peer and every tap) routinely needs more.  A
//! [`Fanout`] therefore owns a chain of filters at ascending priorities;
//! each filter keeps one slot reserved for a `continue` action so that
//! classification falls through to the next filter in the chain.
//!
//! Materialisation is callback-driven through [`FanoutDriver`]: the
//! underlying TC machinery emits actions onto the filter being built, so
//! the fan-out hands the driver the full action list of a filter every time
//! that filter changes.

use crate::action::ActionSpec;
use core::fmt::Display;
use tracing::debug;

/// The kernel's cap on actions attached to one filter (`TCA_ACT_MAX_PRIO`).
pub const MAX_ACTIONS_PER_FILTER: usize = 32;

/// Receives the materialisation calls a [`Fanout`] decides on.
pub trait FanoutDriver {
    /// The driver's failure type.
    type Error;

    /// Create or replace the filter at `prio` with `actions`.
    ///
    /// The final element of `actions` is always [`ActionSpec::Continue`].
    ///
    /// # Errors
    ///
    /// Returns an error if the filter could not be emitted.
    fn install(&mut self, prio: u16, actions: &[ActionSpec]) -> Result<(), Self::Error>;

    /// Delete the emptied filter at `prio`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter could not be removed.
    fn retire(&mut self, prio: u16) -> Result<(), Self::Error>;
}

/// Names one action slot inside a [`Fanout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionRef {
    prio: u16,
    slot: usize,
}

impl ActionRef {
    /// The priority of the filter holding this action.
    #[must_use]
    pub fn prio(&self) -> u16 {
        self.prio
    }
}

/// Errors surfaced by fan-out bookkeeping.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FanoutError<E: Display> {
    /// The driver failed to emit a filter.
    #[error("fan-out driver failed: {0}")]
    Driver(E),
    /// The referenced action is not present.
    #[error("no such action in this fan-out")]
    NoSuchAction,
    /// The priority space above the base is exhausted.
    #[error("no filter priorities remain")]
    PrioSpaceExhausted,
}

/// The filter chain must keep a slot for `continue`, so two is the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a fan-out filter must hold at least two actions, got {0}")]
pub struct InvalidFilterSize(pub usize);

#[derive(Debug)]
struct FanoutFilter {
    prio: u16,
    slots: Vec<Option<ActionSpec>>,
}

impl FanoutFilter {
    fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn materialised(&self) -> Vec<ActionSpec> {
        let mut actions: Vec<ActionSpec> = self.slots.iter().flatten().cloned().collect();
        actions.push(ActionSpec::Continue);
        actions
    }
}

/// An action list of arbitrary length, realised as a chain of TC filters.
#[derive(Debug)]
pub struct Fanout {
    base_prio: u16,
    free_prio: u16,
    usable: usize,
    filters: Vec<FanoutFilter>,
}

impl Fanout {
    /// A fan-out chaining filters from `base_prio` upward, each filter
    /// holding `per_filter` actions in total (one of which stays reserved
    /// for the continue action).
    ///
    /// # Errors
    ///
    /// Returns an error if `per_filter` leaves no usable slots.
    pub fn new(base_prio: u16, per_filter: usize) -> Result<Fanout, InvalidFilterSize> {
        if per_filter < 2 || per_filter > MAX_ACTIONS_PER_FILTER {
            return Err(InvalidFilterSize(per_filter));
        }
        Ok(Fanout {
            base_prio,
            free_prio: base_prio,
            usable: per_filter - 1,
            filters: Vec::new(),
        })
    }

    /// The number of live actions across the whole chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.iter().map(FanoutFilter::occupied).sum()
    }

    /// Returns true iff no actions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The priorities currently backed by a kernel filter, ascending.
    pub fn filter_prios(&self) -> impl Iterator<Item = u16> + '_ {
        self.filters.iter().map(|filter| filter.prio)
    }

    /// Append `action`, materialising the touched filter through `driver`.
    ///
    /// The lowest-priority filter with a free slot receives the action; if
    /// every filter is full, a new one is allocated at the next priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the priority space is exhausted or the driver
    /// fails; a driver failure leaves the fan-out unchanged.
    pub fn add<D: FanoutDriver>(
        &mut self,
        action: ActionSpec,
        driver: &mut D,
    ) -> Result<ActionRef, FanoutError<D::Error>>
    where
        D::Error: Display,
    {
        let usable = self.usable;
        let index = match self
            .filters
            .iter()
            .position(|filter| filter.occupied() < usable)
        {
            Some(index) => index,
            None => {
                let prio = self.free_prio;
                self.free_prio = self
                    .free_prio
                    .checked_add(1)
                    .ok_or(FanoutError::PrioSpaceExhausted)?;
                debug!("fan-out grows a filter at prio {prio}");
                self.filters.push(FanoutFilter {
                    prio,
                    slots: (0..usable).map(|_| None).collect(),
                });
                self.filters.len() - 1
            }
        };
        let filter = &mut self.filters[index];
        let slot = filter
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FanoutError::NoSuchAction)?;
        filter.slots[slot] = Some(action);
        let reference = ActionRef {
            prio: filter.prio,
            slot,
        };
        let actions = filter.materialised();
        if let Err(err) = driver.install(reference.prio, &actions) {
            // undo, so a failed emit does not strand a phantom action
            let filter = &mut self.filters[index];
            filter.slots[slot] = None;
            if filter.occupied() == 0 {
                self.filters.remove(index);
            }
            return Err(FanoutError::Driver(err));
        }
        Ok(reference)
    }

    /// Remove the action at `reference`, reclaiming the filter if it empties.
    ///
    /// # Errors
    ///
    /// Returns an error if the action does not exist or the driver fails.
    pub fn remove<D: FanoutDriver>(
        &mut self,
        reference: ActionRef,
        driver: &mut D,
    ) -> Result<ActionSpec, FanoutError<D::Error>>
    where
        D::Error: Display,
    {
        let index = self
            .filters
            .iter()
            .position(|filter| filter.prio == reference.prio)
            .ok_or(FanoutError::NoSuchAction)?;
        let filter = &mut self.filters[index];
        let action = filter
            .slots
            .get_mut(reference.slot)
            .and_then(Option::take)
            .ok_or(FanoutError::NoSuchAction)?;
        if filter.occupied() == 0 {
            driver.retire(reference.prio).map_err(FanoutError::Driver)?;
            self.filters.remove(index);
        } else {
            let actions = filter.materialised();
            driver
                .install(reference.prio, &actions)
                .map_err(FanoutError::Driver)?;
        }
        Ok(action)
    }
}
