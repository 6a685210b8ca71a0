// SPDX-License-Identifier: Apache-2.0
// Copyright Trellis Project Authors

//! Priority-sloted flower rule sets.
//!
//! A [`RuleSet`] occupies a contiguous range of TC priorities at one
//! `(interface, parent, chain)` coordinate.  Callers define *priority slots*
//! inside the range; every rule in a slot matches the same packet fields
//! under the same mask, differing only in the matched values.  Rules whose
//! masked keys coincide collapse into one [`FlowerAggregate`] — one kernel
//! flower filter — and are ordered within it by their sub-priority.

use crate::action::ActionSpec;
use crate::ids::{IdAllocator, RuleHandle};
use derive_builder::Builder;
use net::iface::InterfaceIndex;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::debug;

/// Packet fields a flower filter can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTarget {
    /// Source MAC address (6 bytes).
    SrcMac,
    /// Destination MAC address (6 bytes).
    DstMac,
    /// Source IPv4 address (4 bytes).
    SrcIpv4,
    /// Destination IPv4 address (4 bytes).
    DstIpv4,
    /// Source IPv6 address (16 bytes).
    SrcIpv6,
    /// Destination IPv6 address (16 bytes).
    DstIpv6,
    /// VLAN id (2 bytes, 12 significant bits).
    VlanId,
    /// Tunnel key id of decapsulated traffic (4 bytes).
    EncKeyId,
}

impl MatchTarget {
    /// The width of this field's key and mask, in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            MatchTarget::SrcMac | MatchTarget::DstMac => 6,
            MatchTarget::SrcIpv4 | MatchTarget::DstIpv4 | MatchTarget::EncKeyId => 4,
            MatchTarget::SrcIpv6 | MatchTarget::DstIpv6 => 16,
            MatchTarget::VlanId => 2,
        }
    }
}

/// One matched field together with its mask.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchField {
    target: MatchTarget,
    mask: Vec<u8>,
}

impl MatchField {
    /// A field masked by `mask`, which must be [`MatchTarget::width`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the mask width does not fit the target.
    pub fn new(target: MatchTarget, mask: Vec<u8>) -> Result<MatchField, RuleSetError> {
        if mask.len() != target.width() {
            return Err(RuleSetError::MaskWidth {
                expected: target.width(),
                got: mask.len(),
            });
        }
        Ok(MatchField { target, mask })
    }

    /// A field matched exactly (all mask bits set).
    #[must_use]
    pub fn exact(target: MatchTarget) -> MatchField {
        MatchField {
            target,
            mask: vec![u8::MAX; target.width()],
        }
    }

    /// The matched field.
    #[must_use]
    pub fn target(&self) -> MatchTarget {
        self.target
    }

    /// The mask bytes.
    #[must_use]
    pub fn mask(&self) -> &[u8] {
        &self.mask
    }
}

/// The TC coordinate a rule set occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleSetLocation {
    /// The interface the classifier chain is attached to.
    pub iface: InterfaceIndex,
    /// The parent qdisc handle (e.g. clsact ingress).
    pub parent: u32,
    /// The chain index under the parent.
    pub chain: u32,
}

/// One virtual rule as supplied by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Rule {
    /// The fields and masks this rule matches; must equal the slot's.
    pub fields: Vec<MatchField>,
    /// The matched values, concatenated in field order.
    pub key: Vec<u8>,
    /// Order among rules sharing a masked key; lowest wins.
    #[builder(default = 0)]
    pub subprio: u16,
    /// The actions the rule installs.
    #[builder(default = "Vec::new()")]
    pub actions: Vec<ActionSpec>,
}

/// One rule as stored inside an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedRule {
    handle: RuleHandle,
    subprio: u16,
    key: Vec<u8>,
    actions: Vec<ActionSpec>,
}

impl AggregatedRule {
    /// The handle allocated for this rule.
    #[must_use]
    pub fn handle(&self) -> RuleHandle {
        self.handle
    }

    /// The rule's sub-priority.
    #[must_use]
    pub fn subprio(&self) -> u16 {
        self.subprio
    }

    /// The rule's unmasked key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The rule's actions.
    #[must_use]
    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }
}

/// All rules of one slot that share a masked key.
///
/// An aggregate is what actually exists in the kernel: one flower filter
/// whose match is the masked key and whose actions are those of the
/// lowest-subprio rule.
#[derive(Debug)]
pub struct FlowerAggregate {
    filter: RuleHandle,
    masked_key: Vec<u8>,
    rules: Vec<AggregatedRule>,
}

impl FlowerAggregate {
    /// The handle of the materialised flower filter.
    #[must_use]
    pub fn filter_handle(&self) -> RuleHandle {
        self.filter
    }

    /// The masked key every rule in this aggregate shares.
    #[must_use]
    pub fn masked_key(&self) -> &[u8] {
        &self.masked_key
    }

    /// The rules, ordered by ascending sub-priority.
    #[must_use]
    pub fn rules(&self) -> &[AggregatedRule] {
        &self.rules
    }

    /// The rule whose actions the materialised filter carries.
    #[must_use]
    pub fn effective(&self) -> Option<&AggregatedRule> {
        self.rules.first()
    }
}

struct PrioSlot {
    fields: Vec<MatchField>,
    key_width: usize,
    ids: IdAllocator,
    aggregates: BTreeMap<Vec<u8>, FlowerAggregate>,
}

impl std::fmt::Debug for PrioSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrioSlot")
            .field("fields", &self.fields)
            .field("aggregates", &self.aggregates.len())
            .finish_non_exhaustive()
    }
}

/// Errors surfaced by rule-set bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RuleSetError {
    /// The priority lies outside the rule set's range.
    #[error("priority {prio} is outside the rule set's range")]
    PrioOutOfRange {
        /// The offending priority.
        prio: u16,
    },
    /// The slot was already defined.
    #[error("priority {prio} is already defined")]
    PrioOccupied {
        /// The offending priority.
        prio: u16,
    },
    /// No slot was defined at this priority.
    #[error("priority {prio} is not defined")]
    NoSuchPrio {
        /// The offending priority.
        prio: u16,
    },
    /// The rule's target/mask tuple differs from the slot's.
    #[error("rule targets or masks differ from the slot's")]
    FieldsMismatch,
    /// The rule's key width does not match the slot's field widths.
    #[error("rule key is {got} bytes, slot keys are {expected}")]
    KeyWidth {
        /// The slot's key width.
        expected: usize,
        /// The supplied key width.
        got: usize,
    },
    /// A mask's width does not fit its target.
    #[error("mask is {got} bytes, target takes {expected}")]
    MaskWidth {
        /// The target's width.
        expected: usize,
        /// The supplied mask width.
        got: usize,
    },
    /// A rule with this masked key and sub-priority already exists.
    #[error("duplicate rule: same masked key and sub-priority")]
    Duplicate,
    /// The slot's handle space is exhausted.
    #[error("no free rule handles remain in this slot")]
    IdsExhausted,
    /// The slot still contains rules.
    #[error("priority {prio} still contains rules")]
    NotEmpty {
        /// The offending priority.
        prio: u16,
    },
    /// No rule with this handle exists in the slot.
    #[error("no rule with this handle exists at this priority")]
    NoSuchRule,
}

/// A contiguous range of flower priorities at one TC coordinate.
#[derive(Debug)]
pub struct RuleSet {
    location: RuleSetLocation,
    prio_base: u16,
    slots: Vec<Option<PrioSlot>>,
}

impl RuleSet {
    /// A rule set owning priorities `prio_base .. prio_base + prio_count`.
    #[must_use]
    pub fn new(location: RuleSetLocation, prio_base: u16, prio_count: u16) -> RuleSet {
        RuleSet {
            location,
            prio_base,
            slots: (0..prio_count).map(|_| None).collect(),
        }
    }

    /// The TC coordinate this rule set occupies.
    #[must_use]
    pub fn location(&self) -> &RuleSetLocation {
        &self.location
    }

    fn slot_index(&self, prio: u16) -> Result<usize, RuleSetError> {
        let index = prio
            .checked_sub(self.prio_base)
            .map(usize::from)
            .ok_or(RuleSetError::PrioOutOfRange { prio })?;
        if index >= self.slots.len() {
            return Err(RuleSetError::PrioOutOfRange { prio });
        }
        Ok(index)
    }

    fn slot_mut(&mut self, prio: u16) -> Result<&mut PrioSlot, RuleSetError> {
        let index = self.slot_index(prio)?;
        self.slots[index]
            .as_mut()
            .ok_or(RuleSetError::NoSuchPrio { prio })
    }

    fn slot(&self, prio: u16) -> Result<&PrioSlot, RuleSetError> {
        let index = self.slot_index(prio)?;
        self.slots[index]
            .as_ref()
            .ok_or(RuleSetError::NoSuchPrio { prio })
    }

    /// Define the slot at `prio` to match `fields`.
    ///
    /// # Errors
    ///
    /// Returns an error if the priority is out of range or already defined.
    pub fn define_prio(&mut self, prio: u16, fields: Vec<MatchField>) -> Result<(), RuleSetError> {
        let index = self.slot_index(prio)?;
        if self.slots[index].is_some() {
            return Err(RuleSetError::PrioOccupied { prio });
        }
        let key_width = fields.iter().map(|f| f.target().width()).sum();
        self.slots[index] = Some(PrioSlot {
            fields,
            key_width,
            ids: IdAllocator::new(),
            aggregates: BTreeMap::new(),
        });
        Ok(())
    }

    /// Release the slot at `prio`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist or still contains rules.
    pub fn free_prio(&mut self, prio: u16) -> Result<(), RuleSetError> {
        let index = self.slot_index(prio)?;
        match &self.slots[index] {
            None => Err(RuleSetError::NoSuchPrio { prio }),
            Some(slot) if !slot.aggregates.is_empty() => Err(RuleSetError::NotEmpty { prio }),
            Some(_) => {
                self.slots[index] = None;
                Ok(())
            }
        }
    }

    /// Add `rule` to the slot at `prio`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist, the rule's fields or key
    /// width differ from the slot's, a rule with the same masked key and
    /// sub-priority already exists, or handles are exhausted.
    pub fn add_rule(&mut self, prio: u16, rule: Rule) -> Result<RuleHandle, RuleSetError> {
        let slot = self.slot_mut(prio)?;
        if rule.fields != slot.fields {
            return Err(RuleSetError::FieldsMismatch);
        }
        if rule.key.len() != slot.key_width {
            return Err(RuleSetError::KeyWidth {
                expected: slot.key_width,
                got: rule.key.len(),
            });
        }
        let masked = mask_key(&rule.key, &slot.fields);
        if let Some(aggregate) = slot.aggregates.get(&masked) {
            if aggregate.rules.iter().any(|r| r.subprio == rule.subprio) {
                return Err(RuleSetError::Duplicate);
            }
        }
        let handle = slot.ids.alloc().ok_or(RuleSetError::IdsExhausted)?;
        let aggregate = match slot.aggregates.entry(masked.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let filter = match slot.ids.alloc() {
                    Some(filter) => filter,
                    None => {
                        slot.ids.release(handle);
                        return Err(RuleSetError::IdsExhausted);
                    }
                };
                debug!("new flower aggregate {filter} at prio {prio}");
                entry.insert(FlowerAggregate {
                    filter,
                    masked_key: masked,
                    rules: Vec::new(),
                })
            }
        };
        let position = aggregate
            .rules
            .partition_point(|r| r.subprio <= rule.subprio);
        aggregate.rules.insert(
            position,
            AggregatedRule {
                handle,
                subprio: rule.subprio,
                key: rule.key,
                actions: rule.actions,
            },
        );
        Ok(handle)
    }

    /// Remove the rule with `handle` from the slot at `prio`.
    ///
    /// Empty aggregates are dropped and their filter handles recycled.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot or the rule does not exist.
    pub fn remove_rule(&mut self, prio: u16, handle: RuleHandle) -> Result<(), RuleSetError> {
        let slot = self.slot_mut(prio)?;
        let masked = slot
            .aggregates
            .iter()
            .find(|(_, aggregate)| aggregate.rules.iter().any(|r| r.handle == handle))
            .map(|(masked, _)| masked.clone())
            .ok_or(RuleSetError::NoSuchRule)?;
        let emptied = {
            let aggregate = match slot.aggregates.get_mut(&masked) {
                Some(aggregate) => aggregate,
                None => return Err(RuleSetError::NoSuchRule),
            };
            aggregate.rules.retain(|r| r.handle != handle);
            slot.ids.release(handle);
            aggregate.rules.is_empty()
        };
        if emptied {
            if let Some(aggregate) = slot.aggregates.remove(&masked) {
                debug!("dropping empty flower aggregate {}", aggregate.filter);
                slot.ids.release(aggregate.filter);
            }
        }
        Ok(())
    }

    /// The aggregate the (unmasked) `key` falls into, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist.
    pub fn find_aggregate(
        &self,
        prio: u16,
        key: &[u8],
    ) -> Result<Option<&FlowerAggregate>, RuleSetError> {
        let slot = self.slot(prio)?;
        let masked = mask_key(key, &slot.fields);
        Ok(slot.aggregates.get(&masked))
    }

    /// All aggregates of the slot at `prio`, in masked-key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot does not exist.
    pub fn aggregates(
        &self,
        prio: u16,
    ) -> Result<impl Iterator<Item = &FlowerAggregate>, RuleSetError> {
        Ok(self.slot(prio)?.aggregates.values())
    }
}

fn mask_key(key: &[u8], fields: &[MatchField]) -> Vec<u8> {
    let mask = fields.iter().flat_map(|f| f.mask().iter().copied());
    key.iter().zip(mask).map(|(k, m)| k & m).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn location() -> RuleSetLocation {
        RuleSetLocation {
            iface: InterfaceIndex::new(4),
            parent: 0xffff_fff2,
            chain: 0,
        }
    }

    fn mac_rule(key: [u8; 6], subprio: u16) -> Rule {
        RuleBuilder::default()
            .fields(vec![MatchField::exact(MatchTarget::DstMac)])
            .key(key.to_vec())
            .subprio(subprio)
            .actions(vec![ActionSpec::Ok])
            .build()
            .unwrap()
    }

    #[test]
    fn slot_definition_bounds() {
        let mut set = RuleSet::new(location(), 10, 4);
        set.define_prio(10, vec![MatchField::exact(MatchTarget::DstMac)])
            .unwrap();
        assert_eq!(
            set.define_prio(10, vec![]).unwrap_err(),
            RuleSetError::PrioOccupied { prio: 10 }
        );
        assert_eq!(
            set.define_prio(9, vec![]).unwrap_err(),
            RuleSetError::PrioOutOfRange { prio: 9 }
        );
        assert_eq!(
            set.define_prio(14, vec![]).unwrap_err(),
            RuleSetError::PrioOutOfRange { prio: 14 }
        );
    }

    #[test]
    fn rules_with_one_masked_key_share_an_aggregate() {
        let mut set = RuleSet::new(location(), 1, 1);
        let field = MatchField::new(MatchTarget::DstMac, vec![0xff, 0xff, 0xff, 0, 0, 0]).unwrap();
        set.define_prio(1, vec![field.clone()]).unwrap();

        let rule = |tail: u8, subprio: u16| {
            RuleBuilder::default()
                .fields(vec![field.clone()])
                .key(vec![2, 0, 0, 0, 0, tail])
                .subprio(subprio)
                .actions(vec![ActionSpec::Drop])
                .build()
                .unwrap()
        };
        let a = set.add_rule(1, rule(1, 10)).unwrap();
        let b = set.add_rule(1, rule(2, 5)).unwrap();
        assert_ne!(a, b);

        let aggregate = set.find_aggregate(1, &[2, 0, 0, 0, 0, 9]).unwrap().unwrap();
        assert_eq!(aggregate.rules().len(), 2);
        // lowest subprio wins
        assert_eq!(aggregate.effective().unwrap().handle(), b);
        assert_eq!(set.aggregates(1).unwrap().count(), 1);
    }

    #[test]
    fn duplicate_masked_key_and_subprio_is_rejected() {
        let mut set = RuleSet::new(location(), 1, 1);
        let field = MatchField::new(MatchTarget::DstMac, vec![0xff, 0xff, 0xff, 0, 0, 0]).unwrap();
        set.define_prio(1, vec![field.clone()]).unwrap();
        let rule = |tail: u8| {
            RuleBuilder::default()
                .fields(vec![field.clone()])
                .key(vec![2, 0, 0, 0, 0, tail])
                .subprio(3)
                .build()
                .unwrap()
        };
        set.add_rule(1, rule(1)).unwrap();
        // different raw key, same masked key, same subprio
        assert_eq!(set.add_rule(1, rule(2)).unwrap_err(), RuleSetError::Duplicate);
    }

    #[test]
    fn differing_fields_are_rejected() {
        let mut set = RuleSet::new(location(), 1, 1);
        set.define_prio(1, vec![MatchField::exact(MatchTarget::DstMac)])
            .unwrap();
        let rule = RuleBuilder::default()
            .fields(vec![MatchField::exact(MatchTarget::SrcMac)])
            .key(vec![0; 6])
            .build()
            .unwrap();
        assert_eq!(set.add_rule(1, rule).unwrap_err(), RuleSetError::FieldsMismatch);

        let narrow = RuleBuilder::default()
            .fields(vec![MatchField::exact(MatchTarget::DstMac)])
            .key(vec![0; 4])
            .build()
            .unwrap();
        assert_eq!(
            set.add_rule(1, narrow).unwrap_err(),
            RuleSetError::KeyWidth { expected: 6, got: 4 }
        );
    }

    #[test]
    fn removal_drops_empty_aggregates_and_recycles_handles() {
        let mut set = RuleSet::new(location(), 1, 1);
        set.define_prio(1, vec![MatchField::exact(MatchTarget::DstMac)])
            .unwrap();
        let handle = set.add_rule(1, mac_rule([2, 0, 0, 0, 0, 1], 0)).unwrap();
        assert_eq!(set.aggregates(1).unwrap().count(), 1);

        set.remove_rule(1, handle).unwrap();
        assert_eq!(set.aggregates(1).unwrap().count(), 0);
        assert_eq!(set.remove_rule(1, handle).unwrap_err(), RuleSetError::NoSuchRule);

        // emptied slot can now be released
        set.free_prio(1).unwrap();
        assert_eq!(
            set.add_rule(1, mac_rule([2, 0, 0, 0, 0, 1], 0)).unwrap_err(),
            RuleSetError::NoSuchPrio { prio: 1 }
        );
    }

    #[test]
    fn occupied_slot_cannot_be_freed() {
        let mut set = RuleSet::new(location(), 1, 1);
        set.define_prio(1, vec![MatchField::exact(MatchTarget::DstMac)])
            .unwrap();
        set.add_rule(1, mac_rule([2, 0, 0, 0, 0, 1], 0)).unwrap();
        assert_eq!(set.free_prio(1).unwrap_err(), RuleSetError::NotEmpty { prio: 1 });
    }
}
