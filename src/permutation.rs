//! Per-e-class groups of slot permutations that preserve a class's node set.
//!
//! The generating-set closure uses the same worklist-closure shape as
//! [`crate::closure_builder::ClosureBuilder`] (pop an element, insert it,
//! enqueue its newly-reachable neighbors), specialized here because each
//! "neighbor" of a group element depends on the whole set discovered so far
//! rather than on the popped element alone.

use std::collections::{BTreeSet, VecDeque};

use crate::{slot_map::SlotMap, slot_set::SlotSet};

/// The group of slot bijections on a class's slot set that leave its node set
/// unchanged (up to renaming).
///
/// These groups are invariably small in practice (symmetry of a handful of
/// commutative/associative arguments), so the full element set is kept
/// materialized rather than only a generating set -- a direct analogue of the
/// teacher choosing a materialized `VecForestSet` over lazily recomputed
/// parent chains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermutationGroup {
    slots: SlotSet,
    elements: BTreeSet<SlotMap>,
}

impl PermutationGroup {
    /// The trivial group on `slots`, containing only the identity.
    #[must_use]
    pub fn trivial(slots: SlotSet) -> Self {
        let id = SlotMap::identity(&slots);
        Self {
            slots,
            elements: BTreeSet::from([id]),
        }
    }

    #[must_use]
    #[inline]
    pub fn slots(&self) -> &SlotSet { &self.slots }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize { self.elements.len() }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool { false }

    #[must_use]
    pub fn contains(&self, perm: &SlotMap) -> bool { self.elements.contains(perm) }

    pub fn elements(&self) -> impl Iterator<Item = &SlotMap> { self.elements.iter() }

    /// Adds a generator and closes the element set under composition with
    /// the existing elements.
    ///
    /// `perm` must be a bijection whose key set and value set both equal
    /// `self.slots()`; violating this is a caller bug, not a recoverable
    /// error (it would mean a congruence collision produced a renaming
    /// outside the class's own parameter set).
    pub fn add_generator(&mut self, perm: SlotMap) {
        debug_assert!(perm.is_bijection());
        debug_assert_eq!(perm.key_set(), self.slots);

        if self.elements.contains(&perm) {
            return;
        }

        let mut queue: VecDeque<SlotMap> = VecDeque::from([perm]);
        while let Some(g) = queue.pop_front() {
            if !self.elements.insert(g.clone()) {
                continue;
            }

            for e in self.elements.clone() {
                queue.push_back(e.compose(&g));
                queue.push_back(g.compose(&e));
            }
        }
    }

    /// Merges another group discovered on the same slot set (e.g. when two
    /// classes carrying independently-discovered groups are unioned).
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.slots, other.slots);
        for g in other.elements() {
            self.add_generator(g.clone());
        }
    }
}

#[cfg(test)]
mod test {
    use super::PermutationGroup;
    use crate::{slot::Slot, slot_map::SlotMap, slot_set::SlotSet};

    fn pair() -> (Slot, Slot) { (Slot::numeric(0), Slot::numeric(1)) }

    fn swap(x: Slot, y: Slot) -> SlotMap { SlotMap::from_pairs([(x, y), (y, x)]) }

    #[test]
    fn trivial_group_contains_only_identity() {
        let (x, y) = pair();
        let slots = SlotSet::from_iter_dedup([x, y]);
        let group = PermutationGroup::trivial(slots.clone());

        assert_eq!(group.len(), 1);
        assert!(group.contains(&SlotMap::identity(&slots)));
        assert!(!group.contains(&swap(x, y)));
    }

    #[test]
    fn a_two_cycle_generator_closes_to_a_group_of_order_two() {
        let (x, y) = pair();
        let slots = SlotSet::from_iter_dedup([x, y]);
        let mut group = PermutationGroup::trivial(slots.clone());

        group.add_generator(swap(x, y));

        assert_eq!(group.len(), 2);
        assert!(group.contains(&SlotMap::identity(&slots)));
        assert!(group.contains(&swap(x, y)));

        // Re-adding the same generator (or its own square, the identity)
        // must not grow the group further.
        group.add_generator(swap(x, y));
        group.add_generator(SlotMap::identity(&slots));
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn merge_is_the_union_of_two_groups_generators() {
        let (x, y) = pair();
        let slots = SlotSet::from_iter_dedup([x, y]);

        let mut a = PermutationGroup::trivial(slots.clone());
        a.add_generator(swap(x, y));

        let b = PermutationGroup::trivial(slots.clone());

        let mut merged = PermutationGroup::trivial(slots);
        merged.merge(&a);
        merged.merge(&b);

        assert_eq!(merged.len(), 2);
        assert!(merged.contains(&swap(x, y)));
    }
}
