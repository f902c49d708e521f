//! Small, sorted, deduplicated sets of [`Slot`]s.

use std::fmt;

use crate::slot::Slot;

/// A set of slots, represented as a sorted, deduplicated vector.
///
/// Chosen over a hash set for the same reason [`crate::egraph::ENode`]
/// represents its argument list as a flat slice rather than a set: these
/// collections are small (almost always under a dozen elements), and a
/// sorted vector gives a structural, deterministic [`Ord`]/[`Hash`] for free,
/// which a class's parameter set needs to be usable as a hash-cons key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotSet(Vec<Slot>);

impl SlotSet {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn singleton(slot: Slot) -> Self { Self(vec![slot]) }

    #[must_use]
    pub fn from_iter_dedup(it: impl IntoIterator<Item = Slot>) -> Self {
        let mut v: Vec<_> = it.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        Self(v)
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    #[must_use]
    pub fn contains(&self, slot: Slot) -> bool { self.0.binary_search(&slot).is_ok() }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ { self.0.iter().copied() }

    #[must_use]
    pub fn insert(&self, slot: Slot) -> Self {
        if self.contains(slot) {
            self.clone()
        } else {
            Self::from_iter_dedup(self.0.iter().copied().chain([slot]))
        }
    }

    /// The union of two slot sets.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::from_iter_dedup(self.0.iter().copied().chain(other.0.iter().copied()))
    }

    /// The intersection of two slot sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(
            self.0
                .iter()
                .copied()
                .filter(|s| other.contains(*s))
                .collect(),
        )
    }

    /// The set difference `self \ other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(
            self.0
                .iter()
                .copied()
                .filter(|s| !other.contains(*s))
                .collect(),
        )
    }

    #[must_use]
    pub fn subset_of(&self, other: &Self) -> bool { self.0.iter().all(|s| other.contains(*s)) }
}

impl FromIterator<Slot> for SlotSet {
    fn from_iter<I: IntoIterator<Item = Slot>>(it: I) -> Self { Self::from_iter_dedup(it) }
}

impl IntoIterator for SlotSet {
    type IntoIter = std::vec::IntoIter<Slot>;
    type Item = Slot;

    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl fmt::Display for SlotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::SlotSet;
    use crate::slot::Slot;

    fn small_slot() -> impl Strategy<Value = Slot> { (0u32..8).prop_map(Slot::numeric) }

    fn small_set() -> impl Strategy<Value = SlotSet> {
        proptest::collection::vec(small_slot(), 0..8).prop_map(SlotSet::from_iter_dedup)
    }

    proptest! {
        #[test]
        fn union_is_commutative(a in small_set(), b in small_set()) {
            prop_assert_eq!(a.union(&b), b.union(&a));
        }

        #[test]
        fn intersection_and_difference_partition_the_union(a in small_set(), b in small_set()) {
            let union = a.union(&b);
            let inter = a.intersection(&b);
            let a_only = a.difference(&b);
            let b_only = b.difference(&a);

            prop_assert!(inter.subset_of(&a) && inter.subset_of(&b));
            prop_assert!(a_only.subset_of(&a) && !a_only.iter().any(|s| b.contains(s)));

            let recombined = inter.union(&a_only).union(&b_only);
            prop_assert_eq!(recombined, union);
        }

        #[test]
        fn difference_with_self_is_empty(a in small_set()) {
            prop_assert!(a.difference(&a).is_empty());
        }

        #[test]
        fn insert_is_idempotent_and_contains_the_slot(a in small_set(), s in small_slot()) {
            let once = a.insert(s);
            let twice = once.insert(s);
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.contains(s));
        }

        #[test]
        fn subset_of_is_reflexive_and_respects_union(a in small_set(), b in small_set()) {
            prop_assert!(a.subset_of(&a));
            prop_assert!(a.subset_of(&a.union(&b)));
        }
    }
}
