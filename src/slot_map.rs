//! Ordered, possibly-partial mappings between [`Slot`]s.

use std::fmt;

use thiserror::Error;

use crate::{slot::Slot, slot_set::SlotSet};

/// `inverse` was called on a map that is not a bijection (its values are not
/// pairwise distinct).
#[derive(Debug, Clone, Copy, Error)]
#[error("slot map is not a bijection, cannot invert")]
pub struct NotBijection;

/// A mapping from [`Slot`] to [`Slot`], represented as a sorted, deduplicated
/// vector of pairs keyed on the source slot.
///
/// Like [`SlotSet`], a small sorted sequence rather than a hash map: these
/// maps rarely exceed the arity of a single e-node, and the sorted
/// representation gives free structural equality, ordering, and hashing,
/// which `EClassCall` needs to be usable as a hash-cons key component.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotMap(Vec<(Slot, Slot)>);

impl SlotMap {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn identity(set: &SlotSet) -> Self { Self(set.iter().map(|s| (s, s)).collect()) }

    /// Builds a bijection from `set` onto fresh slots minted from `source`.
    #[must_use]
    pub fn bijection_from_set_to_fresh(
        set: &SlotSet,
        source: &mut crate::slot::SlotSource,
    ) -> Self {
        let mut pairs: Vec<_> = set.iter().map(|s| (s, source.fresh())).collect();
        pairs.sort_unstable_by_key(|&(k, _)| k);
        Self(pairs)
    }

    pub fn from_pairs(it: impl IntoIterator<Item = (Slot, Slot)>) -> Self {
        let mut v: Vec<_> = it.into_iter().collect();
        v.sort_unstable_by_key(|&(k, _)| k);
        v.dedup_by_key(|&mut (k, _)| k);
        Self(v)
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    #[must_use]
    pub fn get(&self, key: Slot) -> Option<Slot> {
        self.0
            .binary_search_by_key(&key, |&(k, _)| k)
            .ok()
            .map(|i| self.0[i].1)
    }

    #[must_use]
    pub fn contains(&self, key: Slot) -> bool { self.get(key).is_some() }

    pub fn keys(&self) -> impl Iterator<Item = Slot> + '_ { self.0.iter().map(|&(k, _)| k) }

    pub fn values(&self) -> impl Iterator<Item = Slot> + '_ { self.0.iter().map(|&(_, v)| v) }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, Slot)> + '_ { self.0.iter().copied() }

    #[must_use]
    pub fn key_set(&self) -> SlotSet { self.keys().collect() }

    #[must_use]
    pub fn value_set(&self) -> SlotSet { self.values().collect() }

    /// A map is a bijection iff its values are pairwise distinct (its keys
    /// already are, by construction).
    #[must_use]
    pub fn is_bijection(&self) -> bool {
        let mut values: Vec<_> = self.values().collect();
        values.sort_unstable();
        values.windows(2).all(|w| w[0] != w[1])
    }

    /// `self ∘ other`: maps a slot `s` to `self[other[s]]`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self::from_pairs(
            other
                .iter()
                .filter_map(|(k, v)| self.get(v).map(|w| (k, w))),
        )
    }

    /// Like [`compose`](Self::compose), but keys of `other` with no image
    /// under `self` are kept mapped to their `other`-image unchanged.
    #[must_use]
    pub fn compose_partial(&self, other: &Self) -> Self {
        Self::from_pairs(
            other
                .iter()
                .map(|(k, v)| (k, self.get(v).unwrap_or(v))),
        )
    }

    /// Composes `self` after `other`, retaining every binding of `self` whose
    /// key is not overwritten by `other`.
    #[must_use]
    pub fn compose_retain(&self, other: &Self) -> Self {
        let mut pairs: Vec<_> = self.iter().collect();
        for (k, v) in other.iter() {
            if let Some(i) = pairs.iter().position(|&(pk, _)| pk == k) {
                pairs[i] = (k, self.get(v).unwrap_or(v));
            } else {
                pairs.push((k, self.get(v).unwrap_or(v)));
            }
        }
        Self::from_pairs(pairs)
    }

    /// Inverts a bijective slot map.
    ///
    /// # Errors
    /// Returns [`NotBijection`] if two keys share an image.
    pub fn inverse(&self) -> Result<Self, NotBijection> {
        if !self.is_bijection() {
            return Err(NotBijection);
        }
        Ok(Self::from_pairs(self.iter().map(|(k, v)| (v, k))))
    }

    /// Concatenates two slot maps with disjoint key sets.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        Self::from_pairs(self.iter().chain(other.iter()))
    }

    /// Restricts the map to the given key set.
    #[must_use]
    pub fn restrict(&self, keys: &SlotSet) -> Self {
        Self(
            self.0
                .iter()
                .copied()
                .filter(|&(k, _)| keys.contains(k))
                .collect(),
        )
    }
}

impl fmt::Display for SlotMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter().copied()).finish()
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::SlotMap;
    use crate::{slot::{Slot, SlotSource}, slot_set::SlotSet};

    fn small_slot() -> impl Strategy<Value = Slot> { (0u32..8).prop_map(Slot::numeric) }

    fn small_set() -> impl Strategy<Value = SlotSet> {
        proptest::collection::vec(small_slot(), 0..6).prop_map(SlotSet::from_iter_dedup)
    }

    proptest! {
        #[test]
        fn identity_is_noop_on_its_own_domain(set in small_set()) {
            let id = SlotMap::identity(&set);
            prop_assert_eq!(id.compose(&id), id);
            for s in set.iter() {
                prop_assert_eq!(id.get(s), Some(s));
            }
        }

        #[test]
        fn bijection_to_fresh_round_trips_through_inverse(set in small_set()) {
            let mut src = SlotSource::new();
            let m = SlotMap::bijection_from_set_to_fresh(&set, &mut src);
            prop_assert!(m.is_bijection());

            let inv = m.inverse().expect("bijection_from_set_to_fresh always builds a bijection");
            prop_assert_eq!(inv.inverse().unwrap(), m.clone());

            // m composed with its own inverse collapses to the identity on
            // whichever side that composition's arguments are applied first.
            prop_assert_eq!(m.compose(&inv), SlotMap::identity(&m.value_set()));
            prop_assert_eq!(inv.compose(&m), SlotMap::identity(&m.key_set()));
        }

        #[test]
        fn non_injective_map_is_not_a_bijection_and_refuses_inversion(
            set in small_set(),
            target in small_slot(),
        ) {
            prop_assume!(set.len() >= 2);
            // Send every slot in `set` to the same `target`: a bijection
            // only when `set` has exactly one element.
            let collapsed = SlotMap::from_pairs(set.iter().map(|s| (s, target)));
            prop_assert!(!collapsed.is_bijection());
            prop_assert!(collapsed.inverse().is_err());
        }
    }
}
