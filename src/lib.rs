//! An equality-saturation engine built on slotted e-graphs.
//!
//! The crate layers: slot algebra ([`slot`], [`slot_map`], [`slot_set`]) under
//! a hash-consed e-graph with congruence closure ([`egraph`], [`union_find`]),
//! under a batched command layer ([`command`]) driven by a compiled
//! pattern-matching machine ([`pattern`]) and user rules ([`rule`]), kept
//! consistent with lattice-valued analyses ([`analysis`]) and consulted by
//! minimum-cost extraction ([`extract`]). [`saturation`] drives the whole
//! thing to a fixpoint; [`parallel`] is the uniform concurrency primitive
//! used throughout. [`tree`] is the generic node/atom shape shared by
//! pattern bodies and inserted expressions, underlying both [`pattern`] and
//! [`command`]'s node descriptions.

#![deny(
    clippy::disallowed_methods,
    clippy::suspicious,
    clippy::style,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    reason = "TODO: document everything"
)]

pub mod analysis;
pub mod closure_builder;
pub mod command;
pub mod egraph;
pub mod extract;
pub mod free;
pub mod parallel;
pub mod pattern;
pub mod permutation;
pub mod rule;
pub mod saturation;
pub mod slot;
pub mod slot_map;
pub mod slot_set;
pub mod tree;
pub mod union_find;

#[cfg(any(test, feature = "proptest"))]
pub mod prop {
    use std::ops::RangeInclusive;

    use proptest::prelude::*;

    const RANGES: [RangeInclusive<char>; 26] = [
        '!'..='~',
        '\u{a1}'..='\u{ac}',
        '\u{ae}'..='\u{b7}',
        '\u{b9}'..='\u{1bf}',
        '\u{1c1}'..='\u{2af}',
        '\u{370}'..='\u{373}',
        '\u{375}'..='\u{377}',
        '\u{37b}'..='\u{37f}',
        '\u{386}'..='\u{38a}',
        '\u{38c}'..='\u{38c}',
        '\u{38e}'..='\u{3a1}',
        '\u{3a3}'..='\u{3e1}',
        '\u{400}'..='\u{482}',
        '\u{48a}'..='\u{52f}',
        '\u{531}'..='\u{556}',
        '\u{561}'..='\u{587}',
        '\u{1e00}'..='\u{1f15}',
        '\u{1f18}'..='\u{1f1d}',
        '\u{1f20}'..='\u{1f45}',
        '\u{1f48}'..='\u{1f4d}',
        '\u{1f50}'..='\u{1f57}',
        '\u{1f59}'..='\u{1f59}',
        '\u{1f5b}'..='\u{1f5b}',
        '\u{1f5d}'..='\u{1f5d}',
        '\u{1f5f}'..='\u{1f7d}',
        '\u{1f80}'..='\u{1faf}',
    ];

    /// A strategy producing arbitrary symbol characters, used to generate
    /// node operators and slot-bearing test trees.
    pub fn symbol() -> impl Strategy<Value = char> + Clone {
        prop::char::ranges(RANGES.as_slice().into())
    }
}
