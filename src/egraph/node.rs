use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    slot::Slot,
    slot_map::SlotMap,
    slot_set::SlotSet,
    union_find::ClassId,
};

/// A reference to an e-class together with the renaming from that class's
/// own parameter slots into the caller's context.
///
/// This is the slotted generalization of a plain `ClassId`: `find`-ing an
/// `EClassCall` still resolves to a canonical class, but the `SlotMap` must
/// be composed along the way so a caller three levels up still knows which of
/// its own slots feed which parameter of the class four unions ago.
pub struct EClassCall<C>(ClassId<C>, Arc<SlotMap>);

impl<C> EClassCall<C> {
    #[must_use]
    pub fn new(class: ClassId<C>, args: SlotMap) -> Self { Self(class, Arc::new(args)) }

    #[must_use]
    #[inline]
    pub fn class(&self) -> ClassId<C> { self.0 }

    #[must_use]
    #[inline]
    pub fn args(&self) -> &SlotMap { &self.1 }

    /// Renames this call through `map` (applied to the argument slots).
    #[must_use]
    pub fn rename(&self, map: &SlotMap) -> Self {
        Self(self.0, Arc::new(map.compose_partial(&self.1)))
    }
}

impl<C> fmt::Debug for EClassCall<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EClassCall")
            .field(&self.0.id())
            .field(&self.1)
            .finish()
    }
}

impl<C> Clone for EClassCall<C> {
    fn clone(&self) -> Self { Self(self.0, Arc::clone(&self.1)) }
}

impl<C> PartialEq for EClassCall<C> {
    fn eq(&self, other: &Self) -> bool { self.0 == other.0 && self.1 == other.1 }
}

impl<C> Eq for EClassCall<C> {}

impl<C> Ord for EClassCall<C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0).then_with(|| self.1.cmp(&other.1))
    }
}

impl<C> PartialOrd for EClassCall<C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl<C> Hash for EClassCall<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
        self.1.hash(state);
    }
}

/// A slotted e-node: an operator applied to class calls, with a set of
/// slots it binds (`definitions`) and a set it merely reads (`uses`).
///
/// Mirrors the teacher's `ENode<F, C>(Arc<F>, Arc<[ClassId<C>]>)` but widens
/// the argument list from bare class IDs to [`EClassCall`]s and adds the two
/// slot lists that make α-equivalent terms hash-cons to the same shape.
pub struct ENode<N, C>(Arc<N>, Arc<[Slot]>, Arc<[Slot]>, Arc<[EClassCall<C>]>);

impl<N, C> ENode<N, C> {
    pub fn new(
        op: Arc<N>,
        definitions: Arc<[Slot]>,
        uses: Arc<[Slot]>,
        args: Arc<[EClassCall<C>]>,
    ) -> Self {
        Self(op, definitions, uses, args)
    }

    #[must_use]
    #[inline]
    pub fn op(&self) -> &N { &self.0 }

    #[must_use]
    #[inline]
    pub fn definitions(&self) -> &[Slot] { &self.1 }

    #[must_use]
    #[inline]
    pub fn uses(&self) -> &[Slot] { &self.2 }

    #[must_use]
    #[inline]
    pub fn args(&self) -> &[EClassCall<C>] { &self.3 }

    /// All slots this node mentions anywhere: its own definitions and uses,
    /// plus every slot threaded through its children's calls.
    #[must_use]
    pub fn all_slots(&self) -> SlotSet {
        self.1
            .iter()
            .copied()
            .chain(self.2.iter().copied())
            .chain(self.3.iter().flat_map(|c| c.args().values()))
            .collect()
    }

    /// Free slots: everything this node mentions except the ones it binds
    /// itself.
    #[must_use]
    pub fn free_slots(&self) -> SlotSet {
        let bound: SlotSet = self.1.iter().copied().collect();
        self.all_slots().difference(&bound)
    }
}

impl<N, C> ENode<N, C>
where N: Clone
{
    /// Renames every slot this node mentions through `map`, leaving its own
    /// bound (`definitions`) slots fixed in place (a node's binders are
    /// local and never renamed from the outside; only its free/argument
    /// slots are).
    #[must_use]
    pub fn rename_free(&self, map: &SlotMap) -> Self {
        let uses: Arc<[Slot]> = self
            .2
            .iter()
            .map(|&s| map.get(s).unwrap_or(s))
            .collect();
        let args: Arc<[EClassCall<C>]> = self.3.iter().map(|c| c.rename(map)).collect();
        Self(Arc::clone(&self.0), Arc::clone(&self.1), uses, args)
    }
}

impl<N, C> ENode<N, C> {
    /// Replaces each argument call with its image under `canon`, returning
    /// whether anything changed.
    ///
    /// `canon` is almost always [`crate::egraph::HashConsEGraph::canonicalize`];
    /// it is threaded in as a closure rather than a concrete e-graph
    /// reference so this module stays decoupled from the hash-cons table,
    /// the same separation the teacher keeps between `egraph::node` and
    /// `egraph::reference`/`egraph::fast`.
    ///
    /// # Errors
    /// Propagates whatever `canon` itself can fail with (typically
    /// [`crate::union_find::NoNode`] for an argument referencing an unknown
    /// class).
    pub fn canonicalize_classes<E>(
        &mut self,
        mut canon: impl FnMut(&EClassCall<C>) -> Result<EClassCall<C>, E>,
    ) -> Result<bool, E> {
        let mut changed = false;
        let mut new_args = Vec::with_capacity(self.3.len());
        for call in &*self.3 {
            let new_call = canon(call)?;
            if new_call != *call {
                changed = true;
            }
            new_args.push(new_call);
        }
        if changed {
            self.3 = new_args.into();
        }
        Ok(changed)
    }

    /// Whether every argument call is already canonical under `canon`.
    ///
    /// # Errors
    /// Propagates whatever `canon` fails with.
    pub fn classes_canonical<E>(
        &self,
        mut canon: impl FnMut(&EClassCall<C>) -> Result<EClassCall<C>, E>,
    ) -> Result<bool, E>
    where
        C: Copy,
    {
        for call in &*self.3 {
            if canon(call)? != *call {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<N: fmt::Debug, C> fmt::Debug for ENode<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self(op, defs, uses, args) = self;
        f.debug_struct("ENode")
            .field("op", op)
            .field("definitions", defs)
            .field("uses", uses)
            .field("args", args)
            .finish()
    }
}

impl<N, C> Clone for ENode<N, C> {
    fn clone(&self) -> Self {
        Self(
            Arc::clone(&self.0),
            Arc::clone(&self.1),
            Arc::clone(&self.2),
            Arc::clone(&self.3),
        )
    }
}

impl<N: PartialEq, C> PartialEq for ENode<N, C> {
    fn eq(&self, other: &Self) -> bool {
        let Self(l_op, l_def, l_use, l_args) = self;
        let Self(r_op, r_def, r_use, r_args) = other;
        l_op == r_op && l_def == r_def && l_use == r_use && l_args == r_args
    }
}

impl<N: Eq, C> Eq for ENode<N, C> {}

impl<N: Ord, C> Ord for ENode<N, C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let Self(l_op, l_def, l_use, l_args) = self;
        let Self(r_op, r_def, r_use, r_args) = other;
        l_op
            .cmp(r_op)
            .then_with(|| l_def.cmp(r_def))
            .then_with(|| l_use.cmp(r_use))
            .then_with(|| l_args.cmp(r_args))
    }
}

impl<N: PartialOrd, C> PartialOrd for ENode<N, C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        let Self(l_op, l_def, l_use, l_args) = self;
        let Self(r_op, r_def, r_use, r_args) = other;
        Some(
            l_op.partial_cmp(r_op)?
                .then_with(|| l_def.cmp(r_def))
                .then_with(|| l_use.cmp(r_use))
                .then_with(|| l_args.cmp(r_args)),
        )
    }
}

impl<N: Hash, C> Hash for ENode<N, C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let Self(op, def, uses, args) = self;
        op.hash(state);
        def.hash(state);
        uses.hash(state);
        args.hash(state);
    }
}

/// Renumbers every slot a node mentions to a canonical sequence (definitions
/// first in their original relative order, then remaining free slots in
/// order of first appearance), returning the renumbered node (the *shape*)
/// together with the [`SlotMap`] that maps the canonical numbering back to
/// the node's original slots.
///
/// Two nodes that are identical up to renaming of their slots produce the
/// same shape; this is exactly the α-equivalence check the hash-cons table
/// relies on to fold equivalent-under-renaming nodes into one entry.
pub fn shape<N: Clone, C>(node: &ENode<N, C>) -> (ENode<N, C>, SlotMap) {
    let mut next = 0u32;
    let mut forward = Vec::new();
    let mut seen = SlotSet::new();

    let mut assign = |s: Slot, forward: &mut Vec<(Slot, Slot)>, seen: &mut SlotSet| -> Slot {
        if let Some(canon) = forward.iter().find(|&&(orig, _)| orig == s).map(|&(_, c)| c) {
            return canon;
        }
        let canon = Slot::numeric(next);
        next += 1;
        forward.push((s, canon));
        *seen = seen.insert(s);
        canon
    };

    for &s in node.definitions() {
        assign(s, &mut forward, &mut seen);
    }
    for &s in node.uses() {
        assign(s, &mut forward, &mut seen);
    }
    for call in node.args() {
        for s in call.args().values() {
            assign(s, &mut forward, &mut seen);
        }
    }

    let back = SlotMap::from_pairs(forward.iter().map(|&(orig, canon)| (canon, orig)));
    let fwd = SlotMap::from_pairs(forward);

    let definitions: Arc<[Slot]> = node.definitions().iter().map(|&s| fwd.get(s).unwrap()).collect();
    let uses: Arc<[Slot]> = node.uses().iter().map(|&s| fwd.get(s).unwrap()).collect();
    let args: Arc<[EClassCall<C>]> = node
        .args()
        .iter()
        .map(|c| EClassCall::new(c.class(), fwd.compose_partial(c.args())))
        .collect();

    (
        ENode::new(Arc::new(node.op().clone()), definitions, uses, args),
        back,
    )
}
