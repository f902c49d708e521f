//! The production slotted e-graph: a hash-consed, congruence-closed map from
//! canonical node shapes to e-classes.
//!
//! Algorithmically grounded on the teacher's `reference::EGraph` (a single
//! union-find plus a `BTreeMap<ENode, ClassId>` hash-cons table and a
//! recursive parents-worklist `merge_impl`) -- the simplest of the teacher's
//! three e-graph implementations and the most tractable to generalize with
//! slots. The poison-flag, `Drop`-triggered-rebuild write-guard is grounded
//! on `fast::EGraph`/`fast::EGraphMut`, because batching many unions before
//! a single congruence-closure pass is a hard requirement here, not merely
//! an optimization.
//!
//! The slotted generalization adds one thing the teacher's plain e-graph
//! never needed: a class that stops being canonical doesn't just redirect to
//! a root class id, it redirects through a [`SlotMap`] translating its own
//! parameter numbering into the root's. That redirect table is this module's
//! `SlottedUnionFind` -- kept as a side table here (rather than folded into
//! [`crate::union_find::UnionFind`] itself) because the translation is only
//! known once the congruence merge has picked a winning numbering, which
//! happens one layer up from the plain union-find's ranked merge.

use std::{
    collections::BTreeMap,
    fmt, mem,
};

use thiserror::Error;
use tracing::{debug, debug_span, trace};

use super::node::{shape, EClassCall, ENode};
use crate::{
    permutation::PermutationGroup,
    slot_map::SlotMap,
    slot_set::SlotSet,
    union_find::{ClassId, NoNode, UnionFind, Unioned},
};

/// A union was requested between two calls whose class parameter sets
/// cannot be reconciled by a slot renaming alone.
///
/// This is the boundary of what this engine resolves automatically: two
/// classes whose own parameter-slot *counts* differ, or whose renaming would
/// require collapsing two distinct parameters of the same class into one,
/// are rejected here rather than handled via slot elimination (see the
/// open-question note in `DESIGN.md`).
#[derive(Debug, Clone, Error)]
#[error("cannot reconcile slot parameters of classes {a:?} and {b:?} for union")]
pub struct IncompatibleSlots {
    pub a: usize,
    pub b: usize,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    NoNode(#[from] NoNode),
    #[error(transparent)]
    IncompatibleSlots(#[from] IncompatibleSlots),
}

struct ClassData<N, C> {
    slots: SlotSet,
    nodes: BTreeMap<ENode<N, C>, SlotMap>,
    permutations: PermutationGroup,
    parents: BTreeMap<ENode<N, C>, ClassId<C>>,
}

impl<N: fmt::Debug, C> fmt::Debug for ClassData<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            slots,
            nodes,
            permutations,
            parents,
        } = self;
        f.debug_struct("ClassData")
            .field("slots", slots)
            .field("nodes", nodes)
            .field("permutations", permutations)
            .field("parents", parents)
            .finish()
    }
}

impl<N: Clone, C> Clone for ClassData<N, C> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            nodes: self.nodes.clone(),
            permutations: self.permutations.clone(),
            parents: self.parents.clone(),
        }
    }
}

impl<N, C> ClassData<N, C> {
    fn new(slots: SlotSet) -> Self {
        Self {
            permutations: PermutationGroup::trivial(slots.clone()),
            slots,
            nodes: BTreeMap::new(),
            parents: BTreeMap::new(),
        }
    }
}

/// The slotted hash-cons e-graph.
pub struct HashConsEGraph<N, C> {
    uf: UnionFind<C>,
    class_data: BTreeMap<ClassId<C>, ClassData<N, C>>,
    node_classes: BTreeMap<ENode<N, C>, ClassId<C>>,
    /// `SlottedUnionFind`: for every class id that has stopped being
    /// canonical, the direct parent it was folded into and the slot map
    /// translating the parent's own parameter slots down into the merged
    /// class's former numbering. Chains are walked (not path-compressed) in
    /// [`HashConsEGraph::canonicalize`].
    redirects: BTreeMap<ClassId<C>, (ClassId<C>, SlotMap)>,
    poison: bool,
}

impl<N: fmt::Debug, C> fmt::Debug for HashConsEGraph<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            uf,
            class_data,
            node_classes,
            redirects,
            poison,
        } = self;
        f.debug_struct("HashConsEGraph")
            .field("uf", uf)
            .field("class_data", class_data)
            .field("node_classes", node_classes)
            .field("redirects", redirects)
            .field("poison", poison)
            .finish()
    }
}

impl<N: Clone, C> Clone for HashConsEGraph<N, C> {
    fn clone(&self) -> Self {
        Self {
            uf: self.uf.clone(),
            class_data: self.class_data.clone(),
            node_classes: self.node_classes.clone(),
            redirects: self.redirects.clone(),
            poison: self.poison,
        }
    }
}

impl<N, C> Default for HashConsEGraph<N, C> {
    fn default() -> Self { Self::new() }
}

impl<N, C> HashConsEGraph<N, C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            uf: UnionFind::new(),
            class_data: BTreeMap::new(),
            node_classes: BTreeMap::new(),
            redirects: BTreeMap::new(),
            poison: false,
        }
    }

    fn poison_check(&self) {
        assert!(!self.poison, "e-graph was poisoned by a dropped write guard");
    }

    #[must_use]
    #[inline]
    pub fn find(&self, class: ClassId<C>) -> Result<ClassId<C>, NoNode> {
        self.poison_check();
        self.uf.find(class)
    }

    #[must_use]
    pub fn slots(&self, class: ClassId<C>) -> Option<&SlotSet> {
        self.class_data.get(&class).map(|d| &d.slots)
    }

    #[must_use]
    pub fn permutations(&self, class: ClassId<C>) -> Option<&PermutationGroup> {
        self.class_data.get(&class).map(|d| &d.permutations)
    }

    /// Every canonical (currently live) class in the graph.
    pub fn classes(&self) -> impl Iterator<Item = ClassId<C>> + '_ { self.class_data.keys().copied() }

    /// The canonical shapes currently recorded for a class, each paired with
    /// the renaming from the shape's own slot numbering into the class's
    /// exposed parameter slots.
    pub fn class_nodes(&self, class: ClassId<C>) -> impl Iterator<Item = (&ENode<N, C>, &SlotMap)> {
        self.class_data
            .get(&class)
            .into_iter()
            .flat_map(|d| d.nodes.iter())
    }

    /// The e-nodes anywhere in the graph that reference `class` as an
    /// argument, i.e. `I2`'s `users(c)`.
    pub fn users(&self, class: ClassId<C>) -> impl Iterator<Item = &ENode<N, C>> {
        self.class_data
            .get(&class)
            .into_iter()
            .flat_map(|d| d.parents.keys())
    }

    /// Like [`Self::users`], but paired with the owning class of each user
    /// node -- the metadata worklist needs to know which class's analysis
    /// result to re-join when a user's value changes, not just the shape of
    /// the user itself.
    pub fn user_owners(&self, class: ClassId<C>) -> impl Iterator<Item = (&ENode<N, C>, ClassId<C>)> {
        self.class_data
            .get(&class)
            .into_iter()
            .flat_map(|d| d.parents.iter().map(|(node, &owner)| (node, owner)))
    }

    /// Every class id this graph has ever allocated, canonical or not.
    ///
    /// Unlike [`Self::classes`] (which only yields currently-canonical
    /// roots), this walks the union-find's full domain -- metadata needs it
    /// to snapshot "which id pointed at which root" before a batch of
    /// unions, so it can diff against the same snapshot afterward and
    /// recover exactly the equivalence groups the rebuild discovered.
    pub fn all_classes(&self) -> impl Iterator<Item = ClassId<C>> + '_ { self.uf.classes() }
}

impl<N: Ord + Clone, C> HashConsEGraph<N, C> {
    /// Resolves a class call through the redirect chain left by past unions,
    /// composing slot renamings along the way, and then picks the
    /// deterministic orbit representative of the result under the target
    /// class's permutation group (I3: permutation-equivalent `SlotMap`s name
    /// the same value, so hash-consing must agree on which one it is).
    ///
    /// # Errors
    /// Propagates [`NoNode`] if the call ultimately resolves to a class id
    /// this graph never created.
    pub fn canonicalize(&self, call: &EClassCall<C>) -> Result<EClassCall<C>, NoNode> {
        self.poison_check();

        let mut class = call.class();
        let mut args = call.args().clone();
        while let Some((parent, down)) = self.redirects.get(&class) {
            args = args.compose(down);
            class = *parent;
        }

        let root = self.uf.find(class)?;
        debug_assert_eq!(root, class, "redirect chain must terminate at a union-find root");

        if let Some(best) = self
            .class_data
            .get(&class)
            .and_then(|d| d.permutations.elements().map(|g| args.compose(g)).min())
        {
            if best < args {
                args = best;
            }
        }

        Ok(EClassCall::new(class, args))
    }

    /// Whether `a` and `b` name the same value once canonicalized.
    ///
    /// # Errors
    /// Propagates [`NoNode`] from [`Self::canonicalize`].
    pub fn are_same(&self, a: &EClassCall<C>, b: &EClassCall<C>) -> Result<bool, NoNode> {
        Ok(self.canonicalize(a)? == self.canonicalize(b)?)
    }

    /// The nodes of `call`'s class, each with its argument `SlotMap`
    /// projected from the class's own parameter numbering into `call`'s
    /// caller context.
    ///
    /// # Errors
    /// Propagates [`NoNode`] from [`Self::canonicalize`].
    pub fn nodes(&self, call: &EClassCall<C>) -> Result<Vec<(ENode<N, C>, SlotMap)>, NoNode> {
        let call = self.canonicalize(call)?;
        Ok(self
            .class_nodes(call.class())
            .map(|(node, own_map)| (node.clone(), call.args().compose(own_map)))
            .collect())
    }
}

impl<N: Ord + Clone, C> HashConsEGraph<N, C> {
    /// Inserts a node, hash-consing it against any structurally (and
    /// α-equivalently) identical node already present.
    ///
    /// # Errors
    /// Propagates [`NoNode`] if `node` references a class id this graph
    /// doesn't know about.
    pub fn add(&mut self, mut node: ENode<N, C>) -> Result<EClassCall<C>, NoNode> {
        self.poison_check();
        node.canonicalize_classes(|call| self.canonicalize(call))?;

        let (shaped, back) = shape(&node);

        if let Some(&class) = self.node_classes.get(&shaped) {
            trace!(class = class.id(), "add: already there");
            let class = self.uf.find(class)?;
            return Ok(EClassCall::new(class, back));
        }

        let class = self.uf.add();
        trace!(class = class.id(), "add: added new class");
        let own_slots = shaped.free_slots();
        let mut data = ClassData::new(own_slots.clone());
        data.nodes
            .insert(shaped.clone(), SlotMap::identity(&own_slots));
        self.class_data.insert(class, data);

        for call in shaped.args() {
            self.class_data
                .get_mut(&call.class())
                .expect("argument class data must exist")
                .parents
                .insert(shaped.clone(), class);
        }

        self.node_classes.insert(shaped, class);
        Ok(EClassCall::new(class, back))
    }

    /// Like [`Self::add`], but only reports whether `node`'s shape is
    /// already hash-consed, never inserting it.
    ///
    /// # Errors
    /// Propagates [`NoNode`] if `node` references a class id this graph
    /// doesn't know about.
    pub fn lookup(&self, node: &ENode<N, C>) -> Result<Option<EClassCall<C>>, NoNode> {
        self.poison_check();
        let mut node = node.clone();
        node.canonicalize_classes(|call| self.canonicalize(call))?;

        let (shaped, back) = shape(&node);
        let Some(&class) = self.node_classes.get(&shaped) else {
            return Ok(None);
        };
        let class = self.uf.find(class)?;
        Ok(Some(EClassCall::new(class, back)))
    }

    /// Canonicalizes each of `nodes` in parallel (the only embarrassingly
    /// parallel step of insertion -- the hash-cons lookup and insert
    /// sequence below still runs single-threaded), then adds them in order.
    ///
    /// # Errors
    /// Propagates [`NoNode`] from the first node that fails to add.
    pub fn try_add_many(
        &mut self,
        nodes: Vec<ENode<N, C>>,
        parallel: &impl crate::parallel::ParallelMap,
    ) -> Result<Vec<EClassCall<C>>, NoNode>
    where
        N: Send + Sync,
        C: Send + Sync,
    {
        self.poison_check();
        let canonicalized: Result<Vec<_>, NoNode> = parallel
            .map_collect(nodes, |mut node| {
                node.canonicalize_classes(|call| self.canonicalize(call))?;
                Ok(node)
            })
            .into_iter()
            .collect();

        canonicalized?
            .into_iter()
            .map(|node| self.add_precanonicalized(node))
            .collect()
    }

    /// Like [`Self::add`], but skips re-canonicalizing argument calls
    /// (callers that already ran [`Self::canonicalize`] over every argument,
    /// e.g. [`Self::try_add_many`], use this to avoid doing that work
    /// twice).
    ///
    /// # Errors
    /// Propagates [`NoNode`] if `node` references a class id this graph
    /// doesn't know about.
    fn add_precanonicalized(&mut self, node: ENode<N, C>) -> Result<EClassCall<C>, NoNode> {
        let (shaped, back) = shape(&node);

        if let Some(&class) = self.node_classes.get(&shaped) {
            let class = self.uf.find(class)?;
            return Ok(EClassCall::new(class, back));
        }

        let class = self.uf.add();
        let own_slots = shaped.free_slots();
        let mut data = ClassData::new(own_slots.clone());
        data.nodes
            .insert(shaped.clone(), SlotMap::identity(&own_slots));
        self.class_data.insert(class, data);

        for call in shaped.args() {
            self.class_data
                .get_mut(&call.class())
                .expect("argument class data must exist")
                .parents
                .insert(shaped.clone(), class);
        }

        self.node_classes.insert(shaped, class);
        Ok(EClassCall::new(class, back))
    }

    /// Begins a batch of unions, returning a write guard that performs a
    /// single congruence-closure pass when dropped.
    pub fn write(&mut self) -> EGraphMut<'_, N, C> {
        self.poison_check();
        self.poison = true;
        EGraphMut {
            eg: self,
            dirty: BTreeMap::new(),
        }
    }
}

type DirtySet<C> = BTreeMap<ClassId<C>, Vec<(ClassId<C>, SlotMap)>>;

/// A RAII write guard over a [`HashConsEGraph`]. Unions recorded through this
/// guard are applied to the union-find immediately, but congruence closure
/// is deferred to a single pass on [`Drop`], mirroring how the teacher's
/// `EGraphMut` batches `merge` calls before `rebuild`.
pub struct EGraphMut<'a, N: Ord + Clone, C> {
    eg: &'a mut HashConsEGraph<N, C>,
    dirty: DirtySet<C>,
}

impl<N: fmt::Debug + Ord + Clone, C> fmt::Debug for EGraphMut<'_, N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { eg, dirty } = self;
        f.debug_struct("EGraphMut")
            .field("eg", eg)
            .field("dirty", dirty)
            .finish()
    }
}

impl<N: Ord + Clone, C> Drop for EGraphMut<'_, N, C> {
    fn drop(&mut self) {
        self.rebuild();
        self.eg.poison = false;
    }
}

impl<N: Ord + Clone, C> EGraphMut<'_, N, C> {
    /// Unions two e-class calls.
    ///
    /// When the two calls' class parameter sets have equal cardinality, the
    /// renaming between them (`b.args()⁻¹ ∘ a.args()`) is used to align `b`'s
    /// class onto `a`'s numbering before the underlying union-find merge; a
    /// mismatched cardinality is reported as [`IncompatibleSlots`] rather
    /// than attempting slot elimination.
    ///
    /// # Errors
    /// [`MergeError::NoNode`] if either call names an unknown class;
    /// [`MergeError::IncompatibleSlots`] if the calls' parameter counts
    /// disagree.
    pub fn union(
        &mut self,
        a: &EClassCall<C>,
        b: &EClassCall<C>,
    ) -> Result<Unioned<C>, MergeError> {
        let a = self.eg.canonicalize(a)?;
        let b = self.eg.canonicalize(b)?;
        let a_class = a.class();
        let b_class = b.class();

        let a_slots = self
            .eg
            .class_data
            .get(&a_class)
            .expect("class data must exist for a live class")
            .slots
            .clone();
        let b_slots = self
            .eg
            .class_data
            .get(&b_class)
            .expect("class data must exist for a live class")
            .slots
            .clone();

        if a_slots.len() != b_slots.len() {
            return Err(IncompatibleSlots {
                a: a_slots.len(),
                b: b_slots.len(),
            }
            .into());
        }

        // `up`: b_class's own slots -> a_class's own slots, derived by
        // following each b-slot to the shared caller context via `b.args()`
        // and back to the a-slot that names the same context slot via
        // `a.args()⁻¹`.
        let up = a
            .args()
            .inverse()
            .ok()
            .map(|inv| inv.compose(b.args()))
            .unwrap_or_else(|| SlotMap::identity(&b_slots));

        if up.key_set() != b_slots || !up.value_set().subset_of(&a_slots) {
            return Err(IncompatibleSlots {
                a: a_slots.len(),
                b: b_slots.len(),
            }
            .into());
        }

        let union = self.eg.uf.union(a_class, b_class)?;
        if let Some(unioned) = union.unioned {
            // `up` always maps the merged-away class's slots onto the
            // surviving root's slots, regardless of which side the
            // union-find's ranked merge picked as root.
            let up = if union.root == a_class {
                up
            } else {
                up.inverse().unwrap_or_else(|_| SlotMap::identity(&a_slots))
            };
            let down = up
                .inverse()
                .unwrap_or_else(|_| SlotMap::identity(&up.value_set()));
            self.eg.redirects.insert(unioned, (union.root, down.clone()));
            self.dirty.entry(union.root).or_default().push((unioned, down));
        }

        Ok(union)
    }

    fn rebuild(&mut self) {
        let span = debug_span!("rebuild");
        let _enter = span.enter();

        let mut q = DirtySet::new();
        while !self.dirty.is_empty() {
            for (root, unioned) in mem::take(&mut self.dirty) {
                let root = self
                    .eg
                    .uf
                    .find(root)
                    .unwrap_or_else(|_| unreachable!("dirty root must be live"));
                q.entry(root).or_default().extend(unioned);
            }

            for (root, unioned) in mem::take(&mut q) {
                self.repair(root, unioned);
            }
        }

        #[cfg(any(test, feature = "test"))]
        self.assert_invariants();
    }

    /// Folds the class data of every class in `unioned` (each paired with
    /// the [`SlotMap`] translating its own slots down into `root`'s, see
    /// [`HashConsEGraph::redirects`]) into `root`, then re-canonicalizes
    /// every affected parent node, discovering new unions (congruence) or
    /// new permutation generators (symmetry) along the way.
    fn repair(&mut self, root: ClassId<C>, unioned: Vec<(ClassId<C>, SlotMap)>) {
        trace!(root = root.id(), merged = unioned.len(), "repairing class");

        let mut to_merge: Vec<(EClassCall<C>, EClassCall<C>)> = Vec::new();
        let mut touched_parents: Vec<(ENode<N, C>, ClassId<C>)> = Vec::new();

        for (other, down) in unioned {
            let other_data = self
                .eg
                .class_data
                .remove(&other)
                .unwrap_or_else(|| unreachable!("merged class must have data"));

            // `down` maps root's own slots to `other`'s former slots, so a
            // node recorded against `other` under `their_map` (other's
            // canonical shape numbering -> other's slots) is re-expressed
            // against `root` as `their_map ∘ down⁻¹`... but we only ever
            // hold `down` (root -> other); compose the other direction
            // instead: `our_map[k] = their_map⁻¹`-free form below uses the
            // fact that `their_map` already maps shape-domain -> other's
            // slots, and we want shape-domain -> root's slots, i.e. we need
            // `other_to_root = down⁻¹`.
            let other_to_root = down
                .inverse()
                .unwrap_or_else(|_| SlotMap::identity(&down.value_set()));

            {
                let root_data = self
                    .eg
                    .class_data
                    .get_mut(&root)
                    .unwrap_or_else(|| unreachable!("root class must have data"));

                for (shape_node, their_map) in other_data.nodes {
                    let our_map = other_to_root.compose(&their_map);
                    match root_data.nodes.get(&shape_node) {
                        Some(existing) if *existing != our_map => {
                            // Both `existing` and `our_map` identify the
                            // same physical shape with root's own slots;
                            // `our_map ∘ existing⁻¹` is the induced
                            // automorphism of root's slots (apply
                            // `existing⁻¹` to get back to the shape's own
                            // numbering, then `our_map` back out).
                            if let Ok(existing_inv) = existing.inverse() {
                                let generator = our_map.compose(&existing_inv);
                                debug!(class = root.id(), "discovered permutation generator");
                                root_data.permutations.add_generator(generator);
                            }
                        },
                        Some(_) => {},
                        None => {
                            root_data.nodes.insert(shape_node, our_map);
                        },
                    }
                }
                root_data.permutations.merge(&other_data.permutations);

                touched_parents.extend(other_data.parents.into_iter());
            }
        }

        for (old_parent, owner) in touched_parents {
            let mut new_parent = old_parent.clone();
            new_parent
                .canonicalize_classes(|call| self.eg.canonicalize(call))
                .unwrap_or_else(|_: NoNode| unreachable!("parent args must resolve"));

            let (shaped, back) = shape(&new_parent);
            let owner = self.eg.uf.find(owner).unwrap_or_else(|_| unreachable!());

            self.eg.node_classes.remove(&old_parent);
            self.eg
                .class_data
                .get_mut(&owner)
                .unwrap_or_else(|| unreachable!("owner class must have data"))
                .nodes
                .remove(&old_parent);

            match self.eg.node_classes.get(&shaped).copied() {
                Some(other_owner) if other_owner != owner => {
                    let other_owner = self.eg.uf.find(other_owner).unwrap_or_else(|_| unreachable!());
                    if other_owner == owner {
                        // The raw entry pointed at a stale (pre-`find`) id
                        // for this same owner: the same within-class
                        // collision as below, just reached through a
                        // not-yet-canonical `node_classes` value.
                        self.record_same_class_collision(owner, &shaped, &back);
                    } else {
                        // `back` maps the shared shape's canonical numbering
                        // onto `owner`'s own slots; since both `owner` and
                        // `other_owner` hold a node with this exact shape,
                        // the other class's recorded slot map for the same
                        // shape gives the same correspondence for
                        // `other_owner`. Composing one with the inverse of
                        // the other yields the renaming between the two
                        // classes' own parameter slots, expressed through
                        // the shared shape as a common context.
                        let shape_to_owner = back.clone();
                        let shape_to_other = self
                            .eg
                            .class_data
                            .get(&other_owner)
                            .and_then(|d| d.nodes.get(&shaped))
                            .cloned()
                            .unwrap_or_else(|| SlotMap::identity(&shape_to_owner.value_set()));

                        to_merge.push((
                            EClassCall::new(owner, shape_to_owner),
                            EClassCall::new(other_owner, shape_to_other),
                        ));
                    }
                },
                Some(_) => {
                    // Already recorded for this same owner (by a sibling
                    // touched parent canonicalizing to the same shape
                    // earlier in this pass): a within-class collision, the
                    // parent analogue of the class-data fold above.
                    self.record_same_class_collision(owner, &shaped, &back);
                },
                None => {
                    self.eg.node_classes.insert(shaped.clone(), owner);
                },
            }

            self.eg
                .class_data
                .get_mut(&owner)
                .unwrap_or_else(|| unreachable!("owner class must have data"))
                .nodes
                .entry(shaped.clone())
                .or_insert_with(|| back.clone());

            self.eg
                .class_data
                .get_mut(&root)
                .unwrap_or_else(|| unreachable!("root class must have data"))
                .parents
                .insert(shaped, owner);
        }

        for (a, b) in to_merge {
            if let Ok(union) = self.union(&a, &b) {
                if let Some(unioned) = union.unioned {
                    let down = self
                        .eg
                        .redirects
                        .get(&unioned)
                        .map(|(_, m)| m.clone())
                        .unwrap_or_default();
                    self.repair(union.root, vec![(unioned, down)]);
                }
            }
        }
    }

    /// A re-canonicalized parent node's shape is already recorded for
    /// `owner` under a different argument map than `back`: the two maps
    /// name the same physical shape with `owner`'s own slots, so (I3) the
    /// renaming between them is an automorphism of `owner`'s slot set.
    /// Mirrors the class-data fold's own collision check above, just
    /// sourced from `owner`'s `nodes` table instead of the fold's `root`.
    fn record_same_class_collision(&mut self, owner: ClassId<C>, shaped: &ENode<N, C>, back: &SlotMap) {
        let data = self
            .eg
            .class_data
            .get_mut(&owner)
            .unwrap_or_else(|| unreachable!("owner class must have data"));

        if let Some(existing) = data.nodes.get(shaped) {
            if existing != back {
                if let Ok(existing_inv) = existing.inverse() {
                    let generator = back.compose(&existing_inv);
                    debug!(class = owner.id(), "discovered permutation generator (parent rehash)");
                    data.permutations.add_generator(generator);
                }
            }
        }
    }

    #[cfg(any(test, feature = "test"))]
    fn assert_invariants(&self) {
        for (node, &class) in &self.eg.node_classes {
            assert!(node
                .classes_canonical(|call| self.eg.canonicalize(call))
                .unwrap());
            assert_eq!(class, self.eg.uf.find(class).unwrap());
        }

        for root in self.eg.uf.roots() {
            assert!(self.eg.class_data.contains_key(&root));
        }

        for (&class, data) in &self.eg.class_data {
            assert_eq!(class, self.eg.uf.find(class).unwrap(), "class data key not canonical");
            for shape_node in data.nodes.keys() {
                assert!(shape_node
                    .classes_canonical(|call| self.eg.canonicalize(call))
                    .unwrap());
            }
        }
    }
}
