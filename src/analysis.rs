//! Lattice-valued analyses kept in sync with e-graph changes.
//!
//! An [`Analysis`] folds a join-semilattice value over the e-graph: `make`
//! computes a class's value from one of its nodes and that node's already-
//! known argument values, `join` merges two known values for the same
//! class, and `rename` alpha-renames a value's mentioned slots when it
//! crosses a class boundary with a non-identity [`SlotMap`]. [`AnalysisState`]
//! is the per-analysis result table; [`Metadata`] is the `EGraphWithMetadata`
//! wrapper that owns a batch of analyses by string key and drives them from
//! `add`/`union_many`, the same "forward every read, intercept every write"
//! shape [`crate::egraph::hashcons::EGraphMut`] uses for the union-find
//! itself.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use tracing::trace;

use crate::{
    egraph::{EClassCall, ENode, HashConsEGraph},
    parallel::ParallelMap,
    slot_map::SlotMap,
    union_find::{ClassId, NoNode},
};

/// A monotone fold over the e-graph into a join-semilattice.
///
/// `Value::join` must be associative, commutative, and idempotent; callers
/// never verify this, the same way [`crate::permutation::PermutationGroup`]
/// never re-verifies that a generator is actually a bijection on its class's
/// slots -- these are preconditions on the analysis author, not runtime
/// checks.
pub trait Analysis<N, C>: fmt::Debug + Send + Sync {
    /// The lattice value this analysis computes per class.
    type Value: Clone + PartialEq + Send + Sync + fmt::Debug;

    /// A stable name for this analysis, used as its metadata key and in
    /// diagnostics.
    fn name(&self) -> &str;

    /// Computes this node's contribution to its class's value, given the
    /// already-known values of its argument classes (in `node.args()`
    /// order, each already renamed into this node's own slot context).
    fn make(&self, node: &ENode<N, C>, arg_values: &[Self::Value]) -> Self::Value;

    /// Merges two values known for the same class.
    fn join(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    /// Renames every slot `value` mentions through `map`.
    fn rename(&self, value: &Self::Value, map: &SlotMap) -> Self::Value;
}

/// The result table for one [`Analysis`], indexed by canonical class.
pub struct AnalysisState<N, C, A: Analysis<N, C>> {
    analysis: A,
    results: BTreeMap<ClassId<C>, A::Value>,
    _marker: std::marker::PhantomData<fn(&N, &C)>,
}

impl<N, C, A: Analysis<N, C> + fmt::Debug> fmt::Debug for AnalysisState<N, C, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisState")
            .field("analysis", &self.analysis)
            .field("results", &self.results)
            .finish()
    }
}

impl<N, C, A: Analysis<N, C>> AnalysisState<N, C, A> {
    #[must_use]
    pub fn new(analysis: A) -> Self {
        Self {
            analysis,
            results: BTreeMap::new(),
            _marker: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn analysis(&self) -> &A { &self.analysis }

    /// The raw per-class value, with no projection through a caller's
    /// [`SlotMap`] -- almost always [`Self::get`] is what a caller wants
    /// instead.
    #[must_use]
    pub fn result(&self, class: ClassId<C>) -> Option<&A::Value> { self.results.get(&class) }
}

impl<N: Ord + Clone, C, A: Analysis<N, C>> AnalysisState<N, C, A> {
    /// The value of `call`'s class, canonicalized and renamed into `call`'s
    /// own argument context.
    ///
    /// Returns `None` if the class has no recorded value yet (it has nodes
    /// whose arguments are themselves still unresolved) or if `call` no
    /// longer resolves to a live class.
    #[must_use]
    pub fn get(&self, eg: &HashConsEGraph<N, C>, call: &EClassCall<C>) -> Option<A::Value> {
        let canon = eg.canonicalize(call).ok()?;
        self.results
            .get(&canon.class())
            .map(|v| self.analysis.rename(v, canon.args()))
    }

    fn join_in(&mut self, class: ClassId<C>, value: A::Value) -> bool {
        match self.results.get(&class) {
            Some(existing) if *existing == value => false,
            Some(existing) => {
                let joined = self.analysis.join(existing, &value);
                let changed = joined != *existing;
                self.results.insert(class, joined);
                changed
            },
            None => {
                self.results.insert(class, value);
                true
            },
        }
    }

    /// Folds `make` over every freshly-inserted `(node, call)` pair, in the
    /// order given (a tree's postorder insertion already guarantees every
    /// argument class is resolved before its parent).
    pub fn on_add_many(&mut self, eg: &HashConsEGraph<N, C>, added: &[(ENode<N, C>, EClassCall<C>)]) {
        for (node, call) in added {
            let Ok(own_map) = call.args().inverse() else {
                // The map handed back by `add` (the shape's "back" renaming)
                // is a bijection by construction; a caller passing a
                // hand-built non-bijective call here is a programmer error,
                // not a recoverable one.
                unreachable!("class call returned by insertion must be a bijection")
            };
            let renormalized = node.rename_free(&own_map);

            let mut arg_values = Vec::with_capacity(renormalized.args().len());
            let mut ready = true;
            for arg in renormalized.args() {
                match self.get(eg, arg) {
                    Some(v) => arg_values.push(v),
                    None => {
                        ready = false;
                        break;
                    },
                }
            }
            if !ready {
                continue;
            }

            let value = self.analysis.make(&renormalized, &arg_values);
            self.join_in(call.class(), value);
        }
    }

    /// Folds merged classes' values into their survivor, then propagates the
    /// change through every affected parent until quiescence.
    ///
    /// `groups` pairs each surviving root with the (no-longer-canonical)
    /// class ids that were just folded into it; a class id appearing in no
    /// group is untouched by this call.
    pub fn on_union_many(&mut self, eg: &HashConsEGraph<N, C>, groups: &[(ClassId<C>, Vec<ClassId<C>>)]) {
        let mut worklist: BTreeSet<ClassId<C>> = BTreeSet::new();

        for (root, losers) in groups {
            for &loser in losers {
                if let Some(v) = self.results.remove(&loser) {
                    self.join_in(*root, v);
                }
            }
            worklist.insert(*root);
        }

        while let Some(class) = worklist.pop_first() {
            for (shape_node, owner) in eg.user_owners(class) {
                let Ok(owner) = eg.find(owner) else { continue };
                let mut node = shape_node.clone();
                if node.canonicalize_classes(|c| eg.canonicalize(c)).is_err() {
                    continue;
                }

                let mut arg_values = Vec::with_capacity(node.args().len());
                let mut ready = true;
                for arg in node.args() {
                    match self.get(eg, arg) {
                        Some(v) => arg_values.push(v),
                        None => {
                            ready = false;
                            break;
                        },
                    }
                }
                if !ready {
                    continue;
                }

                let value = self.analysis.make(&node, &arg_values);
                if self.join_in(owner, value) {
                    trace!(class = owner.id(), analysis = self.analysis.name(), "analysis value changed");
                    worklist.insert(owner);
                }
            }
        }
    }
}

/// A type-erased [`AnalysisState`] driven by string key from
/// [`EGraphWithMetadata`].
///
/// `Any` is a supertrait (rather than bolted on separately) so a `Box<dyn
/// AnalysisHandle<N, C>>` can be downcast back to its concrete
/// `AnalysisState<N, C, A>` in [`EGraphWithMetadata::result`] without every
/// caller needing to route through a second trait object.
trait AnalysisHandle<N, C>: fmt::Debug + Send + std::any::Any {
    fn as_any(&self) -> &dyn std::any::Any;

    fn name(&self) -> &str;

    fn on_add_many(&mut self, eg: &HashConsEGraph<N, C>, added: &[(ENode<N, C>, EClassCall<C>)]);

    fn on_union_many(&mut self, eg: &HashConsEGraph<N, C>, groups: &[(ClassId<C>, Vec<ClassId<C>>)]);
}

impl<N: Ord + Clone + Send + Sync + 'static, C: Send + Sync + 'static, A: Analysis<N, C> + 'static>
    AnalysisHandle<N, C> for AnalysisState<N, C, A>
{
    fn as_any(&self) -> &dyn std::any::Any { self }

    fn name(&self) -> &str { self.analysis.name() }

    fn on_add_many(&mut self, eg: &HashConsEGraph<N, C>, added: &[(ENode<N, C>, EClassCall<C>)]) {
        AnalysisState::on_add_many(self, eg, added);
    }

    fn on_union_many(&mut self, eg: &HashConsEGraph<N, C>, groups: &[(ClassId<C>, Vec<ClassId<C>>)]) {
        AnalysisState::on_union_many(self, eg, groups);
    }
}

/// An e-graph paired with a registry of analyses kept consistent under every
/// `add`/`union_many` call, indexed by string key (`addAnalysis`/`removeAnalysis`
/// in the distilled spec).
///
/// Forwards every read operation to the wrapped [`HashConsEGraph`] so a
/// caller holding an `&EGraphWithMetadata` can use it exactly like a plain
/// e-graph; only the two mutating entry points below know about metadata at
/// all.
pub struct EGraphWithMetadata<N, C, P> {
    eg: HashConsEGraph<N, C>,
    analyses: BTreeMap<String, Box<dyn AnalysisHandle<N, C>>>,
    parallel: P,
}

impl<N: fmt::Debug, C, P: fmt::Debug> fmt::Debug for EGraphWithMetadata<N, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EGraphWithMetadata")
            .field("eg", &self.eg)
            .field("analyses", &self.analyses.keys().collect::<Vec<_>>())
            .field("parallel", &self.parallel)
            .finish()
    }
}

impl<N, C, P: ParallelMap> EGraphWithMetadata<N, C, P> {
    #[must_use]
    pub fn new(eg: HashConsEGraph<N, C>, parallel: P) -> Self {
        Self {
            eg,
            analyses: BTreeMap::new(),
            parallel,
        }
    }

    #[must_use]
    pub fn egraph(&self) -> &HashConsEGraph<N, C> { &self.eg }

    pub fn remove_analysis(&mut self, key: &str) { self.analyses.remove(key); }
}

impl<N: Ord + Clone + Send + Sync + 'static, C: Send + Sync + 'static, P: ParallelMap> EGraphWithMetadata<N, C, P> {
    /// Attaches an analysis under `key`, replacing any analysis previously
    /// registered there.
    pub fn add_analysis<A: Analysis<N, C> + 'static>(&mut self, key: impl Into<String>, analysis: A) {
        self.analyses
            .insert(key.into(), Box::new(AnalysisState::new(analysis)));
    }

    /// The result of the analysis registered under `key`, projected into
    /// `call`'s own context.
    #[must_use]
    pub fn result<A: Analysis<N, C> + 'static>(&self, key: &str, call: &EClassCall<C>) -> Option<A::Value> {
        let handle = self.analyses.get(key)?;
        let state = handle.as_any().downcast_ref::<AnalysisState<N, C, A>>()?;
        state.get(&self.eg, call)
    }

    /// Inserts a node, then runs every registered analysis's `on_add_many`
    /// in parallel across keys.
    ///
    /// # Errors
    /// Propagates [`NoNode`] from [`HashConsEGraph::add`].
    pub fn add(&mut self, node: ENode<N, C>) -> Result<EClassCall<C>, NoNode> {
        let call = self.eg.add(node.clone())?;
        self.run_on_add(&[(node, call.clone())]);
        Ok(call)
    }

    fn run_on_add(&mut self, added: &[(ENode<N, C>, EClassCall<C>)]) {
        let eg = &self.eg;
        let handles = std::mem::take(&mut self.analyses);
        let updated = self.parallel.map_collect(handles.into_iter().collect::<Vec<_>>(), |(key, mut handle)| {
            handle.on_add_many(eg, added);
            (key, handle)
        });
        self.analyses = updated.into_iter().collect();
    }

    /// Unions each pair, then runs every registered analysis's
    /// `on_union_many` in parallel across keys against the groups the
    /// rebuild actually discovered.
    ///
    /// # Errors
    /// Propagates [`crate::egraph::MergeError`] from the underlying union.
    pub fn union_many(
        &mut self,
        pairs: &[(EClassCall<C>, EClassCall<C>)],
    ) -> Result<(), crate::egraph::MergeError> {
        let before: BTreeMap<ClassId<C>, ClassId<C>> = self
            .eg
            .all_classes()
            .map(|c| (c, self.eg.find(c).unwrap_or_else(|_| unreachable!())))
            .collect();

        {
            let mut w = self.eg.write();
            for (a, b) in pairs {
                w.union(a, b)?;
            }
        }

        // Only a id that used to BE a root can have carried an analysis
        // result (`results` is keyed by canonical class only), so fold in
        // distinct former roots rather than every id `all_classes` touched.
        let mut groups: BTreeMap<ClassId<C>, Vec<ClassId<C>>> = BTreeMap::new();
        let mut former_roots: BTreeSet<ClassId<C>> = BTreeSet::new();
        for old_root in before.into_values() {
            if !former_roots.insert(old_root) {
                continue;
            }
            let new_root = self.eg.find(old_root).unwrap_or_else(|_| unreachable!());
            if new_root != old_root {
                groups.entry(new_root).or_default().push(old_root);
            }
        }
        let groups: Vec<(ClassId<C>, Vec<ClassId<C>>)> = groups.into_iter().collect();

        if !groups.is_empty() {
            let eg = &self.eg;
            let handles = std::mem::take(&mut self.analyses);
            let updated = self.parallel.map_collect(handles.into_iter().collect::<Vec<_>>(), |(key, mut handle)| {
                handle.on_union_many(eg, &groups);
                (key, handle)
            });
            self.analyses = updated.into_iter().collect();
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Analysis, EGraphWithMetadata};
    use crate::{
        egraph::{ENode, HashConsEGraph},
        parallel::Sequential,
        tree::MixedTree,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Op {
        Add,
        Lit(i64),
    }

    #[derive(Debug)]
    struct Expr;

    #[derive(Debug)]
    struct ConstFold;

    impl Analysis<Op, Expr> for ConstFold {
        type Value = Option<i64>;

        fn name(&self) -> &str { "const-fold" }

        fn make(&self, node: &ENode<Op, Expr>, args: &[Self::Value]) -> Self::Value {
            match node.op() {
                Op::Lit(n) => Some(*n),
                Op::Add => Some(args[0]? + args[1]?),
            }
        }

        fn join(&self, a: &Self::Value, b: &Self::Value) -> Self::Value { a.or(*b) }

        fn rename(&self, value: &Self::Value, _map: &crate::slot_map::SlotMap) -> Self::Value { *value }
    }

    fn leaf(n: i64) -> MixedTree<Op, crate::egraph::EClassCall<Expr>> {
        MixedTree::node(Op::Lit(n), Arc::from([]), Arc::from([]), Arc::from([]))
    }

    #[test]
    fn propagates_constant_through_add() {
        let mut eg = EGraphWithMetadata::new(HashConsEGraph::<Op, Expr>::new(), Sequential);
        eg.add_analysis("const-fold", ConstFold);

        let two = leaf(2).insert_via(&mut eg);
        let three = leaf(3).insert_via(&mut eg);
        let sum_node = ENode::new(
            Arc::new(Op::Add),
            Arc::from([]),
            Arc::from([]),
            Arc::from([two, three]),
        );
        let sum = eg.add(sum_node).unwrap();

        assert_eq!(eg.result::<ConstFold>("const-fold", &sum), Some(Some(5)));
    }

    #[test]
    fn union_joins_known_constant_into_fresh_class() {
        let mut eg = EGraphWithMetadata::new(HashConsEGraph::<Op, Expr>::new(), Sequential);
        eg.add_analysis("const-fold", ConstFold);

        let two = leaf(2).insert_via(&mut eg);
        let three = leaf(3).insert_via(&mut eg);
        let sum_node = ENode::new(
            Arc::new(Op::Add),
            Arc::from([]),
            Arc::from([]),
            Arc::from([two, three]),
        );
        let sum = eg.add(sum_node).unwrap();

        let fresh_node = ENode::new(Arc::new(Op::Lit(999)), Arc::from([]), Arc::from([]), Arc::from([]));
        let fresh = eg.add(fresh_node).unwrap();
        eg.remove_analysis("does-not-exist");

        eg.union_many(&[(sum.clone(), fresh.clone())]).unwrap();
        assert_eq!(eg.result::<ConstFold>("const-fold", &fresh), Some(Some(5)));
    }

    trait InsertHelper<C> {
        fn insert_via<P: crate::parallel::ParallelMap>(
            &self,
            eg: &mut EGraphWithMetadata<Op, C, P>,
        ) -> crate::egraph::EClassCall<C>;
    }

    impl InsertHelper<Expr> for MixedTree<Op, crate::egraph::EClassCall<Expr>> {
        fn insert_via<P: crate::parallel::ParallelMap>(
            &self,
            eg: &mut EGraphWithMetadata<Op, Expr, P>,
        ) -> crate::egraph::EClassCall<Expr> {
            match self {
                MixedTree::Atom(c) => c.clone(),
                MixedTree::Node(op, defs, uses, args) => {
                    let args: Arc<[_]> = args.iter().map(|a| a.insert_via(eg)).collect();
                    eg.add(ENode::new(Arc::clone(op), Arc::clone(defs), Arc::clone(uses), args))
                        .unwrap()
                },
            }
        }
    }
}
