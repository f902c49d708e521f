//! Reading a concrete tree back out of a saturated e-graph by minimizing a
//! user-supplied [`CostFunction`] over each class, bottom-up, the same
//! bottom-up minimum-cost-subtree selection a cost model built over an
//! e-graph IR otherwise computes by hand over a serialized graph.
//!
//! [`Extract`] is itself just an [`Analysis`] whose value is the cheapest
//! tree known so far for a class (a [`Best`]); running it to quiescence via
//! [`crate::analysis::EGraphWithMetadata`] and reading the root's value back
//! out is extraction. [`TopKCostAnalysis`] generalizes this to keep the `k`
//! cheapest distinct trees per class instead of only the single best,
//! trading memory for resilience against the well-known failure mode of
//! greedy bottom-up extraction: the locally-cheapest child is not always
//! part of the globally-cheapest parent.

use std::{cmp::Ordering, convert::Infallible, fmt, sync::Arc};

use crate::{
    analysis::Analysis,
    egraph::ENode,
    slot::Slot,
    slot_map::SlotMap,
    tree::MixedTree,
};

/// A fully concrete tree with no remaining e-class references: the result of
/// extraction.
pub type ExtractedTree<N> = MixedTree<N, Infallible>;

/// Renames every slot an [`ExtractedTree`] mentions, rebuilt bottom-up with
/// an explicit work stack (mirrors [`MixedTree::try_map_atoms`]'s own
/// traversal, since this tree has no atoms to delegate renaming through).
#[must_use]
pub fn rename_tree<N: Clone>(tree: &ExtractedTree<N>, map: &SlotMap) -> ExtractedTree<N> {
    enum Frame<'a, N> {
        Visit(&'a ExtractedTree<N>),
        Build(Arc<N>, Arc<[Slot]>, Arc<[Slot]>, usize),
    }

    let rename_slot = |s: &Slot| map.get(*s).unwrap_or(*s);

    let mut work = vec![Frame::Visit(tree)];
    let mut results: Vec<ExtractedTree<N>> = Vec::new();

    while let Some(frame) = work.pop() {
        match frame {
            Frame::Visit(MixedTree::Atom(inf)) => match *inf {},
            Frame::Visit(MixedTree::Node(op, defs, uses, args)) => {
                let definitions: Arc<[Slot]> = defs.iter().map(rename_slot).collect();
                let uses: Arc<[Slot]> = uses.iter().map(rename_slot).collect();
                work.push(Frame::Build(Arc::clone(op), definitions, uses, args.len()));
                work.extend(args.iter().map(Frame::Visit).rev());
            },
            Frame::Build(op, defs, uses, n) => {
                let split = results.len() - n;
                let args: Arc<[ExtractedTree<N>]> = results.split_off(split).into();
                results.push(MixedTree::Node(op, defs, uses, args));
            },
        }
    }

    results.pop().expect("postorder traversal must leave exactly one result")
}

/// Assigns a class's nodes a cost, given the already-extracted costs of its
/// arguments.
pub trait CostFunction<N>: fmt::Debug + Send + Sync {
    type Cost: Ord + Clone + fmt::Debug + Send + Sync;

    fn cost(&self, op: &N, arg_costs: &[Self::Cost]) -> Self::Cost;
}

/// The simplest cost function: one point per node, so the cheapest tree is
/// the smallest one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AstSize;

impl<N> CostFunction<N> for AstSize {
    type Cost = usize;

    fn cost(&self, _op: &N, arg_costs: &[Self::Cost]) -> Self::Cost {
        1 + arg_costs.iter().sum::<usize>()
    }
}

/// The number of nodes in an [`ExtractedTree`].
#[must_use]
pub fn size<N>(tree: &ExtractedTree<N>) -> usize {
    let mut stack = vec![tree];
    let mut count = 0usize;
    while let Some(t) = stack.pop() {
        match t {
            MixedTree::Atom(inf) => match *inf {},
            MixedTree::Node(_, _, _, args) => {
                count += 1;
                stack.extend(args.iter());
            },
        }
    }
    count
}

/// The longest root-to-leaf path in an [`ExtractedTree`].
#[must_use]
pub fn depth<N>(tree: &ExtractedTree<N>) -> usize {
    let mut stack = vec![(tree, 1usize)];
    let mut max = 0usize;
    while let Some((t, d)) = stack.pop() {
        match t {
            MixedTree::Atom(inf) => match *inf {},
            MixedTree::Node(_, _, _, args) => {
                max = max.max(d);
                stack.extend(args.iter().map(|a| (a, d + 1)));
            },
        }
    }
    max
}

/// The cheapest [`ExtractedTree`] found so far for a class, ordered first by
/// cost, then (to keep extraction deterministic among equal-cost trees) by
/// size, depth, and finally the tree's own structural order.
#[derive(Clone, Debug)]
pub struct Best<N, Cost> {
    cost: Cost,
    tree: Arc<ExtractedTree<N>>,
}

impl<N, Cost> Best<N, Cost> {
    #[must_use]
    pub fn cost(&self) -> &Cost { &self.cost }

    #[must_use]
    pub fn tree(&self) -> &ExtractedTree<N> { &self.tree }

    #[must_use]
    pub fn into_tree(self) -> Arc<ExtractedTree<N>> { self.tree }
}

impl<N: PartialEq, Cost: PartialEq> PartialEq for Best<N, Cost> {
    fn eq(&self, other: &Self) -> bool { self.cost == other.cost && self.tree == other.tree }
}

impl<N: Eq, Cost: Eq> Eq for Best<N, Cost> {}

impl<N: Ord, Cost: Ord> Ord for Best<N, Cost> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| size(&self.tree).cmp(&size(&other.tree)))
            .then_with(|| depth(&self.tree).cmp(&depth(&other.tree)))
            .then_with(|| self.tree.cmp(&other.tree))
    }
}

impl<N: Ord, Cost: Ord> PartialOrd for Best<N, Cost> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

fn instantiate<N: Clone, Cost>(
    op: &N,
    definitions: &[Slot],
    uses: &[Slot],
    cost_fn: &impl CostFunction<N, Cost = Cost>,
    children: &[Best<N, Cost>],
) -> Best<N, Cost> {
    let costs: Vec<Cost> = children.iter().map(|b| b.cost.clone()).collect();
    let cost = cost_fn.cost(op, &costs);
    let trees: Arc<[ExtractedTree<N>]> = children.iter().map(|b| (*b.tree).clone()).collect();
    let tree = MixedTree::node(op.clone(), definitions.into(), uses.into(), trees);
    Best {
        cost,
        tree: Arc::new(tree),
    }
}

/// Extracts the cheapest tree per class under a [`CostFunction`].
#[derive(Debug)]
pub struct Extract<CF> {
    cost_fn: CF,
}

impl<CF> Extract<CF> {
    #[must_use]
    pub fn new(cost_fn: CF) -> Self { Self { cost_fn } }
}

impl<N, C, CF> Analysis<N, C> for Extract<CF>
where
    N: Ord + Clone + fmt::Debug + Send + Sync,
    C: Send + Sync,
    CF: CostFunction<N> + fmt::Debug + Send + Sync,
{
    type Value = Best<N, CF::Cost>;

    fn name(&self) -> &str { "extract" }

    fn make(&self, node: &ENode<N, C>, arg_values: &[Self::Value]) -> Self::Value {
        instantiate(node.op(), node.definitions(), node.uses(), &self.cost_fn, arg_values)
    }

    fn join(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        if a <= b { a.clone() } else { b.clone() }
    }

    fn rename(&self, value: &Self::Value, map: &SlotMap) -> Self::Value {
        Best {
            cost: value.cost.clone(),
            tree: Arc::new(rename_tree(&value.tree, map)),
        }
    }
}

/// The `k` cheapest distinct extractions known so far for a class, sorted
/// ascending by the same order [`Best`] uses.
#[derive(Clone, Debug)]
pub struct TopK<N, Cost>(Vec<Best<N, Cost>>);

impl<N, Cost> TopK<N, Cost> {
    #[must_use]
    pub fn best(&self) -> Option<&Best<N, Cost>> { self.0.first() }

    #[must_use]
    pub fn entries(&self) -> &[Best<N, Cost>] { &self.0 }
}

impl<N: PartialEq, Cost: PartialEq> PartialEq for TopK<N, Cost> {
    fn eq(&self, other: &Self) -> bool { self.0 == other.0 }
}

/// Keeps the `k` cheapest distinct extractions per class rather than only
/// the single best, combining each node's arguments' candidate sets
/// combinatorially before re-capping to `k`.
///
/// `k` is a per-node product (arity `n` costs up to `k^n` candidates before
/// truncation), so this is only suitable for small `k` and shallow fan-in;
/// [`Extract`] is the right choice once a graph's rules produce wide nodes.
#[derive(Debug)]
pub struct TopKCostAnalysis<CF> {
    cost_fn: CF,
    k: usize,
}

impl<CF> TopKCostAnalysis<CF> {
    #[must_use]
    pub fn new(cost_fn: CF, k: usize) -> Self { Self { cost_fn, k: k.max(1) } }
}

impl<N, C, CF> Analysis<N, C> for TopKCostAnalysis<CF>
where
    N: Ord + Clone + fmt::Debug + Send + Sync,
    C: Send + Sync,
    CF: CostFunction<N> + fmt::Debug + Send + Sync,
{
    type Value = TopK<N, CF::Cost>;

    fn name(&self) -> &str { "extract-topk" }

    fn make(&self, node: &ENode<N, C>, arg_values: &[Self::Value]) -> Self::Value {
        let mut combos: Vec<Vec<Best<N, CF::Cost>>> = vec![Vec::new()];
        for arg in arg_values {
            let mut next = Vec::with_capacity(combos.len() * arg.entries().len().max(1));
            for combo in &combos {
                for candidate in arg.entries() {
                    let mut extended = combo.clone();
                    extended.push(candidate.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }

        let mut candidates: Vec<Best<N, CF::Cost>> = combos
            .into_iter()
            .map(|combo| instantiate(node.op(), node.definitions(), node.uses(), &self.cost_fn, &combo))
            .collect();

        candidates.sort();
        candidates.dedup();
        candidates.truncate(self.k);
        TopK(candidates)
    }

    fn join(&self, a: &Self::Value, b: &Self::Value) -> Self::Value {
        let mut merged: Vec<_> = a.0.iter().chain(b.0.iter()).cloned().collect();
        merged.sort();
        merged.dedup();
        merged.truncate(self.k);
        TopK(merged)
    }

    fn rename(&self, value: &Self::Value, map: &SlotMap) -> Self::Value {
        TopK(
            value
                .0
                .iter()
                .map(|b| Best {
                    cost: b.cost.clone(),
                    tree: Arc::new(rename_tree(&b.tree, map)),
                })
                .collect(),
        )
    }
}

/// Reads the cheapest known tree for `root`'s class out of a metadata
/// registry already carrying an [`Extract`] analysis under `key`.
///
/// Returns `None` if no analysis is registered under `key`, the analysis was
/// registered under `key` with a different cost function, or the class has
/// no value yet (some subtree is still unresolved).
#[must_use]
pub fn extract<N, C, P, CF>(
    key: &str,
    root: &crate::egraph::EClassCall<C>,
    metadata: &crate::analysis::EGraphWithMetadata<N, C, P>,
) -> Option<Arc<ExtractedTree<N>>>
where
    N: Ord + Clone + fmt::Debug + Send + Sync + 'static,
    C: Send + Sync + 'static,
    P: crate::parallel::ParallelMap,
    CF: CostFunction<N> + fmt::Debug + Send + Sync + 'static,
{
    metadata.result::<Extract<CF>>(key, root).map(Best::into_tree)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{extract, size, AstSize, CostFunction, ExtractedTree, Extract};
    use crate::{
        analysis::EGraphWithMetadata,
        egraph::{ENode, HashConsEGraph},
        parallel::Sequential,
        tree::MixedTree,
    };

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Op {
        Add,
        Leaf(u32),
    }

    #[derive(Debug)]
    struct Expr;

    fn leaf(n: u32) -> MixedTree<Op, crate::egraph::EClassCall<Expr>> {
        MixedTree::node(Op::Leaf(n), Arc::from([]), Arc::from([]), Arc::from([]))
    }

    fn insert(
        tree: &MixedTree<Op, crate::egraph::EClassCall<Expr>>,
        eg: &mut EGraphWithMetadata<Op, Expr, Sequential>,
    ) -> crate::egraph::EClassCall<Expr> {
        match tree {
            MixedTree::Atom(c) => c.clone(),
            MixedTree::Node(op, defs, uses, args) => {
                let args: Arc<[_]> = args.iter().map(|a| insert(a, eg)).collect();
                eg.add(ENode::new(Arc::clone(op), Arc::clone(defs), Arc::clone(uses), args))
                    .unwrap()
            },
        }
    }

    #[test]
    fn picks_the_cheaper_of_two_equivalent_trees() {
        let mut eg = EGraphWithMetadata::new(HashConsEGraph::<Op, Expr>::new(), Sequential);
        eg.add_analysis("extract", Extract::new(AstSize));

        let one = leaf(1);
        let two = leaf(2);
        let sum = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([one.clone(), two.clone()]),
        );
        let sum_call = insert(&sum, &mut eg);

        let small = leaf(3);
        let small_call = insert(&small, &mut eg);
        eg.union_many(&[(sum_call.clone(), small_call)]).unwrap();

        let best = extract::<Op, Expr, Sequential, AstSize>("extract", &sum_call, &eg).unwrap();
        assert_eq!(size(&best), 1);
    }

    /// The matrix-chain scenario: every parenthesization of a four-matrix
    /// product names the same result, so unioning them all together and
    /// extracting under a `rows * middle * cols` multiply cost must return
    /// the cheapest parenthesization and its exact flop count.
    #[test]
    fn matrix_chain_extraction_finds_optimal_parenthesization() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        enum MOp {
            Mat(u64, u64),
            Mul,
        }

        #[derive(Debug)]
        struct MExpr;

        #[derive(Debug, Clone, Copy, Default)]
        struct MmCost;

        // Cost carries (flops so far, result rows, result cols) so a
        // `Mul`'s cost can be computed from its two children's costs alone.
        impl CostFunction<MOp> for MmCost {
            type Cost = (u64, u64, u64);

            fn cost(&self, op: &MOp, args: &[Self::Cost]) -> Self::Cost {
                match *op {
                    MOp::Mat(r, c) => (0, r, c),
                    MOp::Mul => {
                        let (lf, lr, lc) = args[0];
                        let (rf, rr, rc) = args[1];
                        debug_assert_eq!(lc, rr, "matrix chain dimensions must agree");
                        (lf + rf + lr * lc * rc, lr, rc)
                    },
                }
            }
        }

        fn mat(r: u64, c: u64) -> MixedTree<MOp, crate::egraph::EClassCall<MExpr>> {
            MixedTree::node(MOp::Mat(r, c), Arc::from([]), Arc::from([]), Arc::from([]))
        }

        fn mul(
            a: MixedTree<MOp, crate::egraph::EClassCall<MExpr>>,
            b: MixedTree<MOp, crate::egraph::EClassCall<MExpr>>,
        ) -> MixedTree<MOp, crate::egraph::EClassCall<MExpr>> {
            MixedTree::node(MOp::Mul, Arc::from([]), Arc::from([]), Arc::from([a, b]))
        }

        fn insert_m(
            tree: &MixedTree<MOp, crate::egraph::EClassCall<MExpr>>,
            eg: &mut EGraphWithMetadata<MOp, MExpr, Sequential>,
        ) -> crate::egraph::EClassCall<MExpr> {
            match tree {
                MixedTree::Atom(c) => c.clone(),
                MixedTree::Node(op, defs, uses, args) => {
                    let args: Arc<[_]> = args.iter().map(|a| insert_m(a, eg)).collect();
                    eg.add(ENode::new(Arc::clone(op), Arc::clone(defs), Arc::clone(uses), args))
                        .unwrap()
                },
            }
        }

        let a = || mat(200, 175);
        let b = || mat(175, 250);
        let c = || mat(250, 150);
        let d = || mat(150, 10);

        // The five ways to parenthesize A*B*C*D.
        let parens = [
            mul(mul(mul(a(), b()), c()), d()),
            mul(mul(a(), mul(b(), c())), d()),
            mul(mul(a(), b()), mul(c(), d())),
            mul(a(), mul(mul(b(), c()), d())),
            mul(a(), mul(b(), mul(c(), d()))),
        ];

        let mut eg = EGraphWithMetadata::new(HashConsEGraph::<MOp, MExpr>::new(), Sequential);
        eg.add_analysis("mm", Extract::new(MmCost));

        let calls: Vec<_> = parens.iter().map(|t| insert_m(t, &mut eg)).collect();
        let adjacent: Vec<_> = calls.windows(2).map(|w| (w[0].clone(), w[1].clone())).collect();
        eg.union_many(&adjacent).unwrap();

        let best = eg.result::<Extract<MmCost>>("mm", &calls[0]).unwrap();
        assert_eq!(best.cost(), &(1_162_500, 200, 10));

        // A * (B * (C * D)), the optimal parenthesization.
        fn emat(r: u64, c: u64) -> ExtractedTree<MOp> {
            MixedTree::node(MOp::Mat(r, c), Arc::from([]), Arc::from([]), Arc::from([]))
        }
        fn emul(a: ExtractedTree<MOp>, b: ExtractedTree<MOp>) -> ExtractedTree<MOp> {
            MixedTree::node(MOp::Mul, Arc::from([]), Arc::from([]), Arc::from([a, b]))
        }
        let expected = emul(emat(200, 175), emul(emat(175, 250), emul(emat(250, 150), emat(150, 10))));
        assert_eq!(*best.tree(), expected);
    }
}
