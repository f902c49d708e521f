//! Rewrite rules: a [`Searcher`] that finds matches, an [`Applier`] that
//! turns each match into a batch of graph edits, and [`Rule`] gluing the two
//! together with a name for diagnostics.
//!
//! The left-hand-side/right-hand-side convenience constructor mirrors the
//! teacher's treatment of rewrite rules as data rather than closures: a
//! [`Rule::rewrite`] stores both patterns so [`Rule::reverse`] can hand back
//! an independently-searchable rule for the swapped direction, the same
//! shape as symbolic rewrite systems that need to run both ways without
//! re-deriving the reverse from scratch.

use std::{fmt, panic::AssertUnwindSafe};

use crate::{
    command::{Command, CommandNode, EClassSymbol, SymbolCall},
    egraph::HashConsEGraph,
    free::Free,
    pattern::{MachineSearcherPhase, Pattern, PatternMatch, PatternVar},
    slot::Slot,
    slot_map::SlotMap,
    slot_set::SlotSet,
    tree::MixedTree,
};

/// Finds every way a rule's left-hand side currently matches the graph.
pub trait Searcher<N, C>: fmt::Debug + Send + Sync {
    fn search(&self, eg: &HashConsEGraph<N, C>) -> Vec<PatternMatch<N, C>>;
}

impl<N: Ord + Clone + fmt::Debug + Send + Sync, C: Send + Sync> Searcher<N, C>
    for MachineSearcherPhase<N>
{
    fn search(&self, eg: &HashConsEGraph<N, C>) -> Vec<PatternMatch<N, C>> { self.search(eg) }
}

/// Applies a searcher, then only keeps matches `predicate` accepts.
pub struct FilterSearcher<N, C> {
    inner: Box<dyn Searcher<N, C>>,
    predicate: Box<dyn Fn(&PatternMatch<N, C>) -> bool + Send + Sync>,
}

impl<N, C> fmt::Debug for FilterSearcher<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSearcher").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<N, C> FilterSearcher<N, C> {
    pub fn new(
        inner: impl Searcher<N, C> + 'static,
        predicate: impl Fn(&PatternMatch<N, C>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Box::new(inner),
            predicate: Box::new(predicate),
        }
    }
}

impl<N: Send + Sync, C: Send + Sync> Searcher<N, C> for FilterSearcher<N, C> {
    fn search(&self, eg: &HashConsEGraph<N, C>) -> Vec<PatternMatch<N, C>> {
        self.inner
            .search(eg)
            .into_iter()
            .filter(|m| (self.predicate)(m))
            .collect()
    }
}

/// The Cartesian product of two searchers' matches, merged wherever they
/// agree on shared variables and slots (see [`PatternMatch::merge`]),
/// dropping combinations that disagree. Used to compose two independently
/// searched pattern fragments into one conjunctive match, the way a
/// multi-pattern rule body is usually expressed.
pub struct ProductSearcher<N, C> {
    left: Box<dyn Searcher<N, C>>,
    right: Box<dyn Searcher<N, C>>,
}

impl<N, C> fmt::Debug for ProductSearcher<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductSearcher")
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}

impl<N, C> ProductSearcher<N, C> {
    pub fn new(left: impl Searcher<N, C> + 'static, right: impl Searcher<N, C> + 'static) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl<N: PartialEq + Ord + Clone + Send + Sync, C: Ord + Clone + Send + Sync> Searcher<N, C>
    for ProductSearcher<N, C>
{
    fn search(&self, eg: &HashConsEGraph<N, C>) -> Vec<PatternMatch<N, C>> {
        let lefts = self.left.search(eg);
        let rights = self.right.search(eg);

        let mut out = std::collections::BTreeSet::new();
        for l in &lefts {
            for r in &rights {
                if let Some(merged) = l.merge(r) {
                    out.insert(merged);
                }
            }
        }
        out.into_iter().collect()
    }
}

/// Turns one match into a batch of graph edits realizing a rule's
/// right-hand side.
pub trait Applier<N, C>: fmt::Debug + Send + Sync {
    fn apply(&self, m: &PatternMatch<N, C>, ids: &mut Free<u64>) -> Command<N, C>;
}

/// Instantiates a fixed [`Pattern`] against a match: every pattern variable
/// is replaced by the e-class it matched, every pattern slot is replaced by
/// whatever the match bound it to (falling back to the pattern's own literal
/// slot for a slot the left-hand side never touched, e.g. a fresh binder the
/// right-hand side introduces).
#[derive(Debug, Clone)]
pub struct PatternApplier<N> {
    pattern: Pattern<N>,
}

impl<N> PatternApplier<N> {
    #[must_use]
    pub fn new(pattern: Pattern<N>) -> Self { Self { pattern } }
}

impl<N: Ord + Clone + fmt::Debug + Send + Sync, C: Copy + Ord + Send + Sync> Applier<N, C>
    for PatternApplier<N>
{
    fn apply(&self, m: &PatternMatch<N, C>, ids: &mut Free<u64>) -> Command<N, C> {
        let mut adds = Vec::new();
        let result = lower(&self.pattern, m, ids, &mut adds);
        adds_to_command(adds, result, m.root())
    }
}

fn lower<N: Clone, C: Copy>(
    pattern: &Pattern<N>,
    m: &PatternMatch<N, C>,
    ids: &mut Free<u64>,
    adds: &mut Vec<(EClassSymbol<C>, CommandNode<N, C>)>,
) -> SymbolCall<C> {
    match pattern {
        MixedTree::Atom(var) => bound_call(m, *var),
        MixedTree::Node(op, defs, uses, args) => {
            let arg_calls: Vec<SymbolCall<C>> = args.iter().map(|a| lower(a, m, ids, adds)).collect();

            let rename = |s: &Slot| m.slot_mapping().get(s).copied().unwrap_or(*s);
            let definitions: Vec<Slot> = defs.iter().map(rename).collect();
            let uses: Vec<Slot> = uses.iter().map(rename).collect();

            let mut free = uses.iter().copied().collect::<SlotSet>();
            for call in &arg_calls {
                free = free.union(&call.args().value_set());
            }

            let id = ids.fresh();
            let symbol = EClassSymbol::virtual_id(id);
            adds.push((symbol, CommandNode {
                op: (**op).clone(),
                definitions,
                uses,
                args: arg_calls,
            }));
            SymbolCall::new(symbol, SlotMap::identity(&free))
        },
    }
}

fn bound_call<N, C: Copy>(m: &PatternMatch<N, C>, var: PatternVar) -> SymbolCall<C> {
    match m.var_mapping().get(&var) {
        Some(MixedTree::Atom(call)) => SymbolCall::real(call),
        Some(MixedTree::Node(..)) => {
            unreachable!("pattern variables only ever bind to e-class leaves")
        },
        None => unreachable!("rule right-hand side used a variable its left-hand side never bound"),
    }
}

fn adds_to_command<N, C: Copy>(
    adds: Vec<(EClassSymbol<C>, CommandNode<N, C>)>,
    result: SymbolCall<C>,
    root: &crate::egraph::EClassCall<C>,
) -> Command<N, C> {
    Command::Queue(vec![
        Command::AddMany(adds),
        Command::UnionMany(vec![(SymbolCall::real(root), result)]),
    ])
}

/// A searcher/applier pair with a stable name for diagnostics, optionally
/// remembering the left/right patterns it was built from so it can be run
/// in reverse.
pub struct Rule<N, C> {
    name: String,
    searcher: Box<dyn Searcher<N, C>>,
    applier: Box<dyn Applier<N, C>>,
    reversible: Option<(Pattern<N>, Pattern<N>)>,
}

impl<N: fmt::Debug, C> fmt::Debug for Rule<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("searcher", &self.searcher)
            .field("applier", &self.applier)
            .finish_non_exhaustive()
    }
}

impl<N, C> Rule<N, C> {
    pub fn new(
        name: impl Into<String>,
        searcher: impl Searcher<N, C> + 'static,
        applier: impl Applier<N, C> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            searcher: Box::new(searcher),
            applier: Box::new(applier),
            reversible: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub fn searcher(&self) -> &dyn Searcher<N, C> { &*self.searcher }

    #[must_use]
    pub fn applier(&self) -> &dyn Applier<N, C> { &*self.applier }
}

impl<N: Ord + Clone + fmt::Debug + Send + Sync + 'static, C: Copy + Ord + Send + Sync + 'static>
    Rule<N, C>
{
    /// Builds a rule from a left/right pattern pair, keeping both around so
    /// [`Self::reverse`] can hand back the flipped rule.
    #[must_use]
    pub fn rewrite(name: impl Into<String>, lhs: Pattern<N>, rhs: Pattern<N>) -> Self {
        let searcher = MachineSearcherPhase::new(&lhs);
        let applier = PatternApplier::new(rhs.clone());
        Self {
            name: name.into(),
            searcher: Box::new(searcher),
            applier: Box::new(applier),
            reversible: Some((lhs, rhs)),
        }
    }

    /// The reverse of a rule built with [`Self::rewrite`]: swaps the
    /// left/right patterns and re-derives a fresh name.
    #[must_use]
    pub fn reverse(&self) -> Option<Self> {
        let (lhs, rhs) = self.reversible.clone()?;
        Some(Self::rewrite(format!("{}-reverse", self.name), rhs, lhs))
    }
}

/// A rule's searcher or applier panicked mid-round.
///
/// Appliers stay infallible (`Applier::apply` returns a bare [`Command`],
/// never a `Result`) so a rule author writing `2 + 2` arithmetic in an
/// applier doesn't have to thread an error type through code that structurally
/// cannot fail; this type exists purely to give the one case that *can*
/// panic (a bug in the applier) a name and a graph snapshot before it's
/// rethrown as fatal.
pub struct RuleError<N, C> {
    pub rule: String,
    pub graph: HashConsEGraph<N, C>,
}

impl<N, C> fmt::Debug for RuleError<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleError").field("rule", &self.rule).finish_non_exhaustive()
    }
}

impl<N, C> fmt::Display for RuleError<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {:?} panicked while applying a match", self.rule)
    }
}

impl<N, C> std::error::Error for RuleError<N, C> {}

/// Runs `f`, catching any panic and wrapping it with `rule`'s name and a
/// snapshot of `graph` (cheap: [`HashConsEGraph`] clones are structural
/// sharing via `Arc`/persistent maps, not deep copies).
///
/// # Errors
/// [`RuleError`] if `f` panicked.
pub fn catch_apply<N: Clone, C, R>(
    rule: &str,
    graph: &HashConsEGraph<N, C>,
    f: impl FnOnce() -> R,
) -> Result<R, RuleError<N, C>> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| RuleError {
        rule: rule.to_owned(),
        graph: graph.clone(),
    })
}

/// A reversible rule built once up front and stored as a forward/backward
/// pair, the way saturation strategies that want both directions of an
/// equivalence (e.g. commutativity, associativity) use them without having
/// to remember to register each direction separately.
#[must_use]
pub fn rule_and_reverse<
    N: Ord + Clone + fmt::Debug + Send + Sync + 'static,
    C: Copy + Ord + Send + Sync + 'static,
>(
    name: impl Into<String>,
    lhs: Pattern<N>,
    rhs: Pattern<N>,
) -> Vec<Rule<N, C>> {
    let fwd = Rule::rewrite(name, lhs, rhs);
    let bwd = fwd.reverse();
    let mut out = vec![fwd];
    out.extend(bwd);
    out
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Applier, PatternApplier, Rule};
    use crate::{
        command,
        egraph::HashConsEGraph,
        free::Free,
        pattern::PatternVarSource,
        tree::MixedTree,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Op {
        Add,
        Leaf(u32),
    }

    fn leaf(n: u32) -> MixedTree<Op, crate::egraph::EClassCall<()>> {
        MixedTree::node(Op::Leaf(n), Arc::from([]), Arc::from([]), Arc::from([]))
    }

    #[test]
    fn commutativity_rewrite_unions_swapped_args() {
        let mut eg = HashConsEGraph::<Op, ()>::new();
        let one = leaf(1).insert(&mut eg).unwrap();
        let two = leaf(2).insert(&mut eg).unwrap();
        let sum = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(one.clone()), MixedTree::Atom(two.clone())]),
        )
        .insert(&mut eg)
        .unwrap();

        let mut vars = PatternVarSource::new();
        let x = vars.fresh();
        let y = vars.fresh();
        let lhs: crate::pattern::Pattern<Op> = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(x), MixedTree::Atom(y)]),
        );
        let rhs: crate::pattern::Pattern<Op> = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(y), MixedTree::Atom(x)]),
        );

        let rule = Rule::rewrite("add-comm", lhs, rhs);
        let matches = rule.searcher().search(&eg);
        assert_eq!(matches.len(), 1);

        let mut ids = Free::from(0u64);
        let cmd = rule.applier().apply(&matches[0], &mut ids);
        let (_, changed) = command::apply(&mut eg, vec![cmd]).unwrap();

        let swapped = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(two), MixedTree::Atom(one)]),
        )
        .insert(&mut eg)
        .unwrap();

        assert!(changed);
        assert_eq!(eg.find(sum.class()).unwrap(), eg.find(swapped.class()).unwrap());
    }

    #[test]
    fn reverse_rule_swaps_patterns_and_renames() {
        let mut vars = PatternVarSource::new();
        let x = vars.fresh();
        let y = vars.fresh();
        let lhs: crate::pattern::Pattern<Op> = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(x), MixedTree::Atom(y)]),
        );
        let rhs: crate::pattern::Pattern<Op> = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(y), MixedTree::Atom(x)]),
        );

        let rule = Rule::rewrite("add-comm", lhs, rhs);
        let reverse = rule.reverse().expect("rewrite-constructed rule must be reversible");
        assert_eq!(reverse.name(), "add-comm-reverse");
    }
}
