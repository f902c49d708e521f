//! Driving an e-graph to a fixpoint (or a resource limit) by repeatedly
//! searching a rule set and applying whatever matched in one batched
//! [`crate::command::apply`] call per round, the same "search everything,
//! then commit everything" split [`crate::command`] itself documents: a
//! round pays for exactly one congruence-closure pass no matter how many
//! rules fired.

use std::{fmt, panic::AssertUnwindSafe, sync::Mutex};

use rand::{distributions::WeightedError, rngs::StdRng, seq::index::sample_weighted, SeedableRng};
use tracing::{debug, debug_span};

use crate::{
    command::{apply, ApplyError},
    egraph::HashConsEGraph,
    free::Free,
    parallel::ParallelMap,
    pattern::PatternMatch,
    rule::{catch_apply, Rule, RuleError},
};

/// Drives one round of rule application against an e-graph.
///
/// Returns whether the round changed the graph; a caller looping until
/// `false` has reached a fixpoint.
pub trait Strategy<N, C> {
    /// # Errors
    /// [`StrategyError`] if a rule's applier panicked or the batched commit
    /// failed.
    fn step(&mut self, eg: &mut HashConsEGraph<N, C>) -> Result<bool, StrategyError<N, C>>;
}

/// Orders and/or filters a round's raw per-rule matches before they're
/// applied.
///
/// Exists so a caller can bound how much of a prolific rule's matches enter
/// a single round (the batch-size policy is deliberately left per-rule-set
/// rather than global: a caller with one noisy commutativity rule and nine
/// well-behaved ones should be able to cap only the noisy one).
pub trait MatchPriorities<N, C>: fmt::Debug + Send + Sync {
    /// `matches` pairs each rule's index (into the strategy's own rule list)
    /// with everything that rule matched this round. Returns the
    /// `(rule index, match)` pairs that should actually be applied, in
    /// application order.
    fn prioritize(
        &self,
        matches: Vec<(usize, Vec<PatternMatch<N, C>>)>,
    ) -> Vec<(usize, PatternMatch<N, C>)>;
}

/// Applies every match found, in rule-registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllMatches;

impl<N: fmt::Debug + Send + Sync, C: fmt::Debug + Send + Sync> MatchPriorities<N, C> for AllMatches {
    fn prioritize(
        &self,
        matches: Vec<(usize, Vec<PatternMatch<N, C>>)>,
    ) -> Vec<(usize, PatternMatch<N, C>)> {
        matches
            .into_iter()
            .flat_map(|(i, ms)| ms.into_iter().map(move |m| (i, m)))
            .collect()
    }
}

/// Caps every rule's contribution to a single round at a fixed count,
/// keeping only its first matches (in the order the searcher produced
/// them).
#[derive(Debug, Clone, Copy)]
pub struct PerRuleCap(pub usize);

impl<N: fmt::Debug + Send + Sync, C: fmt::Debug + Send + Sync> MatchPriorities<N, C> for PerRuleCap {
    fn prioritize(
        &self,
        matches: Vec<(usize, Vec<PatternMatch<N, C>>)>,
    ) -> Vec<(usize, PatternMatch<N, C>)> {
        matches
            .into_iter()
            .flat_map(|(i, ms)| ms.into_iter().take(self.0).map(move |m| (i, m)))
            .collect()
    }
}

/// Searches every rule, applies every match its [`MatchPriorities`] keeps,
/// and commits the whole round in one batch.
pub struct MaximalRuleApplication<N, C, P> {
    rules: Vec<Rule<N, C>>,
    parallel: P,
    priorities: Box<dyn MatchPriorities<N, C>>,
    ids: Free<u64>,
}

impl<N: fmt::Debug, C: fmt::Debug, P: fmt::Debug> fmt::Debug for MaximalRuleApplication<N, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaximalRuleApplication")
            .field("rules", &self.rules)
            .field("parallel", &self.parallel)
            .field("priorities", &self.priorities)
            .finish_non_exhaustive()
    }
}

impl<N: fmt::Debug + Send + Sync + 'static, C: fmt::Debug + Send + Sync + 'static, P>
    MaximalRuleApplication<N, C, P>
{
    #[must_use]
    pub fn new(rules: Vec<Rule<N, C>>, parallel: P) -> Self {
        Self {
            rules,
            parallel,
            priorities: Box::new(AllMatches),
            ids: Free::from(0u64),
        }
    }

    #[must_use]
    pub fn with_priorities(mut self, priorities: impl MatchPriorities<N, C> + 'static) -> Self {
        self.priorities = Box::new(priorities);
        self
    }
}

impl<N, C, P> MaximalRuleApplication<N, C, P> {
    #[must_use]
    pub fn rules(&self) -> &[Rule<N, C>] { &self.rules }
}

impl<N, C, P> Strategy<N, C> for MaximalRuleApplication<N, C, P>
where
    N: Ord + Clone + fmt::Debug + Send + Sync,
    C: Copy + Ord + Send + Sync,
    P: ParallelMap,
{
    fn step(&mut self, eg: &mut HashConsEGraph<N, C>) -> Result<bool, StrategyError<N, C>> {
        let _span = debug_span!("saturation_round").entered();
        let snapshot: &HashConsEGraph<N, C> = eg;
        let rules = &self.rules;
        let indices: Vec<usize> = (0..rules.len()).collect();
        let searched: Vec<(usize, Vec<PatternMatch<N, C>>)> =
            self.parallel.map_collect(indices, |i| (i, rules[i].searcher().search(snapshot)));

        let prioritized = self.priorities.prioritize(searched);
        debug!(matches = prioritized.len(), "round gathered matches");
        if prioritized.is_empty() {
            return Ok(false);
        }

        let mut commands = Vec::with_capacity(prioritized.len());
        for (i, m) in &prioritized {
            let rule = &self.rules[*i];
            let ids = &mut self.ids;
            let cmd = catch_apply(rule.name(), snapshot, || rule.applier().apply(m, ids))
                .map_err(StrategyError::Rule)?;
            commands.push(cmd);
        }

        let (_, changed) = apply(eg, commands).map_err(StrategyError::Apply)?;
        Ok(changed)
    }
}

/// Runs an inner [`Strategy`] round after round until it reports no change,
/// or `max_rounds` is reached.
pub struct RepeatUntilStable<S> {
    inner: S,
    max_rounds: usize,
}

impl<S> RepeatUntilStable<S> {
    #[must_use]
    pub fn new(inner: S, max_rounds: usize) -> Self { Self { inner, max_rounds } }

    #[must_use]
    pub fn into_inner(self) -> S { self.inner }
}

impl<S: fmt::Debug> fmt::Debug for RepeatUntilStable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatUntilStable")
            .field("inner", &self.inner)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

impl<S> RepeatUntilStable<S> {
    /// Runs rounds until a fixpoint or the round limit, returning how many
    /// rounds actually ran.
    ///
    /// # Errors
    /// Propagates the first error a round raises.
    pub fn run<N, C>(&mut self, eg: &mut HashConsEGraph<N, C>) -> Result<usize, StrategyError<N, C>>
    where S: Strategy<N, C> {
        let mut rounds = 0;
        while rounds < self.max_rounds {
            rounds += 1;
            if !self.inner.step(eg)? {
                break;
            }
        }
        Ok(rounds)
    }
}

/// Searches every rule like [`MaximalRuleApplication`], but remembers which
/// matches it has already turned into a command so that a rule with nothing
/// new to say doesn't pay to re-apply what it already applied.
///
/// The cache is kept per rule name. After each round's unions, a rule's
/// previously-applied matches are ported (re-canonicalized, via
/// [`PatternMatch::port`]) against the now-current graph before they're
/// compared to what a fresh search finds -- a match found again under its
/// ported form is dropped before it ever reaches an applier.
pub struct Caching<N, C, P> {
    rules: Vec<Rule<N, C>>,
    parallel: P,
    priorities: Box<dyn MatchPriorities<N, C>>,
    ids: Free<u64>,
    applied: std::collections::HashMap<String, std::collections::BTreeSet<PatternMatch<N, C>>>,
}

impl<N: fmt::Debug, C: fmt::Debug, P: fmt::Debug> fmt::Debug for Caching<N, C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caching")
            .field("rules", &self.rules)
            .field("parallel", &self.parallel)
            .field("priorities", &self.priorities)
            .finish_non_exhaustive()
    }
}

impl<N: fmt::Debug + Send + Sync + 'static, C: fmt::Debug + Send + Sync + 'static, P> Caching<N, C, P> {
    #[must_use]
    pub fn new(rules: Vec<Rule<N, C>>, parallel: P) -> Self {
        Self {
            rules,
            parallel,
            priorities: Box::new(AllMatches),
            ids: Free::from(0u64),
            applied: std::collections::HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_priorities(mut self, priorities: impl MatchPriorities<N, C> + 'static) -> Self {
        self.priorities = Box::new(priorities);
        self
    }
}

impl<N, C, P> Caching<N, C, P> {
    #[must_use]
    pub fn rules(&self) -> &[Rule<N, C>] { &self.rules }
}

impl<N, C, P> Strategy<N, C> for Caching<N, C, P>
where
    N: Ord + Clone + fmt::Debug + Send + Sync,
    C: Copy + Ord + Send + Sync,
    P: ParallelMap,
{
    fn step(&mut self, eg: &mut HashConsEGraph<N, C>) -> Result<bool, StrategyError<N, C>> {
        let _span = debug_span!("saturation_round_cached").entered();

        for cache in self.applied.values_mut() {
            let mut ported = std::collections::BTreeSet::new();
            for m in cache.iter() {
                ported.insert(m.port(eg).map_err(StrategyError::Stale)?);
            }
            *cache = ported;
        }

        let snapshot: &HashConsEGraph<N, C> = eg;
        let rules = &self.rules;
        let indices: Vec<usize> = (0..rules.len()).collect();
        let searched: Vec<(usize, Vec<PatternMatch<N, C>>)> =
            self.parallel.map_collect(indices, |i| (i, rules[i].searcher().search(snapshot)));

        let applied = &self.applied;
        let searched: Vec<(usize, Vec<PatternMatch<N, C>>)> = searched
            .into_iter()
            .map(|(i, matches)| {
                let already = applied.get(rules[i].name());
                let fresh = matches
                    .into_iter()
                    .filter(|m| already.map_or(true, |a| !a.contains(m)))
                    .collect();
                (i, fresh)
            })
            .collect();

        let prioritized = self.priorities.prioritize(searched);
        debug!(matches = prioritized.len(), "cached round gathered matches");
        if prioritized.is_empty() {
            return Ok(false);
        }

        let mut commands = Vec::with_capacity(prioritized.len());
        for (i, m) in &prioritized {
            let rule = &self.rules[*i];
            let ids = &mut self.ids;
            let cmd = catch_apply(rule.name(), snapshot, || rule.applier().apply(m, ids))
                .map_err(StrategyError::Rule)?;
            commands.push(cmd);
        }

        for (i, m) in prioritized {
            self.applied.entry(self.rules[i].name().to_owned()).or_default().insert(m);
        }

        let (_, changed) = apply(eg, commands).map_err(StrategyError::Apply)?;
        Ok(changed)
    }
}

/// Each round, samples a weighted random subset of the matches found across
/// all rules rather than applying everything, trading completeness for a
/// bounded per-round cost on graphs where matches vastly outnumber what a
/// round can afford to apply.
pub struct Stochastic<N, C, P, M> {
    rules: Vec<Rule<N, C>>,
    parallel: P,
    weight: M,
    batch_size: usize,
    rng: Mutex<StdRng>,
    ids: Free<u64>,
}

impl<N: fmt::Debug, C: fmt::Debug, P: fmt::Debug, M> fmt::Debug for Stochastic<N, C, P, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stochastic")
            .field("rules", &self.rules)
            .field("parallel", &self.parallel)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl<N, C, P, M> Stochastic<N, C, P, M> {
    #[must_use]
    pub fn new(rules: Vec<Rule<N, C>>, parallel: P, weight: M, batch_size: usize, seed: u64) -> Self {
        Self {
            rules,
            parallel,
            weight,
            batch_size: batch_size.max(1),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ids: Free::from(0u64),
        }
    }
}

impl<N, C, P, M> Strategy<N, C> for Stochastic<N, C, P, M>
where
    N: Ord + Clone + fmt::Debug + Send + Sync,
    C: Copy + Ord + Send + Sync,
    P: ParallelMap,
    M: Fn(&PatternMatch<N, C>) -> f64 + Send + Sync,
{
    fn step(&mut self, eg: &mut HashConsEGraph<N, C>) -> Result<bool, StrategyError<N, C>> {
        let snapshot: &HashConsEGraph<N, C> = eg;
        let rules = &self.rules;
        let indices: Vec<usize> = (0..rules.len()).collect();
        let searched: Vec<(usize, Vec<PatternMatch<N, C>>)> =
            self.parallel.map_collect(indices, |i| (i, rules[i].searcher().search(snapshot)));

        let mut pool: Vec<(usize, PatternMatch<N, C>)> = Vec::new();
        for (i, matches) in searched {
            pool.extend(matches.into_iter().map(move |m| (i, m)));
        }
        if pool.is_empty() {
            return Ok(false);
        }

        let weights: Vec<f64> = pool.iter().map(|(_, m)| (self.weight)(m)).collect();
        let sample_size = self.batch_size.min(pool.len());
        let chosen = {
            let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            sample_weighted(&mut *rng, pool.len(), |idx| weights[idx], sample_size)
                .map_err(StrategyError::Sampling)?
        };

        let mut commands = Vec::with_capacity(sample_size);
        for idx in chosen {
            let (rule_idx, m) = &pool[idx];
            let rule = &self.rules[*rule_idx];
            let ids = &mut self.ids;
            let cmd = catch_apply(rule.name(), snapshot, || rule.applier().apply(m, ids))
                .map_err(StrategyError::Rule)?;
            commands.push(cmd);
        }

        let (_, changed) = apply(eg, commands).map_err(StrategyError::Apply)?;
        Ok(changed)
    }
}

/// A round's rule application or batch commit failed.
pub enum StrategyError<N, C> {
    Rule(RuleError<N, C>),
    Apply(ApplyError),
    Sampling(WeightedError),
    /// A [`Caching`] strategy's cached match named a class that no longer
    /// exists while porting the cache forward.
    Stale(crate::union_find::NoNode),
}

impl<N, C> fmt::Debug for StrategyError<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(e) => f.debug_tuple("Rule").field(e).finish(),
            Self::Apply(e) => f.debug_tuple("Apply").field(e).finish(),
            Self::Sampling(e) => f.debug_tuple("Sampling").field(e).finish(),
            Self::Stale(e) => f.debug_tuple("Stale").field(e).finish(),
        }
    }
}

impl<N, C> fmt::Display for StrategyError<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(e) => write!(f, "{e}"),
            Self::Apply(e) => write!(f, "{e}"),
            Self::Sampling(e) => write!(f, "{e}"),
            Self::Stale(e) => write!(f, "cached match references a dead class: {e}"),
        }
    }
}

impl<N, C> std::error::Error for StrategyError<N, C> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rule(e) => Some(e),
            Self::Apply(e) => Some(e),
            Self::Sampling(e) => Some(e),
            Self::Stale(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{MaximalRuleApplication, RepeatUntilStable, Strategy};
    use crate::{
        egraph::HashConsEGraph,
        parallel::Sequential,
        pattern::PatternVarSource,
        rule::Rule,
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
    fn commutativity_round_reaches_fixpoint_in_one_step() {
        let mut eg = HashConsEGraph::<Op, ()>::new();
        let one = leaf(1).insert(&mut eg).unwrap();
        let two = leaf(2).insert(&mut eg).unwrap();
        MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(one), MixedTree::Atom(two)]),
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

        let strategy = MaximalRuleApplication::new(vec![rule], Sequential);
        let mut repeated = RepeatUntilStable::new(strategy, 10);
        let rounds = repeated.run(&mut eg).unwrap();

        assert!(rounds >= 1);
        assert!(!repeated.into_inner().rules()[0].searcher().search(&eg).is_empty());
    }
}
