//! The compiled pattern-matching virtual machine ("e-matching").
//!
//! A [`Pattern`] is a [`MixedTree`] whose atoms are [`PatternVar`]s. [`compile`]
//! lowers one into a flat [`Instr`] list via a canonical left-first traversal,
//! the same shape as the teacher's DFA/NFA compilation passes in
//! `re::nfa_builder` -- a tree walked once into a linear program that a small
//! machine then runs against live data, rather than re-walking the tree for
//! every candidate. Execution is a depth-first expansion over that
//! instruction stream, implemented with an explicit work stack (never
//! recursion) per the same "deep stack in traversals" concern [`crate::tree`]
//! already works around.

use std::{collections::BTreeMap, fmt};

use thiserror::Error;

use crate::{
    egraph::{EClassCall, HashConsEGraph},
    free::Free,
    slot::Slot,
    slot_map::SlotMap,
    tree::MixedTree,
    union_find::NoNode,
};

/// A fresh identity for a pattern-tree leaf, distinct from [`Slot`] (a
/// pattern variable stands for a whole matched subtree, a slot for a single
/// bindable parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatternVar(u64);

/// A per-compiler source of fresh [`PatternVar`]s.
#[derive(Debug, Default, Clone)]
pub struct PatternVarSource(Free<u64>);

impl PatternVarSource {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn fresh(&mut self) -> PatternVar { PatternVar(self.0.fresh()) }
}

/// A [`MixedTree`] whose leaves are pattern variables rather than concrete
/// e-class calls.
pub type Pattern<N> = MixedTree<N, PatternVar>;

/// One instruction of a compiled pattern program.
#[derive(Debug, Clone)]
pub enum Instr<N> {
    /// Try every e-node in the class held by `reg` matching `op` and arity
    /// `arg_count` whose `definitions`/`uses` (after projecting through the
    /// node's own renaming) agree with whatever slots are already bound;
    /// allocate one fresh register per argument of a matching node.
    BindNode {
        reg: usize,
        op: N,
        definitions: Vec<Slot>,
        uses: Vec<Slot>,
        arg_count: usize,
    },
    /// First occurrence of a pattern variable: bind it to whatever call is
    /// currently held by `reg`.
    BindVar { reg: usize, var: PatternVar },
    /// A later occurrence of a variable already bound at another register:
    /// require the two registers to name the same value.
    Compare { a: usize, b: usize },
}

/// A pattern lowered to a flat instruction program, plus the number of
/// registers a run of it allocates (register 0 is always the candidate
/// root, pre-seeded by the caller).
#[derive(Debug, Clone)]
pub struct CompiledPattern<N> {
    instrs: Vec<Instr<N>>,
    register_count: usize,
}

impl<N> CompiledPattern<N> {
    #[must_use]
    pub fn instrs(&self) -> &[Instr<N>] { &self.instrs }

    #[must_use]
    pub fn register_count(&self) -> usize { self.register_count }
}

/// Lowers `pattern` to a flat instruction list via a canonical left-first
/// traversal: `BindNode` for each internal node, `BindVar` on a pattern
/// variable's first occurrence, `Compare` against that variable's register
/// every time it recurs.
#[must_use]
pub fn compile<N: Clone>(pattern: &Pattern<N>) -> CompiledPattern<N> {
    let mut instrs = Vec::new();
    let mut first_reg: BTreeMap<PatternVar, usize> = BTreeMap::new();
    let mut next_reg = 1usize;

    let mut stack = vec![(0usize, pattern)];
    while let Some((reg, tree)) = stack.pop() {
        match tree {
            MixedTree::Atom(var) => {
                if let Some(&first) = first_reg.get(var) {
                    instrs.push(Instr::Compare { a: reg, b: first });
                } else {
                    first_reg.insert(*var, reg);
                    instrs.push(Instr::BindVar { reg, var: *var });
                }
            },
            MixedTree::Node(op, defs, uses, args) => {
                let arg_regs: Vec<usize> = (0..args.len())
                    .map(|_| {
                        let r = next_reg;
                        next_reg += 1;
                        r
                    })
                    .collect();

                instrs.push(Instr::BindNode {
                    reg,
                    op: (**op).clone(),
                    definitions: defs.to_vec(),
                    uses: uses.to_vec(),
                    arg_count: args.len(),
                });

                for (&r, arg) in arg_regs.iter().zip(args.iter()).rev() {
                    stack.push((r, arg));
                }
            },
        }
    }

    CompiledPattern {
        instrs,
        register_count: next_reg,
    }
}

/// A successful binding of a pattern against a root e-class call.
pub struct PatternMatch<N, C> {
    root: EClassCall<C>,
    var_mapping: BTreeMap<PatternVar, MixedTree<N, EClassCall<C>>>,
    slot_mapping: BTreeMap<Slot, Slot>,
}

impl<N, C> PatternMatch<N, C> {
    #[must_use]
    pub fn root(&self) -> &EClassCall<C> { &self.root }

    #[must_use]
    pub fn var_mapping(&self) -> &BTreeMap<PatternVar, MixedTree<N, EClassCall<C>>> { &self.var_mapping }

    #[must_use]
    pub fn slot_mapping(&self) -> &BTreeMap<Slot, Slot> { &self.slot_mapping }
}

impl<N: PartialEq + Clone, C> PatternMatch<N, C> {
    /// Unions two matches' bindings, failing if they disagree on a shared
    /// variable or slot. Used by the `product` searcher combinator to merge
    /// matches of two independently-searched pattern fragments.
    ///
    /// The merged match keeps `self`'s root; the two matches being merged
    /// here are always fragments of the same enclosing searcher, which
    /// tracks the authoritative root separately, so which side's root
    /// survives here is immaterial.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Option<Self> {
        use std::collections::btree_map::Entry;

        let mut var_mapping = self.var_mapping.clone();
        for (&k, v) in &other.var_mapping {
            match var_mapping.entry(k) {
                Entry::Occupied(o) => {
                    if o.get() != v {
                        return None;
                    }
                },
                Entry::Vacant(e) => {
                    e.insert(v.clone());
                },
            }
        }

        let mut slot_mapping = self.slot_mapping.clone();
        for (&k, &v) in &other.slot_mapping {
            match slot_mapping.entry(k) {
                Entry::Occupied(o) => {
                    if *o.get() != v {
                        return None;
                    }
                },
                Entry::Vacant(e) => {
                    e.insert(v);
                },
            }
        }

        Some(Self {
            root: self.root.clone(),
            var_mapping,
            slot_mapping,
        })
    }
}

impl<N: Ord + Clone, C> PatternMatch<N, C> {
    /// Re-canonicalizes every bound call against an e-graph that has moved
    /// on since this match was found.
    ///
    /// # Errors
    /// Propagates [`NoNode`] if a bound call now names a dead class.
    pub fn port(&self, eg: &HashConsEGraph<N, C>) -> Result<Self, NoNode> {
        let root = eg.canonicalize(&self.root)?;
        let mut var_mapping = BTreeMap::new();
        for (&var, tree) in &self.var_mapping {
            let ported = tree.try_map_atoms(&mut |call| eg.canonicalize(call))?;
            var_mapping.insert(var, ported);
        }
        Ok(Self {
            root,
            var_mapping,
            slot_mapping: self.slot_mapping.clone(),
        })
    }
}

impl<N: fmt::Debug, C> fmt::Debug for PatternMatch<N, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            root,
            var_mapping,
            slot_mapping,
        } = self;
        f.debug_struct("PatternMatch")
            .field("root", root)
            .field("var_mapping", var_mapping)
            .field("slot_mapping", slot_mapping)
            .finish()
    }
}

impl<N, C> Clone for PatternMatch<N, C> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            var_mapping: self.var_mapping.clone(),
            slot_mapping: self.slot_mapping.clone(),
        }
    }
}

impl<N: PartialEq, C> PartialEq for PatternMatch<N, C> {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.var_mapping == other.var_mapping
            && self.slot_mapping == other.slot_mapping
    }
}

impl<N: Eq, C> Eq for PatternMatch<N, C> {}

impl<N: Ord, C> Ord for PatternMatch<N, C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.root
            .cmp(&other.root)
            .then_with(|| self.var_mapping.cmp(&other.var_mapping))
            .then_with(|| self.slot_mapping.cmp(&other.slot_mapping))
    }
}

impl<N: Ord, C> PartialOrd for PatternMatch<N, C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

/// A compiled-pattern instruction found no matching e-node, or two
/// registers bound to the same variable turned out inequivalent.
///
/// Per the machine's contract these are silent filters on the success
/// path (a state that hits one simply contributes no match); [`try_execute`]
/// surfaces them for callers that want to know why a pattern didn't match.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("instruction {instr}: no e-node in the candidate class matched")]
    NoMatchingNode { instr: usize },
    #[error("instruction {instr}: two registers bound to the same variable were not equivalent")]
    InconsistentVars { instr: usize },
    #[error(transparent)]
    NoNode(#[from] NoNode),
}

struct MachineState<N, C> {
    registers: Vec<EClassCall<C>>,
    bound_vars: BTreeMap<PatternVar, MixedTree<N, EClassCall<C>>>,
    bound_slots: BTreeMap<Slot, Slot>,
}

impl<N, C> MachineState<N, C> {
    fn initial(root: EClassCall<C>) -> Self {
        Self {
            registers: vec![root],
            bound_vars: BTreeMap::new(),
            bound_slots: BTreeMap::new(),
        }
    }

    fn into_match(self) -> PatternMatch<N, C> {
        PatternMatch {
            root: self.registers[0].clone(),
            var_mapping: self.bound_vars,
            slot_mapping: self.bound_slots,
        }
    }
}

impl<N, C> Clone for MachineState<N, C> {
    fn clone(&self) -> Self {
        Self {
            registers: self.registers.clone(),
            bound_vars: self.bound_vars.clone(),
            bound_slots: self.bound_slots.clone(),
        }
    }
}

/// Binds `pattern_slots` against `actual_slots` (already projected into the
/// caller's context) in occurrence order, requiring agreement with whatever
/// is already in `bound`. Returns `false` on a length or identity mismatch.
fn bind_slots(bound: &mut BTreeMap<Slot, Slot>, pattern_slots: &[Slot], actual_slots: &[Slot]) -> bool {
    if pattern_slots.len() != actual_slots.len() {
        return false;
    }
    for (&p, &a) in pattern_slots.iter().zip(actual_slots) {
        match bound.get(&p) {
            Some(&bound_to) if bound_to != a => return false,
            Some(_) => {},
            None => {
                bound.insert(p, a);
            },
        }
    }
    true
}

/// Runs a compiled pattern against a seeded root, returning every match
/// found and every instruction-level failure encountered along the way (the
/// latter empty on the common path; see [`MatchError`]).
pub fn try_execute<N: Ord + Clone, C>(
    compiled: &CompiledPattern<N>,
    eg: &HashConsEGraph<N, C>,
    root: EClassCall<C>,
) -> Result<(Vec<PatternMatch<N, C>>, Vec<MatchError>), NoNode> {
    let instrs = compiled.instrs();
    let mut stack = vec![(0usize, MachineState::initial(root))];
    let mut matches = Vec::new();
    let mut errors = Vec::new();

    while let Some((pc, state)) = stack.pop() {
        if pc == instrs.len() {
            matches.push(state.into_match());
            continue;
        }

        match &instrs[pc] {
            Instr::BindNode {
                reg,
                op,
                definitions,
                uses,
                arg_count,
            } => {
                let call = state.registers[*reg].clone();
                let candidates = eg.nodes(&call)?;
                let mut any = false;

                for (node, slot_map) in candidates {
                    if node.op() != op || node.args().len() != *arg_count {
                        continue;
                    }

                    let actual_defs: Vec<Slot> =
                        node.definitions().iter().map(|&s| slot_map.get(s).unwrap_or(s)).collect();
                    let actual_uses: Vec<Slot> =
                        node.uses().iter().map(|&s| slot_map.get(s).unwrap_or(s)).collect();

                    let mut next_slots = state.bound_slots.clone();
                    if !bind_slots(&mut next_slots, definitions, &actual_defs)
                        || !bind_slots(&mut next_slots, uses, &actual_uses)
                    {
                        continue;
                    }

                    any = true;
                    let mut next = MachineState {
                        registers: state.registers.clone(),
                        bound_vars: state.bound_vars.clone(),
                        bound_slots: next_slots,
                    };
                    next.registers
                        .extend(node.args().iter().map(|arg| arg.rename(&slot_map)));
                    stack.push((pc + 1, next));
                }

                if !any {
                    errors.push(MatchError::NoMatchingNode { instr: pc });
                }
            },
            Instr::BindVar { reg, var } => {
                let mut next = state.clone();
                next.bound_vars
                    .insert(*var, MixedTree::Atom(next.registers[*reg].clone()));
                stack.push((pc + 1, next));
            },
            Instr::Compare { a, b } => {
                if eg.are_same(&state.registers[*a], &state.registers[*b])? {
                    stack.push((pc + 1, state));
                } else {
                    errors.push(MatchError::InconsistentVars { instr: pc });
                }
            },
        }
    }

    Ok((matches, errors))
}

/// Like [`try_execute`], but drops the failure log (the common case: rule
/// search only wants the matches that succeeded).
///
/// # Errors
/// Propagates [`NoNode`] if `root` names an unknown class.
pub fn execute<N: Ord + Clone, C>(
    compiled: &CompiledPattern<N>,
    eg: &HashConsEGraph<N, C>,
    root: EClassCall<C>,
) -> Result<Vec<PatternMatch<N, C>>, NoNode> {
    try_execute(compiled, eg, root).map(|(matches, _)| matches)
}

/// Runs a compiled pattern over every class of an e-graph, producing a
/// flat, de-duplicated sequence of matches.
#[derive(Debug, Clone)]
pub struct MachineSearcherPhase<N> {
    compiled: CompiledPattern<N>,
}

impl<N: Ord + Clone> MachineSearcherPhase<N> {
    #[must_use]
    pub fn new(pattern: &Pattern<N>) -> Self {
        Self {
            compiled: compile(pattern),
        }
    }

    #[must_use]
    pub fn compiled(&self) -> &CompiledPattern<N> { &self.compiled }

    /// Searches every live class as a candidate root.
    ///
    /// # Panics
    /// Panics if the e-graph reports a class from [`HashConsEGraph::classes`]
    /// that [`HashConsEGraph::nodes`] then rejects as unknown -- a
    /// consistency violation in the e-graph itself, not a caller error.
    pub fn search<C>(&self, eg: &HashConsEGraph<N, C>) -> Vec<PatternMatch<N, C>> {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();

        for class in eg.classes() {
            let slots = eg.slots(class).cloned().unwrap_or_default();
            let root = EClassCall::new(class, SlotMap::identity(&slots));
            let found = execute(&self.compiled, eg, root).expect("live class must canonicalize");
            for m in found {
                if seen.insert(m.clone()) {
                    out.push(m);
                }
            }
        }

        out
    }
}

/// A searcher that also exposes the pattern it compiled from, so a rule's
/// right-hand side can be recompiled and run as the searcher of that rule's
/// reverse.
#[derive(Debug, Clone)]
pub struct ReversibleSearcher<N> {
    pattern: Pattern<N>,
    phase: MachineSearcherPhase<N>,
}

impl<N: Ord + Clone> ReversibleSearcher<N> {
    #[must_use]
    pub fn new(pattern: Pattern<N>) -> Self {
        let phase = MachineSearcherPhase::new(&pattern);
        Self { pattern, phase }
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern<N> { &self.pattern }

    pub fn search<C>(&self, eg: &HashConsEGraph<N, C>) -> Vec<PatternMatch<N, C>> {
        self.phase.search(eg)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{compile, execute, MachineSearcherPhase, Pattern, PatternVarSource};
    use crate::{
        egraph::HashConsEGraph,
        tree::MixedTree,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Op {
        Add,
        Leaf(u32),
    }

    #[derive(Debug)]
    struct Expr;

    fn leaf(n: u32) -> MixedTree<Op, crate::egraph::EClassCall<Expr>> {
        MixedTree::node(Op::Leaf(n), Arc::from([]), Arc::from([]), Arc::from([]))
    }

    #[test]
    fn matches_ground_add_node() {
        let mut eg = HashConsEGraph::<Op, Expr>::new();
        let one = leaf(1).insert(&mut eg).unwrap();
        let two = leaf(2).insert(&mut eg).unwrap();
        let sum = MixedTree::node(
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
        let pattern: Pattern<Op> = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(x), MixedTree::Atom(y)]),
        );

        let compiled = compile(&pattern);
        let matches = execute(&compiled, &eg, sum).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn reused_variable_requires_equal_args() {
        let mut eg = HashConsEGraph::<Op, Expr>::new();
        let one = leaf(1).insert(&mut eg).unwrap();
        let two = leaf(2).insert(&mut eg).unwrap();

        let same = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(one.clone()), MixedTree::Atom(one.clone())]),
        )
        .insert(&mut eg)
        .unwrap();
        let different = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(one), MixedTree::Atom(two)]),
        )
        .insert(&mut eg)
        .unwrap();

        let mut vars = PatternVarSource::new();
        let x = vars.fresh();
        let pattern: Pattern<Op> = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([MixedTree::Atom(x), MixedTree::Atom(x)]),
        );
        let phase = MachineSearcherPhase::new(&pattern);

        assert_eq!(phase.search(&eg).into_iter().filter(|m| m.root() == &same).count(), 1);
        assert_eq!(
            phase
                .search(&eg)
                .into_iter()
                .filter(|m| m.root() == &different)
                .count(),
            0
        );
    }
}
