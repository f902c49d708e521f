//! Deferred, batchable edits to a [`crate::egraph::HashConsEGraph`].
//!
//! Rule appliers don't mutate the e-graph directly; they emit [`Command`]s
//! naming classes symbolically (a node just produced by another command in
//! the same batch may not exist yet), and a single [`apply`] call realizes
//! the whole batch under one [`crate::egraph::HashConsEGraph::write`] guard,
//! so a saturation round pays for exactly one congruence-closure pass no
//! matter how many rules fired.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    egraph::{EClassCall, ENode, HashConsEGraph, MergeError},
    slot_map::SlotMap,
    union_find::ClassId,
};

/// A reference to an e-class that is either already realized in the graph,
/// or stands for the result of another command in the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EClassSymbol<C> {
    Real(ClassId<C>),
    Virtual(u64),
}

impl<C> EClassSymbol<C> {
    #[must_use]
    pub const fn virtual_id(id: u64) -> Self { Self::Virtual(id) }
}

/// A call to a (possibly virtual) class, carrying the slot renaming the way
/// [`EClassCall`] does for realized classes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolCall<C>(EClassSymbol<C>, SlotMap);

impl<C> SymbolCall<C> {
    #[must_use]
    pub fn new(symbol: EClassSymbol<C>, args: SlotMap) -> Self { Self(symbol, args) }

    #[must_use]
    pub fn real(call: &EClassCall<C>) -> Self
    where C: Copy {
        Self(EClassSymbol::Real(call.class()), call.args().clone())
    }

    /// The symbol this call targets.
    #[must_use]
    pub fn symbol(&self) -> EClassSymbol<C>
    where C: Copy {
        self.0
    }

    /// The renaming from the symbol's own exposed slots into the caller's
    /// context.
    #[must_use]
    pub fn args(&self) -> &SlotMap { &self.1 }
}

/// A node description to be added under [`Command::AddMany`], whose
/// arguments may name virtual symbols.
pub struct CommandNode<N, C> {
    pub op: N,
    pub definitions: Vec<crate::slot::Slot>,
    pub uses: Vec<crate::slot::Slot>,
    pub args: Vec<SymbolCall<C>>,
}

/// A batched graph edit.
pub enum Command<N, C> {
    /// Add each named node, binding its result to the paired symbol.
    AddMany(Vec<(EClassSymbol<C>, CommandNode<N, C>)>),
    /// Union each pair of (possibly virtual) calls.
    UnionMany(Vec<(SymbolCall<C>, SymbolCall<C>)>),
    /// A sub-batch, flattened in order during optimization.
    Queue(Vec<Command<N, C>>),
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("command referenced an undefined virtual class {0}")]
    UndefinedVirtual(u64),
    #[error(transparent)]
    NoNode(#[from] crate::union_find::NoNode),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// The virtual ids an `AddMany` entry's symbol binds (a command's
/// `definitions`, in the `definitions -> uses` dependency edge `optimize`
/// orders commands by). Only `AddMany` ever defines a virtual.
fn definitions<N, C>(cmd: &Command<N, C>) -> Vec<u64> {
    match cmd {
        Command::AddMany(adds) => adds
            .iter()
            .filter_map(|(symbol, _)| match symbol {
                EClassSymbol::Virtual(id) => Some(*id),
                EClassSymbol::Real(_) => None,
            })
            .collect(),
        Command::UnionMany(_) | Command::Queue(_) => Vec::new(),
    }
}

/// The virtual ids a command reads: an `AddMany`'s node arguments, or
/// either side of a `UnionMany` pair.
fn uses<N, C>(cmd: &Command<N, C>) -> Vec<u64> {
    fn virtual_of<C>(symbol: &EClassSymbol<C>) -> Option<u64> {
        match symbol {
            EClassSymbol::Virtual(id) => Some(*id),
            EClassSymbol::Real(_) => None,
        }
    }

    match cmd {
        Command::AddMany(adds) => adds
            .iter()
            .flat_map(|(_, node)| node.args.iter().filter_map(|call| virtual_of(&call.0)))
            .collect(),
        Command::UnionMany(pairs) => pairs
            .iter()
            .flat_map(|(a, b)| [virtual_of(&a.0), virtual_of(&b.0)])
            .flatten()
            .collect(),
        Command::Queue(_) => Vec::new(),
    }
}

/// Flattens nested [`Command::Queue`]s, then topologically orders the
/// result along the `definitions -> uses` dependency edge (a command that
/// reads a virtual must come after the command that defines it) and groups
/// the order into maximal independent batches: every command in a batch
/// depends only on commands from an earlier batch, so a batch pays for one
/// hash-cons pass per kind rather than one per originating rule.
///
/// Within each batch the `AddMany`s are merged into one and emitted before
/// the `UnionMany`s are merged into one, so a union may still reference a
/// virtual its own batch's adds just bound. An `AddMany` that (transitively,
/// through other `AddMany`s) depends on another `AddMany`'s virtual always
/// lands in a strictly later batch.
pub fn optimize<N, C>(commands: Vec<Command<N, C>>) -> Vec<Command<N, C>> {
    fn flatten<N, C>(cmd: Command<N, C>, out: &mut Vec<Command<N, C>>) {
        match cmd {
            Command::Queue(cmds) => {
                for c in cmds {
                    flatten(c, out);
                }
            },
            other => out.push(other),
        }
    }

    let mut flat = Vec::new();
    for cmd in commands {
        flatten(cmd, &mut flat);
    }

    // Every virtual is bound by exactly one `AddMany` entry in the batch;
    // record which flattened command introduces each one so a dependent
    // command can be placed in a later batch.
    let mut definer: HashMap<u64, usize> = HashMap::new();
    for (i, cmd) in flat.iter().enumerate() {
        for id in definitions(cmd) {
            definer.insert(id, i);
        }
    }

    let deps: Vec<Vec<usize>> = flat
        .iter()
        .map(|cmd| {
            uses(cmd)
                .into_iter()
                .filter_map(|id| definer.get(&id).copied())
                .collect()
        })
        .collect();

    // `layer[i]` is one past the latest layer of anything `i` depends on
    // (or 0 if it depends on nothing defined in this batch). A DAG's
    // longest path has fewer than `flat.len()` edges, so that many passes
    // always reach the fixpoint.
    let mut layer = vec![0usize; flat.len()];
    for _ in 0..flat.len() {
        let mut changed = false;
        for (i, ds) in deps.iter().enumerate() {
            let want = ds.iter().map(|&d| layer[d] + 1).max().unwrap_or(0);
            if want > layer[i] {
                layer[i] = want;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let num_layers = layer.iter().copied().max().map_or(0, |m| m + 1);
    let mut adds_by_layer: Vec<Vec<(EClassSymbol<C>, CommandNode<N, C>)>> =
        (0..num_layers).map(|_| Vec::new()).collect();
    let mut unions_by_layer: Vec<Vec<(SymbolCall<C>, SymbolCall<C>)>> =
        (0..num_layers).map(|_| Vec::new()).collect();

    for (cmd, l) in flat.into_iter().zip(layer) {
        match cmd {
            Command::AddMany(adds) => adds_by_layer[l].extend(adds),
            Command::UnionMany(pairs) => unions_by_layer[l].extend(pairs),
            Command::Queue(_) => unreachable!("flatten leaves no Queue commands"),
        }
    }

    let mut merged = Vec::new();
    for (adds, unions) in adds_by_layer.into_iter().zip(unions_by_layer) {
        if !adds.is_empty() {
            merged.push(Command::AddMany(adds));
        }
        if !unions.is_empty() {
            merged.push(Command::UnionMany(unions));
        }
    }
    merged
}

fn try_resolve<C: Copy>(
    call: &SymbolCall<C>,
    reification: &HashMap<u64, EClassCall<C>>,
) -> Option<EClassCall<C>> {
    match &call.0 {
        EClassSymbol::Real(class) => Some(EClassCall::new(*class, call.1.clone())),
        EClassSymbol::Virtual(id) => {
            let resolved = reification.get(id)?;
            Some(EClassCall::new(resolved.class(), call.1.compose_partial(resolved.args())))
        },
    }
}

impl<N: Ord + Clone, C: Copy> Command<N, C> {
    /// Simplifies a command against the current graph and a partial virtual
    /// binding, folding away edits the graph (or an earlier command in the
    /// same batch) has already made redundant.
    ///
    /// An `AddMany` entry whose node is fully reifiable (every argument
    /// resolves to a real class, through `reification` or a binding
    /// discovered earlier in this same call) and whose resulting shape is
    /// already hash-consed collapses into a reification binding with no
    /// edit. A `UnionMany` pair whose two sides are both `Real` and already
    /// in the same class is dropped, and the whole command becomes empty if
    /// every pair vanishes. A `Queue` simplifies its children in order,
    /// threading the growing reification from one child to the next.
    ///
    /// # Errors
    /// Propagates [`crate::union_find::NoNode`] if `reification` or the
    /// command names a class the graph no longer has.
    pub fn simplify(
        self,
        eg: &HashConsEGraph<N, C>,
        reification: &HashMap<u64, EClassCall<C>>,
    ) -> Result<(Self, HashMap<u64, EClassCall<C>>), crate::union_find::NoNode> {
        match self {
            Command::AddMany(adds) => {
                let mut kept = Vec::with_capacity(adds.len());
                let mut extra: HashMap<u64, EClassCall<C>> = HashMap::new();

                for (symbol, node) in adds {
                    let resolved: Option<Vec<EClassCall<C>>> = node
                        .args
                        .iter()
                        .map(|call| {
                            try_resolve(call, reification).or_else(|| try_resolve(call, &extra))
                        })
                        .collect();

                    if let Some(args) = resolved {
                        let probe = ENode::new(
                            std::sync::Arc::new(node.op.clone()),
                            node.definitions.clone().into(),
                            node.uses.clone().into(),
                            args.into(),
                        );

                        if let Some(existing) = eg.lookup(&probe)? {
                            if let EClassSymbol::Virtual(id) = symbol {
                                extra.insert(id, existing);
                            }
                            continue;
                        }
                    }

                    kept.push((symbol, node));
                }

                Ok((Command::AddMany(kept), extra))
            },
            Command::UnionMany(pairs) => {
                let mut kept = Vec::with_capacity(pairs.len());
                for (a, b) in pairs {
                    if let (EClassSymbol::Real(ca), EClassSymbol::Real(cb)) = (&a.0, &b.0) {
                        let ca = EClassCall::new(*ca, a.1.clone());
                        let cb = EClassCall::new(*cb, b.1.clone());
                        if eg.are_same(&ca, &cb)? {
                            continue;
                        }
                    }
                    kept.push((a, b));
                }
                Ok((Command::UnionMany(kept), HashMap::new()))
            },
            Command::Queue(cmds) => {
                let mut kept = Vec::with_capacity(cmds.len());
                let mut total = reification.clone();
                for cmd in cmds {
                    let (simplified, extra) = cmd.simplify(eg, &total)?;
                    total.extend(extra);
                    if !simplified.is_empty() {
                        kept.push(simplified);
                    }
                }
                total.retain(|id, _| !reification.contains_key(id));
                Ok((Command::Queue(kept), total))
            },
        }
    }

    /// Whether this command has no remaining edit (an empty `AddMany`,
    /// `UnionMany`, or a `Queue` of only such).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Command::AddMany(adds) => adds.is_empty(),
            Command::UnionMany(pairs) => pairs.is_empty(),
            Command::Queue(cmds) => cmds.iter().all(Command::is_empty),
        }
    }
}

/// Resolves and applies a batch of commands to the graph in a single write
/// transaction.
///
/// `AddMany` entries are realized in the order given: a command whose
/// arguments reference a virtual symbol must appear after the command that
/// defines it. `UnionMany` entries are applied after every `AddMany` in the
/// batch, so rules may union freshly-added virtual results.
///
/// Returns the virtual-symbol bindings discovered along the way, plus
/// whether the batch made any observable change to the graph (a new class
/// was created, or a union actually merged two classes) -- a saturation
/// strategy uses this to decide whether a round reached a fixpoint.
///
/// # Errors
/// [`ApplyError::UndefinedVirtual`] if a node or union references a virtual
/// symbol no earlier `AddMany` in the batch defined.
pub fn apply<N: Ord + Clone, C: Copy>(
    graph: &mut HashConsEGraph<N, C>,
    commands: Vec<Command<N, C>>,
) -> Result<(HashMap<u64, EClassCall<C>>, bool), ApplyError> {
    let commands = optimize(commands);
    let mut bindings: HashMap<u64, EClassCall<C>> = HashMap::new();
    let mut changed = false;

    // Fold away edits the graph already makes redundant before committing
    // anything: an `AddMany` that collapses to an existing class still
    // needs its virtual bound, even though no node gets added for it. This
    // only drops or shrinks entries in place, so the commands' relative
    // order (and hence the `definitions -> uses` order `optimize` already
    // established) survives untouched.
    let commands = {
        let mut simplified = Vec::with_capacity(commands.len());
        for cmd in commands {
            let (cmd, extra) = cmd.simplify(graph, &bindings)?;
            bindings.extend(extra);
            if !cmd.is_empty() {
                simplified.push(cmd);
            }
        }
        simplified
    };

    let resolve = |bindings: &HashMap<u64, EClassCall<C>>,
                   call: &SymbolCall<C>|
     -> Result<EClassCall<C>, ApplyError> {
        let SymbolCall(symbol, args) = call;
        let base = match symbol {
            EClassSymbol::Real(class) => EClassCall::new(*class, args.clone()),
            EClassSymbol::Virtual(id) => {
                let resolved = bindings
                    .get(id)
                    .ok_or(ApplyError::UndefinedVirtual(*id))?;
                EClassCall::new(resolved.class(), args.compose_partial(resolved.args()))
            },
        };
        Ok(base)
    };

    for cmd in &commands {
        if let Command::AddMany(adds) = cmd {
            for (symbol, node) in adds {
                let mut args = Vec::with_capacity(node.args.len());
                for call in &node.args {
                    args.push(resolve(&bindings, call)?);
                }

                let en = ENode::new(
                    std::sync::Arc::new(clone_op(&node.op)),
                    node.definitions.clone().into(),
                    node.uses.clone().into(),
                    args.into(),
                );
                let before = graph.classes().count();
                let result = graph.add(en)?;
                changed |= graph.classes().count() != before;

                if let EClassSymbol::Virtual(id) = symbol {
                    bindings.insert(*id, result);
                }
            }
        }
    }

    {
        let mut w = graph.write();
        for cmd in &commands {
            if let Command::UnionMany(pairs) = cmd {
                for (a, b) in pairs {
                    let a = resolve(&bindings, a)?;
                    let b = resolve(&bindings, b)?;
                    let unioned = w.union(&a, &b)?;
                    changed |= unioned.did_merge();
                }
            }
        }
    }

    fn clone_op<N: Clone>(op: &N) -> N { op.clone() }

    Ok((bindings, changed))
}
