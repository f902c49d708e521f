//! The generic tree shape shared by pattern bodies and inserted expressions.
//!
//! Mirrors [`crate::egraph::ENode`]'s `(op, definitions, uses, args)` shape
//! one level up, before any of it has been hash-consed: a [`MixedTree`] is
//! either such a node or a leaf atom, where the atom type is the only thing
//! that differs between a pattern (`A = PatternVar`) and a concrete tree
//! ready to insert (`A = EClassCall`). Traversals are written with an
//! explicit work stack rather than recursion, since pattern and extraction
//! trees can run deep enough to blow a call stack on hostile input.

use std::{fmt, hash::Hash, sync::Arc};

use crate::{
    egraph::{EClassCall, ENode, HashConsEGraph},
    slot::Slot,
    union_find::NoNode,
};

/// Either an operator node applying to child trees, or a leaf atom.
pub enum MixedTree<N, A> {
    Node(Arc<N>, Arc<[Slot]>, Arc<[Slot]>, Arc<[MixedTree<N, A>]>),
    Atom(A),
}

impl<N, A> MixedTree<N, A> {
    pub fn node(op: N, definitions: Arc<[Slot]>, uses: Arc<[Slot]>, args: Arc<[Self]>) -> Self {
        Self::Node(Arc::new(op), definitions, uses, args)
    }

    #[must_use]
    pub const fn atom(atom: A) -> Self { Self::Atom(atom) }

    #[must_use]
    pub const fn is_atom(&self) -> bool { matches!(self, Self::Atom(_)) }

    #[must_use]
    pub const fn as_atom(&self) -> Option<&A> {
        match self {
            Self::Atom(a) => Some(a),
            Self::Node(..) => None,
        }
    }

    /// Every atom reachable from this tree, left to right.
    #[must_use]
    pub fn atoms(&self) -> Vec<&A> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            match tree {
                Self::Atom(a) => out.push(a),
                Self::Node(_, _, _, args) => stack.extend(args.iter().rev()),
            }
        }
        out
    }
}

impl<N, A: Clone> MixedTree<N, A> {
    /// Rebuilds this tree with every atom replaced by the (possibly
    /// failing) result of `f`.
    ///
    /// # Errors
    /// Propagates the first error `f` returns, in left-to-right atom order.
    pub fn try_map_atoms<B, E>(
        &self,
        f: &mut impl FnMut(&A) -> Result<B, E>,
    ) -> Result<MixedTree<N, B>, E> {
        enum Frame<'a, N, A> {
            Visit(&'a MixedTree<N, A>),
            Build(Arc<N>, Arc<[Slot]>, Arc<[Slot]>, usize),
        }

        let mut work = vec![Frame::Visit(self)];
        let mut results: Vec<MixedTree<N, B>> = Vec::new();

        while let Some(frame) = work.pop() {
            match frame {
                Frame::Visit(MixedTree::Atom(a)) => results.push(MixedTree::Atom(f(a)?)),
                Frame::Visit(MixedTree::Node(op, defs, uses, args)) => {
                    work.push(Frame::Build(
                        Arc::clone(op),
                        Arc::clone(defs),
                        Arc::clone(uses),
                        args.len(),
                    ));
                    work.extend(args.iter().map(Frame::Visit).rev());
                },
                Frame::Build(op, defs, uses, n) => {
                    let split = results.len() - n;
                    let args: Arc<[MixedTree<N, B>]> = results.split_off(split).into();
                    results.push(MixedTree::Node(op, defs, uses, args));
                },
            }
        }

        Ok(results
            .pop()
            .expect("postorder traversal must leave exactly one result"))
    }
}

impl<N: Ord + Clone, C> MixedTree<N, EClassCall<C>> {
    /// Inserts this tree into an e-graph bottom-up, hash-consing each node
    /// as its children's class calls become available.
    ///
    /// # Errors
    /// Propagates [`NoNode`] if any atom names a class this graph doesn't
    /// know about.
    pub fn insert(&self, eg: &mut HashConsEGraph<N, C>) -> Result<EClassCall<C>, NoNode> {
        enum Frame<'a, N, C> {
            Visit(&'a MixedTree<N, EClassCall<C>>),
            Build(Arc<N>, Arc<[Slot]>, Arc<[Slot]>, usize),
        }

        let mut work = vec![Frame::Visit(self)];
        let mut results: Vec<EClassCall<C>> = Vec::new();

        while let Some(frame) = work.pop() {
            match frame {
                Frame::Visit(MixedTree::Atom(call)) => results.push(call.clone()),
                Frame::Visit(MixedTree::Node(op, defs, uses, args)) => {
                    work.push(Frame::Build(
                        Arc::clone(op),
                        Arc::clone(defs),
                        Arc::clone(uses),
                        args.len(),
                    ));
                    work.extend(args.iter().map(Frame::Visit).rev());
                },
                Frame::Build(op, defs, uses, n) => {
                    let split = results.len() - n;
                    let args: Arc<[EClassCall<C>]> = results.split_off(split).into();
                    let node = ENode::new(op, defs, uses, args);
                    results.push(eg.add(node)?);
                },
            }
        }

        Ok(results
            .pop()
            .expect("postorder traversal must leave exactly one result"))
    }
}

impl<N: fmt::Debug, A: fmt::Debug> fmt::Debug for MixedTree<N, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(op, defs, uses, args) => f
                .debug_struct("Node")
                .field("op", op)
                .field("definitions", defs)
                .field("uses", uses)
                .field("args", args)
                .finish(),
            Self::Atom(a) => f.debug_tuple("Atom").field(a).finish(),
        }
    }
}

impl<N, A: Clone> Clone for MixedTree<N, A> {
    fn clone(&self) -> Self {
        match self {
            Self::Node(op, defs, uses, args) => {
                Self::Node(Arc::clone(op), Arc::clone(defs), Arc::clone(uses), Arc::clone(args))
            },
            Self::Atom(a) => Self::Atom(a.clone()),
        }
    }
}

impl<N: PartialEq, A: PartialEq> PartialEq for MixedTree<N, A> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Node(lo, ld, lu, la), Self::Node(ro, rd, ru, ra)) => {
                lo == ro && ld == rd && lu == ru && la == ra
            },
            (Self::Atom(l), Self::Atom(r)) => l == r,
            _ => false,
        }
    }
}

impl<N: Eq, A: Eq> Eq for MixedTree<N, A> {}

impl<N: Ord, A: Ord> Ord for MixedTree<N, A> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        match (self, other) {
            (Self::Node(lo, ld, lu, la), Self::Node(ro, rd, ru, ra)) => lo
                .cmp(ro)
                .then_with(|| ld.cmp(rd))
                .then_with(|| lu.cmp(ru))
                .then_with(|| la.cmp(ra)),
            (Self::Atom(l), Self::Atom(r)) => l.cmp(r),
            (Self::Node(..), Self::Atom(_)) => Ordering::Less,
            (Self::Atom(_), Self::Node(..)) => Ordering::Greater,
        }
    }
}

impl<N: PartialOrd + Ord, A: PartialOrd + Ord> PartialOrd for MixedTree<N, A> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl<N: Hash, A: Hash> Hash for MixedTree<N, A> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Self::Node(op, defs, uses, args) => {
                0u8.hash(state);
                op.hash(state);
                defs.hash(state);
                uses.hash(state);
                args.hash(state);
            },
            Self::Atom(a) => {
                1u8.hash(state);
                a.hash(state);
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::MixedTree;
    use crate::egraph::{EClassCall, HashConsEGraph};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Op {
        Add,
        Leaf(u32),
    }

    #[derive(Debug)]
    struct Expr;

    fn leaf(n: u32) -> MixedTree<Op, EClassCall<Expr>> {
        MixedTree::node(Op::Leaf(n), Arc::from([]), Arc::from([]), Arc::from([]))
    }

    #[test]
    fn insert_dedupes_structurally_equal_trees() {
        let mut eg = HashConsEGraph::<Op, Expr>::new();

        let tree_a = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([leaf(1), leaf(2)]),
        );
        let tree_b = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([leaf(1), leaf(2)]),
        );

        let a = tree_a.insert(&mut eg).unwrap();
        let b = tree_b.insert(&mut eg).unwrap();
        assert_eq!(a.class(), b.class());
    }

    #[test]
    fn atoms_collects_leaves_left_to_right() {
        let mut eg = HashConsEGraph::<Op, Expr>::new();
        let one = leaf(1).insert(&mut eg).unwrap();
        let two = leaf(2).insert(&mut eg).unwrap();

        let tree = MixedTree::node(
            Op::Add,
            Arc::from([]),
            Arc::from([]),
            Arc::from([
                MixedTree::<Op, EClassCall<Expr>>::Atom(one.clone()),
                MixedTree::<Op, EClassCall<Expr>>::Atom(two.clone()),
            ]),
        );
        assert_eq!(tree.atoms(), vec![&one, &two]);
    }
}
