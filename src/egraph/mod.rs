//! The slotted hash-cons e-graph: canonical shapes, e-classes, and
//! congruence closure.

pub mod hashcons;
mod node;

pub use hashcons::{EGraphMut, HashConsEGraph, IncompatibleSlots, MergeError};
pub use node::{shape, EClassCall, ENode};

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{EClassCall, ENode, HashConsEGraph};
    use crate::{slot::Slot, slot_map::SlotMap};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    enum Op {
        Add,
        Leaf(u32),
    }

    #[derive(Debug)]
    struct Expr;

    type Node = ENode<Op, Expr>;
    type Graph = HashConsEGraph<Op, Expr>;

    fn leaf(eg: &mut Graph, n: u32) -> EClassCall<Expr> {
        eg.add(Node::new(
            Arc::new(Op::Leaf(n)),
            Arc::from([]),
            Arc::from([]),
            Arc::from([]),
        ))
        .unwrap()
    }

    fn add(eg: &mut Graph, a: &EClassCall<Expr>, b: &EClassCall<Expr>) -> EClassCall<Expr> {
        eg.add(Node::new(
            Arc::new(Op::Add),
            Arc::from([]),
            Arc::from([]),
            Arc::from([a.clone(), b.clone()]),
        ))
        .unwrap()
    }

    #[test]
    fn hash_cons_dedupes_ground_nodes() {
        let mut eg = Graph::new();
        let one_a = leaf(&mut eg, 1);
        let one_b = leaf(&mut eg, 1);
        assert_eq!(one_a.class(), one_b.class());

        let sum_a = add(&mut eg, &one_a, &leaf(&mut eg, 2));
        let sum_b = add(&mut eg, &one_b, &leaf(&mut eg, 2));
        assert_eq!(sum_a.class(), sum_b.class());
    }

    #[test]
    fn union_triggers_congruence_merge() {
        let mut eg = Graph::new();
        let one = leaf(&mut eg, 1);
        let two = leaf(&mut eg, 2);
        let three_direct = leaf(&mut eg, 3);
        let three_sum = add(&mut eg, &one, &two);

        {
            let mut w = eg.write();
            w.union(&three_direct, &three_sum).unwrap();
        }

        assert_eq!(
            eg.find(three_direct.class()).unwrap(),
            eg.find(three_sum.class()).unwrap()
        );
    }

    #[test]
    fn slot_map_identity_is_noop() {
        let set = crate::slot_set::SlotSet::from_iter_dedup([Slot::numeric(0), Slot::numeric(1)]);
        let id = SlotMap::identity(&set);
        assert_eq!(id.get(Slot::numeric(0)), Some(Slot::numeric(0)));
        assert_eq!(id.get(Slot::numeric(1)), Some(Slot::numeric(1)));
    }

    /// `Lam(a, Var(a))` and `Lam(b, Var(b))` are alpha-equivalent: with no
    /// rewrite rules at all, they must hash-cons to the same ground class
    /// purely because the binder makes both free of any slot.
    #[test]
    fn alpha_equivalent_lambdas_share_a_class() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        enum LOp {
            Var,
            Lam,
        }

        let mut eg: HashConsEGraph<LOp, Expr> = HashConsEGraph::new();
        let mut src = crate::slot::SlotSource::new();

        let a = src.fresh();
        let var_a = eg
            .add(ENode::new(Arc::new(LOp::Var), Arc::from([]), Arc::from([a]), Arc::from([])))
            .unwrap();
        let lam_a = eg
            .add(ENode::new(
                Arc::new(LOp::Lam),
                Arc::from([a]),
                Arc::from([]),
                Arc::from([var_a]),
            ))
            .unwrap();

        let b = src.fresh();
        let var_b = eg
            .add(ENode::new(Arc::new(LOp::Var), Arc::from([]), Arc::from([b]), Arc::from([])))
            .unwrap();
        let lam_b = eg
            .add(ENode::new(
                Arc::new(LOp::Lam),
                Arc::from([b]),
                Arc::from([]),
                Arc::from([var_b]),
            ))
            .unwrap();

        assert_eq!(lam_a.class(), lam_b.class());
        assert!(eg.are_same(&lam_a, &lam_b).unwrap());
    }
}
