use log::{debug, info};

use crate::bdd::Bdd;
use crate::codec::MarkingCodec;
use crate::net::{PetriNet, TransitionId};
use crate::reference::Ref;

/// The symbolic transition relation `R(current, next)` of a net: the
/// disjunction over all transitions of "this transition is enabled and fires".
#[derive(Debug, Clone, Copy)]
pub struct TransitionRelation {
    relation: Ref,
}

impl TransitionRelation {
    /// Compile the net's firing rule into a relation over the codec's
    /// current/next variable pairs.
    pub fn build(bdd: &Bdd, net: &PetriNet, codec: &MarkingCodec) -> Self {
        let steps = net.transition_ids().map(|t| {
            let step = step_relation(bdd, net, codec, t);
            debug!(
                "transition {:?} `{}`: step relation of {} nodes",
                t,
                net.transition(t).name,
                bdd.size(step)
            );
            step
        });
        let relation = bdd.apply_or_many(steps);
        info!(
            "transition relation over {} transitions: {} nodes",
            net.num_transitions(),
            bdd.size(relation)
        );
        Self { relation }
    }

    pub fn relation(&self) -> Ref {
        self.relation
    }
}

/// Relation for a single transition `t`: true of `(current, next)` iff
///
/// 1. every input place is marked in `current`,
/// 2. every output place that is not also an input is unmarked in `current`
///    (the 1-safe capacity condition),
/// 3. `next` equals `current` with inputs-minus-outputs cleared,
///    outputs set, and every other place unchanged.
pub(crate) fn step_relation(
    bdd: &Bdd,
    net: &PetriNet,
    codec: &MarkingCodec,
    transition: TransitionId,
) -> Ref {
    let t = net.transition(transition);

    let mut input = vec![false; net.num_places()];
    let mut output = vec![false; net.num_places()];
    for &p in &t.inputs {
        input[p.index()] = true;
    }
    for &p in &t.outputs {
        output[p.index()] = true;
    }

    let mut parts = Vec::with_capacity(2 * net.num_places());

    for place in net.place_ids() {
        let current = bdd.mk_var(codec.current_var(place));
        let next = bdd.mk_var(codec.next_var(place));
        let consumed = input[place.index()];
        let produced = output[place.index()];

        // Enabling and capacity conditions on the current state.
        if consumed {
            parts.push(current);
        } else if produced {
            parts.push(-current);
        }

        // Effect on the next state.
        let effect = if produced {
            next
        } else if consumed {
            -next
        } else {
            bdd.apply_eq(next, current)
        };
        parts.push(effect);
    }

    bdd.apply_and_many(parts)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::marking::Marking;

    /// Successors of a single marking, computed through the step relation.
    fn symbolic_successors(
        bdd: &Bdd,
        net: &PetriNet,
        codec: &MarkingCodec,
        step: Ref,
        marking: &Marking,
    ) -> Vec<Marking> {
        let state = codec.encode(bdd, marking);
        let image = bdd.rel_product(state, step, &codec.current_vars());
        let image = bdd.rename_vars(image, &codec.next_to_current());

        let mut found = Vec::new();
        for bits in 0u32..(1 << net.num_places()) {
            let m = Marking::from_bits(
                (0..net.num_places())
                    .map(|i| bits & (1 << i) != 0)
                    .collect(),
            );
            if codec.contains(bdd, image, &m) {
                found.push(m);
            }
        }
        found
    }

    #[test]
    fn test_step_matches_firing_rule() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        let t1 = net.add_transition("t1", &[p1], &[p2]).unwrap();

        let bdd = Bdd::default();
        let codec = MarkingCodec::new(&net);
        let step = step_relation(&bdd, &net, &codec, t1);

        // From {p1}: exactly the marking produced by firing t1.
        let m0 = net.initial_marking().clone();
        let successors = symbolic_successors(&bdd, &net, &codec, step, &m0);
        assert_eq!(successors, vec![net.fire(t1, &m0).unwrap()]);

        // From {p2}: t1 is disabled, no successors.
        let m1 = Marking::from_bits(vec![false, true]);
        assert!(symbolic_successors(&bdd, &net, &codec, step, &m1).is_empty());
    }

    #[test]
    fn test_capacity_condition_blocks_step() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", true);
        let t = net.add_transition("t", &[p1], &[p2]).unwrap();

        let bdd = Bdd::default();
        let codec = MarkingCodec::new(&net);
        let step = step_relation(&bdd, &net, &codec, t);

        // {p1, p2}: firing would exceed capacity on p2.
        let m = net.initial_marking().clone();
        assert!(symbolic_successors(&bdd, &net, &codec, step, &m).is_empty());
    }

    #[test]
    fn test_full_relation_is_disjunction() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        let p3 = net.add_place("p3", false);
        let ta = net.add_transition("ta", &[p1], &[p2]).unwrap();
        let tb = net.add_transition("tb", &[p1], &[p3]).unwrap();

        let bdd = Bdd::default();
        let codec = MarkingCodec::new(&net);
        let relation = TransitionRelation::build(&bdd, &net, &codec);

        let expected = bdd.apply_or(
            step_relation(&bdd, &net, &codec, ta),
            step_relation(&bdd, &net, &codec, tb),
        );
        assert_eq!(relation.relation(), expected);

        // Both branches of the fork appear in the one-step image.
        let m0 = net.initial_marking().clone();
        let successors = symbolic_successors(&bdd, &net, &codec, relation.relation(), &m0);
        assert_eq!(successors.len(), 2);
    }
}
