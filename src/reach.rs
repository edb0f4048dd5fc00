use std::rc::Rc;

use log::{debug, info};
use num_bigint::BigUint;
use thiserror::Error;

use crate::bdd::Bdd;
use crate::codec::MarkingCodec;
use crate::marking::Marking;
use crate::net::{NetError, PetriNet};
use crate::reference::Ref;
use crate::relation::TransitionRelation;

/// Tunables for the fixpoint computation.
#[derive(Debug, Clone)]
pub struct ReachabilityConfig {
    /// Upper bound on live arena nodes, checked once per iteration. Crossing
    /// it aborts the whole computation; no partial result is returned.
    pub node_limit: usize,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            node_limit: 1 << 24,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid net structure: {0}")]
    InvalidNet(#[from] NetError),
    #[error("decision-diagram node budget exceeded: {nodes} live nodes (limit {limit})")]
    NodeBudgetExceeded { nodes: usize, limit: usize },
}

/// Compute the complete set of markings reachable from the net's initial
/// marking. Either the full fixpoint is returned or the computation fails as
/// a whole; there is no partial or resumable variant.
pub fn build_reachability(net: &PetriNet) -> Result<ReachableSet, AnalysisError> {
    build_reachability_with(net, &ReachabilityConfig::default())
}

pub fn build_reachability_with(
    net: &PetriNet,
    config: &ReachabilityConfig,
) -> Result<ReachableSet, AnalysisError> {
    net.validate()?;

    let bdd = Bdd::default();
    let codec = MarkingCodec::new(net);
    let relation = TransitionRelation::build(&bdd, net, &codec);

    let current_vars = codec.current_vars();
    let next_to_current = codec.next_to_current();

    info!(
        "reachability fixpoint over {} places, {} transitions (initial marking {})",
        net.num_places(),
        net.num_transitions(),
        net.initial_marking()
    );

    let mut visited = codec.encode(&bdd, net.initial_marking());
    let mut iterations = 0usize;

    loop {
        iterations += 1;

        // Image = ∃current. Visited(current) ∧ R(current, next),
        // renamed back onto the current-state variables.
        let image_next = bdd.rel_product(visited, relation.relation(), &current_vars);
        let image = bdd.rename_vars(image_next, &next_to_current);

        let next_visited = bdd.apply_or(visited, image);
        if next_visited == visited {
            break;
        }
        visited = next_visited;

        let nodes = bdd.num_nodes();
        debug!(
            "iteration {}: visited set grew ({} diagram nodes, {} live arena nodes)",
            iterations,
            bdd.size(visited),
            nodes
        );
        if nodes > config.node_limit {
            return Err(AnalysisError::NodeBudgetExceeded {
                nodes,
                limit: config.node_limit,
            });
        }
    }

    let set = ReachableSet {
        bdd: Rc::new(bdd),
        root: visited,
        codec,
        iterations,
    };
    info!(
        "fixpoint after {} iterations: {} reachable markings ({} diagram nodes)",
        iterations,
        set.count(),
        set.symbolic_size()
    );
    Ok(set)
}

/// The completed reachability result: an immutable view of the set of all
/// reachable markings.
///
/// The set owns a shared handle to its diagram manager plus the root handle;
/// it exists only once the fixpoint has terminated, so every query below is
/// defined. Queries never mutate the set.
pub struct ReachableSet {
    bdd: Rc<Bdd>,
    root: Ref,
    codec: MarkingCodec,
    iterations: usize,
}

impl ReachableSet {
    /// Membership of a single marking.
    pub fn contains(&self, marking: &Marking) -> bool {
        self.codec.contains(&self.bdd, self.root, marking)
    }

    /// Number of reachable markings, counted on the diagram without
    /// materializing them.
    pub fn count(&self) -> BigUint {
        self.bdd
            .sat_count(self.root, self.codec.num_places() as u32)
    }

    /// Lazy iterator over every reachable marking, each exactly once, in
    /// diagram order. Restartable: each call walks the diagram afresh.
    pub fn iter(&self) -> Markings<'_> {
        Markings::new(&self.bdd, &self.codec, self.root)
    }

    /// Fixpoint iterations it took to close the set.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Nodes in the diagram representing the set.
    pub fn symbolic_size(&self) -> u64 {
        self.bdd.size(self.root)
    }

    pub(crate) fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    pub(crate) fn root(&self) -> Ref {
        self.root
    }

    pub(crate) fn codec(&self) -> &MarkingCodec {
        &self.codec
    }
}

impl std::fmt::Debug for ReachableSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachableSet")
            .field("root", &self.root)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a ReachableSet {
    type Item = Marking;
    type IntoIter = Markings<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

enum Branch {
    High,
    Low,
    Done,
}

struct Frame {
    node: Ref,
    place: usize,
    next_branch: Branch,
}

/// Depth-first enumeration of the markings in a state set.
///
/// Unlike a raw path walk, variables the diagram skips over (don't-cares) are
/// expanded into both values, so every yielded item is a complete marking and
/// no marking is yielded twice.
pub struct Markings<'a> {
    bdd: &'a Bdd,
    width: usize,
    stack: Vec<Frame>,
    bits: Vec<bool>,
}

impl<'a> Markings<'a> {
    fn new(bdd: &'a Bdd, codec: &MarkingCodec, root: Ref) -> Self {
        Self {
            bdd,
            width: codec.num_places(),
            stack: vec![Frame {
                node: root,
                place: 0,
                next_branch: Branch::High,
            }],
            bits: Vec::new(),
        }
    }

    fn pop(&mut self) {
        self.stack.pop();
        if !self.stack.is_empty() {
            self.bits.pop();
        }
    }

    /// Child of `node` for assigning `value` to the place at `place`, which
    /// is `node` itself when the diagram does not test that place.
    fn child(&self, node: Ref, place: usize, value: bool) -> Ref {
        let var = (2 * place + 1) as u32;
        if self.bdd.is_terminal(node) || self.bdd.variable(node.index()) != var {
            debug_assert!(
                self.bdd.is_terminal(node) || self.bdd.variable(node.index()) > var
            );
            node
        } else if value {
            self.bdd.high_node(node)
        } else {
            self.bdd.low_node(node)
        }
    }
}

impl Iterator for Markings<'_> {
    type Item = Marking;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let node = frame.node;
            let place = frame.place;

            if place == self.width {
                debug_assert!(self.bdd.is_one(node));
                let marking = Marking::from_bits(self.bits.clone());
                self.pop();
                return Some(marking);
            }

            let (value, next_branch) = match frame.next_branch {
                Branch::High => (true, Branch::Low),
                Branch::Low => (false, Branch::Done),
                Branch::Done => {
                    self.pop();
                    continue;
                }
            };
            frame.next_branch = next_branch;

            let child = self.child(node, place, value);
            if self.bdd.is_zero(child) {
                continue;
            }
            self.bits.push(value);
            self.stack.push(Frame {
                node: child,
                place: place + 1,
                next_branch: Branch::High,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use test_log::test;

    use super::*;
    use crate::net::PlaceId;

    fn chain_net() -> PetriNet {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        let p3 = net.add_place("p3", false);
        net.add_transition("t1", &[p1], &[p2]).unwrap();
        net.add_transition("t2", &[p2], &[p3]).unwrap();
        net
    }

    fn marking(net: &PetriNet, marked: &[u32]) -> Marking {
        Marking::from_marked(
            net.num_places(),
            &marked.iter().map(|&i| PlaceId::new(i)).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_chain_reaches_three_markings() {
        let net = chain_net();
        let set = build_reachability(&net).unwrap();

        assert_eq!(set.count(), BigUint::from(3u32));
        assert!(set.contains(&marking(&net, &[0])));
        assert!(set.contains(&marking(&net, &[1])));
        assert!(set.contains(&marking(&net, &[2])));
        assert!(!set.contains(&marking(&net, &[0, 1])));
        assert!(!set.contains(&Marking::empty(3)));
    }

    #[test]
    fn test_cycle_reaches_two_markings() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        net.add_transition("t1", &[p1], &[p2]).unwrap();
        net.add_transition("t2", &[p2], &[p1]).unwrap();

        let set = build_reachability(&net).unwrap();
        assert_eq!(set.count(), BigUint::from(2u32));
        assert!(set.contains(&marking(&net, &[0])));
        assert!(set.contains(&marking(&net, &[1])));
    }

    #[test]
    fn test_iter_yields_each_marking_once() {
        let net = chain_net();
        let set = build_reachability(&net).unwrap();

        let markings: Vec<Marking> = set.iter().collect();
        assert_eq!(markings.len(), 3);
        let unique: BTreeSet<Marking> = markings.iter().cloned().collect();
        assert_eq!(unique.len(), 3);
        // Restartable: a fresh traversal sees the same set.
        assert_eq!(set.iter().collect::<BTreeSet<_>>(), unique);
        // And everything yielded is indeed a member.
        for m in &set {
            assert!(set.contains(&m));
        }
    }

    #[test]
    fn test_closure_under_the_transition_relation() {
        let net = chain_net();
        let set = build_reachability(&net).unwrap();

        let bdd = set.bdd();
        let codec = set.codec();
        let relation = TransitionRelation::build(bdd, &net, codec);

        let image_next = bdd.rel_product(set.root(), relation.relation(), &codec.current_vars());
        let image = bdd.rename_vars(image_next, &codec.next_to_current());

        // Fixpoint: stepping adds nothing new.
        assert_eq!(bdd.apply_or(set.root(), image), set.root());

        // Closure: everything except the initial marking has a predecessor
        // inside the set.
        let initial = codec.encode(bdd, net.initial_marking());
        assert_eq!(bdd.apply_or(initial, image), set.root());
    }

    #[test]
    fn test_iterations_bounded_by_state_count() {
        let net = chain_net();
        let set = build_reachability(&net).unwrap();
        // Three reachable markings: the loop closes after at most 3 grows
        // plus the final stable check.
        assert!(set.iterations() <= 4);
        assert!(set.iterations() >= 2);
    }

    #[test]
    fn test_node_budget_failure() {
        let net = chain_net();
        let config = ReachabilityConfig { node_limit: 1 };
        let err = build_reachability_with(&net, &config).unwrap_err();
        assert!(matches!(err, AnalysisError::NodeBudgetExceeded { .. }));
    }

    #[test]
    fn test_invalid_net_rejected() {
        use crate::net::{Place, Transition};

        // Hand-assembled net referencing a place that does not exist.
        let net = PetriNet::from_parts(
            vec![Place { name: "p1".into() }],
            vec![Transition {
                name: "t".into(),
                inputs: vec![PlaceId::new(5)],
                outputs: vec![],
            }],
            Marking::empty(1),
        );
        let err = build_reachability(&net).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidNet(_)));

        // Initial marking of the wrong width.
        let net = PetriNet::from_parts(vec![Place { name: "p1".into() }], vec![], Marking::empty(3));
        let err = build_reachability(&net).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InvalidNet(NetError::MarkingWidth { .. })
        ));
    }

    #[test]
    fn test_empty_net_single_marking() {
        let net = PetriNet::new();
        let set = build_reachability(&net).unwrap();
        // Zero places: only the empty marking exists.
        assert_eq!(set.count(), BigUint::from(1u32));
        let all: Vec<_> = set.iter().collect();
        assert_eq!(all, vec![Marking::empty(0)]);
    }
}
