use log::{debug, info, warn};
use num_traits::ToPrimitive;

use crate::marking::Marking;
use crate::net::PetriNet;
use crate::reach::ReachableSet;
use crate::solver::{
    BranchAndBound, LinearConstraint, Solution, ZeroOneProblem, ZeroOneSolver,
};
use crate::structural::conservation_basis;

/// Tunables for the candidate-generation loop.
#[derive(Debug, Clone)]
pub struct DeadlockConfig {
    /// Maximum number of solver round-trips (confirmed deadlocks and rejected
    /// ghosts both count). Hitting the cap yields an inconclusive outcome,
    /// never a silent "no deadlock".
    pub candidate_limit: usize,
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 4096,
        }
    }
}

/// What the search established, regardless of how it ended.
#[derive(Debug, Clone, Default)]
pub struct DeadlockReport {
    /// Reachable dead markings, sorted.
    pub deadlocks: Vec<Marking>,
    /// Solver round-trips performed.
    pub candidates: usize,
    /// Candidates that satisfied the structural constraints but turned out
    /// unreachable.
    pub ghosts: usize,
}

#[derive(Debug, Clone)]
pub enum DeadlockOutcome {
    /// The constraint system was exhausted: `deadlocks` is exactly the set of
    /// reachable dead markings (possibly empty).
    Complete(DeadlockReport),
    /// The candidate cap was hit first. `report.candidates` carries the
    /// iteration count; the deadlocks found so far are genuine, but more may
    /// exist.
    Inconclusive(DeadlockReport),
}

impl DeadlockOutcome {
    pub fn deadlocks(&self) -> &[Marking] {
        &self.report().deadlocks
    }

    pub fn report(&self) -> &DeadlockReport {
        match self {
            DeadlockOutcome::Complete(report) => report,
            DeadlockOutcome::Inconclusive(report) => report,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, DeadlockOutcome::Complete(_))
    }
}

/// Find every reachable dead marking of the net, or prove there is none.
///
/// Candidates come from a 0/1 program combining the net's conservation
/// relations with one non-enabledness constraint per transition; that system
/// over-approximates reachability, so each feasible assignment is checked
/// against the symbolic reachability set. Confirmed candidates are recorded,
/// unreachable ones ("ghosts") are discarded, and either way a blocking cut
/// excludes the assignment before the solver runs again. The loop ends when
/// the system becomes infeasible — or, inconclusively, at the candidate cap.
pub fn detect_deadlocks(net: &PetriNet, reachable: &ReachableSet) -> DeadlockOutcome {
    detect_deadlocks_with(
        net,
        reachable,
        &DeadlockConfig::default(),
        &BranchAndBound,
    )
}

pub fn detect_deadlocks_with(
    net: &PetriNet,
    reachable: &ReachableSet,
    config: &DeadlockConfig,
    solver: &dyn ZeroOneSolver,
) -> DeadlockOutcome {
    let mut problem = dead_marking_problem(net);
    let mut report = DeadlockReport::default();

    info!(
        "deadlock search: {} structural constraints over {} places",
        problem.constraints.len(),
        net.num_places()
    );

    loop {
        if report.candidates >= config.candidate_limit {
            warn!(
                "deadlock search inconclusive: candidate cap {} reached ({} confirmed, {} ghosts)",
                config.candidate_limit, report.deadlocks.len(), report.ghosts
            );
            report.deadlocks.sort();
            return DeadlockOutcome::Inconclusive(report);
        }

        let assignment = match solver.solve(&problem) {
            Solution::Infeasible => {
                info!(
                    "deadlock search complete: {} deadlocks, {} candidates, {} ghosts",
                    report.deadlocks.len(),
                    report.candidates,
                    report.ghosts
                );
                report.deadlocks.sort();
                return DeadlockOutcome::Complete(report);
            }
            Solution::Feasible(assignment) => assignment,
        };
        report.candidates += 1;

        let candidate = Marking::from_bits(assignment);
        debug_assert!(
            net.enabled_transitions(&candidate).is_empty(),
            "solver candidates must be dead by construction"
        );

        if reachable.contains(&candidate) {
            debug!("candidate {} is reachable: deadlock confirmed", candidate);
            report.deadlocks.push(candidate.clone());
        } else {
            debug!("candidate {} is unreachable: ghost rejected", candidate);
            report.ghosts += 1;
        }
        problem.push(blocking_cut(&candidate));
    }
}

/// Structural constraints every reachable dead marking satisfies: the
/// conservation relations of the state equation, plus, per transition, a
/// linear form of "this transition is not enabled".
fn dead_marking_problem(net: &PetriNet) -> ZeroOneProblem {
    let mut problem = ZeroOneProblem::new(net.num_places());
    let initial = net.initial_marking();

    for vector in conservation_basis(net) {
        let mut terms = Vec::new();
        let mut rhs = 0i64;
        let mut oversized = false;
        for (index, coeff) in vector.iter().enumerate() {
            let Some(coeff) = coeff.to_i64() else {
                oversized = true;
                break;
            };
            if coeff != 0 {
                terms.push((index, coeff));
                if initial.bits()[index] {
                    rhs += coeff;
                }
            }
        }
        if oversized {
            // Dropping a conservation row only loosens the relaxation; the
            // reachability check still rejects whatever slips through.
            warn!("conservation vector with oversized coefficients skipped");
            continue;
        }
        problem.push(LinearConstraint::eq(terms, rhs));
    }

    for t in net.transitions() {
        // Not enabled: some input place empty, or some fresh output place
        // already occupied. Linearly:
        //   Σ_{p ∈ inputs} x_p − Σ_{p ∈ outputs∖inputs} x_p <= |inputs| − 1
        let mut terms: Vec<(usize, i64)> =
            t.inputs.iter().map(|p| (p.index(), 1i64)).collect();
        for p in &t.outputs {
            if !t.inputs.contains(p) {
                terms.push((p.index(), -1));
            }
        }
        problem.push(LinearConstraint::le(terms, t.inputs.len() as i64 - 1));
    }

    problem
}

/// Forbid exactly this marking in subsequent solves.
fn blocking_cut(marking: &Marking) -> LinearConstraint {
    let terms = marking
        .bits()
        .iter()
        .enumerate()
        .map(|(index, &b)| (index, if b { 1i64 } else { -1 }))
        .collect();
    LinearConstraint::le(terms, marking.token_count() as i64 - 1)
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::net::PlaceId;
    use crate::reach::build_reachability;

    fn marking(net: &PetriNet, marked: &[u32]) -> Marking {
        Marking::from_marked(
            net.num_places(),
            &marked.iter().map(|&i| PlaceId::new(i)).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_chain_has_unique_deadlock() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        let p3 = net.add_place("p3", false);
        net.add_transition("t1", &[p1], &[p2]).unwrap();
        net.add_transition("t2", &[p2], &[p3]).unwrap();

        let reachable = build_reachability(&net).unwrap();
        let outcome = detect_deadlocks(&net, &reachable);

        assert!(outcome.is_complete());
        assert_eq!(outcome.deadlocks(), &[marking(&net, &[2])]);
    }

    #[test]
    fn test_cycle_has_no_deadlock() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        net.add_transition("t1", &[p1], &[p2]).unwrap();
        net.add_transition("t2", &[p2], &[p1]).unwrap();

        let reachable = build_reachability(&net).unwrap();
        let outcome = detect_deadlocks(&net, &reachable);

        assert!(outcome.is_complete());
        assert!(outcome.deadlocks().is_empty());
        // The conservation relation x1 + x2 = 1 clashes with both disabling
        // constraints at once, so not a single candidate is generated.
        assert_eq!(outcome.report().candidates, 0);
    }

    #[test]
    fn test_fork_has_two_deadlocks() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        let p3 = net.add_place("p3", false);
        net.add_transition("ta", &[p1], &[p2]).unwrap();
        net.add_transition("tb", &[p1], &[p3]).unwrap();

        let reachable = build_reachability(&net).unwrap();
        let outcome = detect_deadlocks(&net, &reachable);

        assert!(outcome.is_complete());
        // Sorted bit-vector order puts {p3} before {p2}.
        assert_eq!(
            outcome.deadlocks(),
            &[marking(&net, &[2]), marking(&net, &[1])]
        );
        assert_eq!(outcome.report().ghosts, 0);
    }

    #[test]
    fn test_ghost_candidate_is_rejected_once() {
        // A source transition destroys all conservation relations, leaving
        // the disabling constraints as the only structural cuts. They admit
        // {a, b, c}, which is dead but unreachable (nothing ever marks c).
        let mut net = PetriNet::new();
        let a = net.add_place("a", false);
        let b = net.add_place("b", false);
        let c = net.add_place("c", false);
        net.add_transition("source", &[], &[a]).unwrap();
        net.add_transition("t1", &[a], &[b]).unwrap();
        net.add_transition("t2", &[c], &[b]).unwrap();

        let reachable = build_reachability(&net).unwrap();
        let outcome = detect_deadlocks(&net, &reachable);

        assert!(outcome.is_complete());
        assert_eq!(outcome.deadlocks(), &[marking(&net, &[0, 1])]);
        assert_eq!(outcome.report().ghosts, 1);
        // One confirmed, one ghost, then infeasible: the blocking cuts kept
        // the ghost from ever being re-proposed.
        assert_eq!(outcome.report().candidates, 2);
    }

    #[test]
    fn test_candidate_cap_is_inconclusive() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        let p3 = net.add_place("p3", false);
        net.add_transition("ta", &[p1], &[p2]).unwrap();
        net.add_transition("tb", &[p1], &[p3]).unwrap();

        let reachable = build_reachability(&net).unwrap();
        let config = DeadlockConfig { candidate_limit: 1 };
        let outcome = detect_deadlocks_with(&net, &reachable, &config, &BranchAndBound);

        assert!(!outcome.is_complete());
        assert_eq!(outcome.report().candidates, 1);
        // The one deadlock found before the cap is still reported.
        assert_eq!(outcome.deadlocks().len(), 1);
    }

    #[test]
    fn test_every_deadlock_is_dead_and_reachable() {
        let mut net = PetriNet::new();
        let p1 = net.add_place("p1", true);
        let p2 = net.add_place("p2", false);
        let p3 = net.add_place("p3", false);
        net.add_transition("ta", &[p1], &[p2]).unwrap();
        net.add_transition("tb", &[p1], &[p3]).unwrap();

        let reachable = build_reachability(&net).unwrap();
        let outcome = detect_deadlocks(&net, &reachable);

        for m in outcome.deadlocks() {
            assert!(net.enabled_transitions(m).is_empty());
            assert!(reachable.contains(m));
        }
    }
}
