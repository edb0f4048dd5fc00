//! 0/1 linear feasibility problems and the solver they are handed to.
//!
//! The deadlock detector drives a solver as a synchronous request/response
//! collaborator: submit a problem, get back one feasible assignment or
//! infeasibility. The trait keeps the backend swappable; the default backend
//! is an exact depth-first branch-and-bound over the binary variables with
//! per-constraint bound pruning.

/// Relation of a linear constraint's left-hand side to its right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    /// `Σ terms <= rhs`
    Le,
    /// `Σ terms == rhs`
    Eq,
}

/// A sparse linear constraint over 0/1 variables.
#[derive(Debug, Clone)]
pub struct LinearConstraint {
    pub terms: Vec<(usize, i64)>,
    pub sense: Sense,
    pub rhs: i64,
}

impl LinearConstraint {
    pub fn le(terms: Vec<(usize, i64)>, rhs: i64) -> Self {
        Self {
            terms,
            sense: Sense::Le,
            rhs,
        }
    }

    pub fn eq(terms: Vec<(usize, i64)>, rhs: i64) -> Self {
        Self {
            terms,
            sense: Sense::Eq,
            rhs,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZeroOneProblem {
    pub num_vars: usize,
    pub constraints: Vec<LinearConstraint>,
}

impl ZeroOneProblem {
    pub fn new(num_vars: usize) -> Self {
        Self {
            num_vars,
            constraints: Vec::new(),
        }
    }

    pub fn push(&mut self, constraint: LinearConstraint) {
        debug_assert!(constraint
            .terms
            .iter()
            .all(|&(var, _)| var < self.num_vars));
        self.constraints.push(constraint);
    }
}

/// Outcome of one solver round-trip. Infeasibility is an expected answer,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Solution {
    Feasible(Vec<bool>),
    Infeasible,
}

pub trait ZeroOneSolver {
    /// Find any assignment satisfying every constraint.
    fn solve(&self, problem: &ZeroOneProblem) -> Solution;
}

/// Exact feasibility search: variables are branched in index order, zeros
/// first, and a branch is abandoned as soon as some constraint can no longer
/// be satisfied by any completion (tracked via running minimum/maximum of the
/// unassigned terms).
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchAndBound;

impl ZeroOneSolver for BranchAndBound {
    fn solve(&self, problem: &ZeroOneProblem) -> Solution {
        let mut search = Search::new(problem);
        if !search.all_satisfiable() {
            return Solution::Infeasible;
        }
        if search.dfs(0) {
            Solution::Feasible(search.assignment)
        } else {
            Solution::Infeasible
        }
    }
}

struct Search<'a> {
    problem: &'a ZeroOneProblem,
    /// Constraints touching each variable, as (constraint index, coefficient).
    occurs: Vec<Vec<(usize, i64)>>,
    /// Sum of the assigned terms, per constraint.
    fixed: Vec<i64>,
    /// Smallest achievable sum of the unassigned terms, per constraint.
    min_rest: Vec<i64>,
    /// Largest achievable sum of the unassigned terms, per constraint.
    max_rest: Vec<i64>,
    assignment: Vec<bool>,
}

impl<'a> Search<'a> {
    fn new(problem: &'a ZeroOneProblem) -> Self {
        let mut occurs = vec![Vec::new(); problem.num_vars];
        let mut min_rest = vec![0i64; problem.constraints.len()];
        let mut max_rest = vec![0i64; problem.constraints.len()];

        for (c, constraint) in problem.constraints.iter().enumerate() {
            for &(var, coeff) in &constraint.terms {
                occurs[var].push((c, coeff));
                if coeff < 0 {
                    min_rest[c] += coeff;
                } else {
                    max_rest[c] += coeff;
                }
            }
        }

        Self {
            problem,
            occurs,
            fixed: vec![0; problem.constraints.len()],
            min_rest,
            max_rest,
            assignment: vec![false; problem.num_vars],
        }
    }

    fn satisfiable(&self, c: usize) -> bool {
        let constraint = &self.problem.constraints[c];
        let lo = self.fixed[c] + self.min_rest[c];
        let hi = self.fixed[c] + self.max_rest[c];
        match constraint.sense {
            Sense::Le => lo <= constraint.rhs,
            Sense::Eq => lo <= constraint.rhs && constraint.rhs <= hi,
        }
    }

    fn all_satisfiable(&self) -> bool {
        (0..self.problem.constraints.len()).all(|c| self.satisfiable(c))
    }

    fn dfs(&mut self, var: usize) -> bool {
        if var == self.problem.num_vars {
            return true;
        }

        for value in [false, true] {
            self.assign(var, value);
            let viable = self.occurs[var]
                .iter()
                .all(|&(c, _)| self.satisfiable(c));
            if viable && self.dfs(var + 1) {
                return true;
            }
            self.unassign(var, value);
        }
        false
    }

    fn assign(&mut self, var: usize, value: bool) {
        self.assignment[var] = value;
        for &(c, coeff) in &self.occurs[var] {
            if coeff < 0 {
                self.min_rest[c] -= coeff;
            } else {
                self.max_rest[c] -= coeff;
            }
            if value {
                self.fixed[c] += coeff;
            }
        }
    }

    fn unassign(&mut self, var: usize, value: bool) {
        for &(c, coeff) in &self.occurs[var] {
            if coeff < 0 {
                self.min_rest[c] += coeff;
            } else {
                self.max_rest[c] += coeff;
            }
            if value {
                self.fixed[c] -= coeff;
            }
        }
    }
}
