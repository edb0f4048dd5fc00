use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;

use log::debug;
use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::cache::OpCache;
use crate::node::Node;
use crate::reference::Ref;
use crate::table::NodeTable;

/// Arena-based manager for reduced ordered binary decision diagrams with
/// complement edges.
///
/// All operations go through the manager; nodes are deduplicated in the arena
/// ([`NodeTable`]) and referenced by lightweight [`Ref`] handles, so equal
/// functions always get equal handles and equality checks are O(1). Variables
/// are 1-indexed (0 is reserved for the terminal) and lower-numbered variables
/// sit closer to the root.
pub struct Bdd {
    table: RefCell<NodeTable>,
    ite_cache: RefCell<OpCache<(Ref, Ref, Ref), Ref>>,
    pub zero: Ref,
    pub one: Ref,
}

impl Bdd {
    pub fn new(capacity_bits: usize) -> Self {
        let mut table = NodeTable::with_capacity_bits(capacity_bits);

        // Allocate the terminal node at index 1.
        let one = table.push(Node::default());
        assert_eq!(one, 1);
        let one = Ref::positive(one);
        let zero = -one;

        Self {
            table: RefCell::new(table),
            ite_cache: RefCell::new(OpCache::default()),
            zero,
            one,
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new(20)
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.ite_cache.borrow();
        f.debug_struct("Bdd")
            .field("nodes", &self.num_nodes())
            .field("cache_hits", &cache.hits())
            .field("cache_misses", &cache.misses())
            .finish()
    }
}

impl Bdd {
    /// Number of allocated arena nodes (terminal and sentinel included).
    pub fn num_nodes(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn variable(&self, index: u32) -> u32 {
        self.table.borrow().node(index).variable
    }
    pub fn low(&self, index: u32) -> Ref {
        self.table.borrow().node(index).low
    }
    pub fn high(&self, index: u32) -> Ref {
        self.table.borrow().node(index).high
    }

    /// Low child as a function, with the edge complement folded in.
    pub fn low_node(&self, node: Ref) -> Ref {
        let low = self.low(node.index());
        if node.is_negated() {
            -low
        } else {
            low
        }
    }
    /// High child as a function, with the edge complement folded in.
    pub fn high_node(&self, node: Ref) -> Ref {
        let high = self.high(node.index());
        if node.is_negated() {
            -high
        } else {
            high
        }
    }

    pub fn is_zero(&self, node: Ref) -> bool {
        node == self.zero
    }
    pub fn is_one(&self, node: Ref) -> bool {
        node == self.one
    }
    pub fn is_terminal(&self, node: Ref) -> bool {
        self.is_zero(node) || self.is_one(node)
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        assert_ne!(v, 0, "variable index should not be zero");

        // Canonical form: the high edge is never complemented.
        if high.is_negated() {
            return -self.mk_node(v, -low, -high);
        }

        // Redundant test collapses.
        if low == high {
            return low;
        }

        let index = self.table.borrow_mut().put(Node {
            variable: v,
            low,
            high,
        });
        Ref::positive(index)
    }

    pub fn mk_var(&self, v: u32) -> Ref {
        self.mk_node(v, self.zero, self.one)
    }

    /// Conjunction of signed literals (`-v` means "v is false").
    pub fn cube(&self, literals: impl IntoIterator<Item = i32>) -> Ref {
        let mut literals: Vec<_> = literals.into_iter().collect();
        literals.sort_by_key(|&lit| lit.abs());
        debug!("cube(literals = {:?})", literals);
        let mut current = self.one;
        for lit in literals.into_iter().rev() {
            assert_ne!(lit, 0, "variable index should not be zero");
            current = if lit < 0 {
                self.mk_node(lit.unsigned_abs(), current, self.zero)
            } else {
                self.mk_node(lit.unsigned_abs(), self.zero, current)
            };
        }
        current
    }

    /// Disjunction of signed literals.
    pub fn clause(&self, literals: impl IntoIterator<Item = i32>) -> Ref {
        let mut literals: Vec<_> = literals.into_iter().collect();
        literals.sort_by_key(|&lit| lit.abs());
        debug!("clause(literals = {:?})", literals);
        let mut current = self.zero;
        for lit in literals.into_iter().rev() {
            assert_ne!(lit, 0, "variable index should not be zero");
            current = if lit < 0 {
                self.mk_node(lit.unsigned_abs(), self.one, current)
            } else {
                self.mk_node(lit.unsigned_abs(), current, self.one)
            };
        }
        current
    }

    /// Cofactors of `node` with respect to variable `v`, which must not lie
    /// below the node's top variable.
    pub fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        assert_ne!(v, 0, "variable index should not be zero");

        let index = node.index();
        if self.is_terminal(node) || v < self.variable(index) {
            return (node, node);
        }
        assert_eq!(v, self.variable(index));
        if node.is_negated() {
            (-self.low(index), -self.high(index))
        } else {
            (self.low(index), self.high(index))
        }
    }

    /// Apply the ITE operation to the arguments.
    ///
    /// ```text
    /// ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)
    /// ```
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        // Base cases:
        //   ite(1,G,H) => G
        //   ite(0,G,H) => H
        if self.is_one(f) {
            return g;
        }
        if self.is_zero(f) {
            return h;
        }

        // From now on, F is known not to be a constant.
        debug_assert!(!self.is_terminal(f));

        // More base cases:
        //   ite(F,G,G) => G
        //   ite(F,1,0) => F
        //   ite(F,0,1) => ~F
        //   ite(F,1,~F) => 1
        //   ite(F,F,1) => 1
        //   ite(F,~F,0) => 0
        //   ite(F,0,F) => F
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }
        if self.is_one(g) && h == -f {
            return self.one;
        }
        if g == f && self.is_one(h) {
            return self.one;
        }
        if g == -f && self.is_zero(h) {
            return self.zero;
        }
        if self.is_zero(g) && h == f {
            return f;
        }

        // Standard triples:
        //   ite(F,F,H) => ite(F,1,H)
        //   ite(F,G,F) => ite(F,G,0)
        //   ite(F,~F,H) => ite(F,0,H)
        //   ite(F,G,~F) => ite(F,G,1)
        if g == f {
            return self.apply_ite(f, self.one, h);
        }
        if h == f {
            return self.apply_ite(f, g, self.zero);
        }
        if g == -f {
            return self.apply_ite(f, self.zero, h);
        }
        if h == -f {
            return self.apply_ite(f, g, self.one);
        }

        let i = self.variable(f.index());
        let j = self.variable(g.index());
        let k = self.variable(h.index());
        debug_assert_ne!(i, 0);

        // Equivalent pairs:
        //   ite(F,1,H) == ite(H,1,F) == F ∨ H
        //   ite(F,G,0) == ite(G,F,0) == F ∧ G
        //   ite(F,G,1) == ite(~G,~F,1) == F -> G
        //   ite(F,0,H) == ite(~H,0,~F) == ~F ∧ H
        //   ite(F,G,~G) == ite(G,F,~F)
        // (choose the one with the lowest top variable)
        if self.is_one(g) && k < i {
            return self.apply_ite(h, self.one, f);
        }
        if self.is_zero(h) && j < i {
            return self.apply_ite(g, f, self.zero);
        }
        if self.is_one(h) && j < i {
            return self.apply_ite(-g, -f, self.one);
        }
        if self.is_zero(g) && k < i {
            return self.apply_ite(-h, self.zero, -f);
        }
        if g == -h && j < i {
            return self.apply_ite(g, f, -f);
        }

        // Make sure the first two arguments are regular (not complemented).
        let (mut f, mut g, mut h) = (f, g, h);

        // ite(~F,G,H) => ite(F,H,G)
        if f.is_negated() {
            f = -f;
            std::mem::swap(&mut g, &mut h);
        }

        // ite(F,~G,H) => ~ite(F,G,~H)
        let mut n = false;
        if g.is_negated() {
            n = true;
            g = -g;
            h = -h;
        }

        let (f, g, h) = (f, g, h);

        let key = (f, g, h);
        if let Some(&res) = self.ite_cache.borrow().get(&key) {
            debug!("cache: ite({}, {}, {}) -> {}", f, g, h, res);
            return if n { -res } else { res };
        }

        // Top variable of the triple.
        let mut m = i;
        if j != 0 {
            m = m.min(j);
        }
        if k != 0 {
            m = m.min(k);
        }
        debug_assert_ne!(m, 0);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let e = self.apply_ite(f0, g0, h0);
        let t = self.apply_ite(f1, g1, h1);

        let res = self.mk_node(m, e, t);
        self.ite_cache.borrow_mut().insert(key, res);

        if n {
            -res
        } else {
            res
        }
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.zero)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, self.one, v)
    }

    pub fn apply_xor(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, -v, v)
    }

    pub fn apply_eq(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, -v)
    }

    pub fn apply_imply(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.one)
    }

    pub fn apply_and_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.one;
        for node in nodes {
            res = self.apply_and(res, node);
        }
        res
    }

    pub fn apply_or_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.zero;
        for node in nodes {
            res = self.apply_or(res, node);
        }
        res
    }

    /// Existential quantification `∃vars. f`.
    ///
    /// `vars` must be sorted in ascending order.
    pub fn exists(&self, f: Ref, vars: &[u32]) -> Ref {
        debug_assert!(vars.windows(2).all(|w| w[0] < w[1]));
        debug!("exists(f = {}, vars = {:?})", f, vars);
        let mut cache = HashMap::new();
        self.exists_rec(f, vars, &mut cache)
    }

    fn exists_rec(&self, f: Ref, vars: &[u32], cache: &mut HashMap<Ref, Ref>) -> Ref {
        if self.is_terminal(f) {
            return f;
        }

        let v = self.variable(f.index());
        if vars.last().is_some_and(|&last| v > last) {
            // Everything below the last quantified variable is unaffected.
            return f;
        }

        if let Some(&res) = cache.get(&f) {
            return res;
        }

        let (f0, f1) = self.top_cofactors(f, v);
        let low = self.exists_rec(f0, vars, cache);
        let high = self.exists_rec(f1, vars, cache);

        let res = if vars.binary_search(&v).is_ok() {
            self.apply_or(low, high)
        } else {
            self.mk_node(v, low, high)
        };
        cache.insert(f, res);
        res
    }

    /// Fused relational product `∃vars. f ∧ g`.
    ///
    /// Equivalent to `exists(apply_and(f, g), vars)` but quantifies while the
    /// conjunction is being built, keeping intermediate diagrams small.
    /// `vars` must be sorted in ascending order.
    pub fn rel_product(&self, f: Ref, g: Ref, vars: &[u32]) -> Ref {
        debug_assert!(vars.windows(2).all(|w| w[0] < w[1]));
        debug!("rel_product(f = {}, g = {}, vars = {:?})", f, g, vars);
        let mut cache = HashMap::new();
        self.rel_product_rec(f, g, vars, &mut cache)
    }

    fn rel_product_rec(
        &self,
        f: Ref,
        g: Ref,
        vars: &[u32],
        cache: &mut HashMap<(Ref, Ref), Ref>,
    ) -> Ref {
        if self.is_zero(f) || self.is_zero(g) {
            return self.zero;
        }
        if self.is_one(f) && self.is_one(g) {
            return self.one;
        }

        let key = (f, g);
        if let Some(&res) = cache.get(&key) {
            return res;
        }

        let vf = if self.is_terminal(f) {
            u32::MAX
        } else {
            self.variable(f.index())
        };
        let vg = if self.is_terminal(g) {
            u32::MAX
        } else {
            self.variable(g.index())
        };
        let m = vf.min(vg);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);

        let low = self.rel_product_rec(f0, g0, vars, cache);
        let high = self.rel_product_rec(f1, g1, vars, cache);

        let res = if vars.binary_search(&m).is_ok() {
            self.apply_or(low, high)
        } else {
            self.mk_node(m, low, high)
        };
        cache.insert(key, res);
        res
    }

    /// Rename variables according to `map` (pairs `(from, to)`, sorted by
    /// `from`). The mapping must preserve the relative variable order on the
    /// support of `f`, which keeps the rebuilt diagram reduced and ordered.
    pub fn rename_vars(&self, f: Ref, map: &[(u32, u32)]) -> Ref {
        debug_assert!(map.windows(2).all(|w| w[0].0 < w[1].0));
        debug!("rename_vars(f = {}, map = {:?})", f, map);
        let mut cache = HashMap::new();
        self.rename_rec(f, map, &mut cache)
    }

    fn rename_rec(&self, f: Ref, map: &[(u32, u32)], cache: &mut HashMap<Ref, Ref>) -> Ref {
        if self.is_terminal(f) {
            return f;
        }
        if f.is_negated() {
            return -self.rename_rec(-f, map, cache);
        }

        if let Some(&res) = cache.get(&f) {
            return res;
        }

        let index = f.index();
        let v = self.variable(index);
        let w = match map.binary_search_by_key(&v, |&(from, _)| from) {
            Ok(i) => map[i].1,
            Err(_) => v,
        };

        let low = self.rename_rec(self.low(index), map, cache);
        let high = self.rename_rec(self.high(index), map, cache);
        let res = self.mk_node(w, low, high);
        cache.insert(f, res);
        res
    }

    /// Evaluate `f` under a total assignment.
    pub fn eval(&self, f: Ref, assignment: impl Fn(u32) -> bool) -> bool {
        let mut node = f;
        while !self.is_terminal(node) {
            let v = self.variable(node.index());
            node = if assignment(v) {
                self.high_node(node)
            } else {
                self.low_node(node)
            };
        }
        self.is_one(node)
    }

    /// One satisfying assignment as signed literals, or `None` for the
    /// constant-false function. Variables not mentioned are don't-cares.
    pub fn one_sat(&self, f: Ref) -> Option<Vec<i32>> {
        if self.is_zero(f) {
            return None;
        }

        let mut literals = Vec::new();
        let mut node = f;
        while !self.is_one(node) {
            let v = self.variable(node.index()) as i32;
            let high = self.high_node(node);
            // Prefer the high branch when it is satisfiable.
            if !self.is_zero(high) {
                literals.push(v);
                node = high;
            } else {
                literals.push(-v);
                node = self.low_node(node);
            }
        }
        Some(literals)
    }

    /// Number of satisfying assignments over a universe of `num_vars`
    /// variables. `f` must not depend on variables outside that universe.
    pub fn sat_count(&self, f: Ref, num_vars: u32) -> BigUint {
        let total = BigUint::one() << (num_vars as usize);
        let mut cache = HashMap::new();
        self.sat_count_rec(f, &total, &mut cache)
    }

    fn sat_count_rec(
        &self,
        f: Ref,
        total: &BigUint,
        cache: &mut HashMap<Ref, BigUint>,
    ) -> BigUint {
        if self.is_zero(f) {
            return BigUint::zero();
        }
        if self.is_one(f) {
            return total.clone();
        }
        if f.is_negated() {
            return total - self.sat_count_rec(-f, total, cache);
        }

        if let Some(count) = cache.get(&f) {
            return count.clone();
        }

        let index = f.index();
        let count_low = self.sat_count_rec(self.low(index), total, cache);
        let count_high = self.sat_count_rec(self.high(index), total, cache);
        let count: BigUint = (count_low + count_high) >> 1;

        cache.insert(f, count.clone());
        count
    }

    /// Indices of all arena nodes reachable from the given roots.
    pub fn descendants(&self, roots: impl IntoIterator<Item = Ref>) -> HashSet<u32> {
        let mut visited = HashSet::new();
        visited.insert(self.one.index());
        let mut queue = VecDeque::from_iter(roots);

        while let Some(node) = queue.pop_front() {
            let index = node.index();
            if visited.insert(index) {
                queue.push_back(self.low(index));
                queue.push_back(self.high(index));
            }
        }

        visited
    }

    /// Number of distinct nodes in the diagram rooted at `f`.
    pub fn size(&self, f: Ref) -> u64 {
        self.descendants([f]).len() as u64
    }

    pub fn to_bracket_string(&self, node: Ref) -> String {
        if self.is_zero(node) {
            return "(0)".to_string();
        } else if self.is_one(node) {
            return "(1)".to_string();
        }

        let v = self.variable(node.index());
        format!(
            "{}:(x{}, {}, {})",
            node,
            v,
            self.to_bracket_string(self.high_node(node)),
            self.to_bracket_string(self.low_node(node))
        )
    }
}
