use crate::bdd::Bdd;
use crate::marking::Marking;
use crate::net::{PetriNet, PlaceId};
use crate::reference::Ref;

/// Maps places to decision-diagram variables and converts markings to and
/// from symbolic states.
///
/// Place `i` (in the net's fixed place order) owns the current-state variable
/// `2i + 1` and the next-state variable `2i + 2`, so each current/next pair
/// is adjacent in the global variable order. The interleaving keeps
/// intermediate diagrams small during relational products; the ordering is
/// established once per analysis and never changes.
#[derive(Debug, Clone)]
pub struct MarkingCodec {
    num_places: usize,
}

impl MarkingCodec {
    pub fn new(net: &PetriNet) -> Self {
        Self {
            num_places: net.num_places(),
        }
    }

    pub fn num_places(&self) -> usize {
        self.num_places
    }

    pub fn current_var(&self, place: PlaceId) -> u32 {
        2 * place.raw() + 1
    }

    pub fn next_var(&self, place: PlaceId) -> u32 {
        2 * place.raw() + 2
    }

    /// All current-state variables, ascending.
    pub fn current_vars(&self) -> Vec<u32> {
        (0..self.num_places as u32).map(|i| 2 * i + 1).collect()
    }

    /// Renaming that moves a next-state function back onto the current-state
    /// variables (order-preserving by construction).
    pub fn next_to_current(&self) -> Vec<(u32, u32)> {
        (0..self.num_places as u32)
            .map(|i| (2 * i + 2, 2 * i + 1))
            .collect()
    }

    /// The cube of current-state literals describing exactly `marking`.
    pub fn encode(&self, bdd: &Bdd, marking: &Marking) -> Ref {
        assert_eq!(marking.width(), self.num_places);
        let literals = marking.bits().iter().enumerate().map(|(i, &b)| {
            let v = (2 * i + 1) as i32;
            if b {
                v
            } else {
                -v
            }
        });
        bdd.cube(literals)
    }

    /// Invert [`encode`](Self::encode): read the single marking out of a
    /// one-marking cube over current-state variables.
    pub fn decode(&self, bdd: &Bdd, state: Ref) -> Marking {
        let mut bits = vec![false; self.num_places];
        let mut node = state;
        while !bdd.is_terminal(node) {
            let v = bdd.variable(node.index());
            debug_assert_eq!(v % 2, 1, "cube over current-state variables");
            let low = bdd.low_node(node);
            let high = bdd.high_node(node);
            if bdd.is_zero(low) {
                bits[(v as usize - 1) / 2] = true;
                node = high;
            } else {
                debug_assert!(bdd.is_zero(high), "state must be a single-marking cube");
                node = low;
            }
        }
        debug_assert!(bdd.is_one(node));
        Marking::from_bits(bits)
    }

    /// Membership of `marking` in the state set rooted at `set`.
    pub fn contains(&self, bdd: &Bdd, set: Ref, marking: &Marking) -> bool {
        assert_eq!(marking.width(), self.num_places);
        bdd.eval(set, |v| {
            debug_assert_eq!(v % 2, 1, "state sets range over current-state variables");
            marking.bits()[(v as usize - 1) / 2]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_place_net() -> PetriNet {
        let mut net = PetriNet::new();
        net.add_place("a", true);
        net.add_place("b", false);
        net.add_place("c", false);
        net
    }

    #[test]
    fn test_interleaved_variables() {
        let codec = MarkingCodec::new(&three_place_net());
        assert_eq!(codec.current_vars(), vec![1, 3, 5]);
        assert_eq!(codec.next_to_current(), vec![(2, 1), (4, 3), (6, 5)]);
        assert_eq!(codec.current_var(PlaceId::new(2)), 5);
        assert_eq!(codec.next_var(PlaceId::new(2)), 6);
    }

    #[test]
    fn test_encode_decode_roundtrip_all_markings() {
        let net = three_place_net();
        let codec = MarkingCodec::new(&net);
        let bdd = Bdd::default();

        for bits in 0u32..8 {
            let marking = Marking::from_bits((0..3).map(|i| bits & (1 << i) != 0).collect());
            let state = codec.encode(&bdd, &marking);
            assert_eq!(codec.decode(&bdd, state), marking);
        }
    }

    #[test]
    fn test_contains_distinguishes_markings() {
        let net = three_place_net();
        let codec = MarkingCodec::new(&net);
        let bdd = Bdd::default();

        let m = net.initial_marking();
        let state = codec.encode(&bdd, m);
        assert!(codec.contains(&bdd, state, m));

        let other = Marking::from_bits(vec![false, true, false]);
        assert!(!codec.contains(&bdd, state, &other));

        // Union of two cubes contains both markings and nothing else.
        let both = bdd.apply_or(state, codec.encode(&bdd, &other));
        assert!(codec.contains(&bdd, both, m));
        assert!(codec.contains(&bdd, both, &other));
        assert!(!codec.contains(&bdd, both, &Marking::empty(3)));
    }
}
