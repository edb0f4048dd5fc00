use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};

use crate::net::PetriNet;

/// Incidence matrix `C` of the net: rows indexed by place, columns by
/// transition, `C[p][t] = effect of firing t on p`. A place that is both
/// input and output of the same transition nets out to zero.
pub fn incidence(net: &PetriNet) -> Vec<Vec<i64>> {
    let mut matrix = vec![vec![0i64; net.num_transitions()]; net.num_places()];
    for (j, t) in net.transitions().iter().enumerate() {
        for &p in &t.inputs {
            matrix[p.index()][j] -= 1;
        }
        for &p in &t.outputs {
            matrix[p.index()][j] += 1;
        }
    }
    matrix
}

/// Integer basis of the net's conservation relations: vectors `y` with
/// `y · C = 0`, i.e. the left kernel of the incidence matrix.
///
/// Every marking `m` reachable by any firing sequence satisfies
/// `y · m == y · m0` for each basis vector, which is what makes these
/// relations usable as a sound relaxation of reachability.
pub fn conservation_basis(net: &PetriNet) -> Vec<Vec<BigInt>> {
    let places = net.num_places();
    let matrix = incidence(net);

    // Left kernel of C = nullspace of Cᵀ (rows indexed by transition).
    let transposed: Vec<Vec<BigRational>> = (0..net.num_transitions())
        .map(|j| {
            (0..places)
                .map(|i| BigRational::from_integer(BigInt::from(matrix[i][j])))
                .collect()
        })
        .collect();

    nullspace(transposed, places)
        .into_iter()
        .map(integer_scaled)
        .collect()
}

/// Basis of `{x | M · x = 0}` via reduced row echelon form.
fn nullspace(mut matrix: Vec<Vec<BigRational>>, cols: usize) -> Vec<Vec<BigRational>> {
    if cols == 0 {
        return Vec::new();
    }

    let rows = matrix.len();
    let mut pivot_cols = Vec::new();
    let mut pivot_row = 0usize;

    for col in 0..cols {
        if pivot_row >= rows {
            break;
        }
        let Some(row_idx) = (pivot_row..rows).find(|&r| !matrix[r][col].is_zero()) else {
            continue;
        };
        matrix.swap(row_idx, pivot_row);

        let pivot = matrix[pivot_row][col].clone();
        for value in matrix[pivot_row].iter_mut() {
            *value /= pivot.clone();
        }

        for row in 0..rows {
            if row == pivot_row {
                continue;
            }
            let factor = matrix[row][col].clone();
            if factor.is_zero() {
                continue;
            }
            for inner in col..cols {
                let adjustment = matrix[pivot_row][inner].clone() * factor.clone();
                matrix[row][inner] -= adjustment;
            }
        }

        pivot_cols.push(col);
        pivot_row += 1;
    }

    let mut is_pivot = vec![false; cols];
    for &col in &pivot_cols {
        is_pivot[col] = true;
    }

    let mut basis = Vec::new();
    for free_col in (0..cols).filter(|&c| !is_pivot[c]) {
        let mut vector = vec![BigRational::zero(); cols];
        vector[free_col] = BigRational::one();
        for (pivot_index, &pivot_col) in pivot_cols.iter().enumerate() {
            let coeff = matrix[pivot_index][free_col].clone();
            if !coeff.is_zero() {
                vector[pivot_col] = -coeff;
            }
        }
        basis.push(vector);
    }
    basis
}

/// Clear denominators and divide out the common factor, fixing the sign of
/// the first nonzero entry to be positive.
fn integer_scaled(vector: Vec<BigRational>) -> Vec<BigInt> {
    let mut lcm = BigInt::one();
    for value in &vector {
        lcm = lcm.lcm(value.denom());
    }

    let mut scaled: Vec<BigInt> = vector
        .into_iter()
        .map(|value| value.numer() * (&lcm / value.denom()))
        .collect();

    let mut gcd = BigInt::zero();
    for value in &scaled {
        gcd = gcd.gcd(value);
    }
    if !gcd.is_zero() && !gcd.is_one() {
        for value in scaled.iter_mut() {
            *value = &*value / &gcd;
        }
    }

    if let Some(first) = scaled.iter().find(|v| !v.is_zero()) {
        if first.is_negative() {
            for value in scaled.iter_mut() {
                *value = -&*value;
            }
        }
    }
    scaled
}
