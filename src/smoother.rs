//! Smoother and base-solver implementations shipped with the engine.
//!
//! These are reference implementations of the [`Smoother`] contract: a damped
//! Jacobi relaxation, a direct LU solver (the default base solver) and an
//! identity iteration. Anything else plugs in through the same trait.

use crate::error::{GmgError, Result};
use crate::sparse::CsrMatrix;
use crate::traits::{Smoother, SmootherFactory};
use ndarray::{Array1, Array2};
use std::sync::Arc;

/// Damped Jacobi relaxation: `c = omega * D^{-1} * d`.
#[derive(Debug, Clone)]
pub struct JacobiSmoother {
    omega: f64,
    diag_inv: Option<Array1<f64>>,
    matrix: Option<CsrMatrix>,
}

impl JacobiSmoother {
    /// Create a Jacobi smoother with damping factor `omega`.
    pub fn new(omega: f64) -> Self {
        Self {
            omega,
            diag_inv: None,
            matrix: None,
        }
    }

    /// Factory handle for per-level instantiation.
    pub fn factory(omega: f64) -> SmootherFactory {
        Arc::new(move || Box::new(JacobiSmoother::new(omega)))
    }

    fn bound(&self) -> Result<(&Array1<f64>, &CsrMatrix)> {
        match (&self.diag_inv, &self.matrix) {
            (Some(d), Some(m)) => Ok((d, m)),
            _ => Err(GmgError::MissingComponent {
                component: "smoother matrix",
            }),
        }
    }
}

impl Default for JacobiSmoother {
    fn default() -> Self {
        Self::new(2.0 / 3.0)
    }
}

impl Smoother for JacobiSmoother {
    fn init(&mut self, matrix: &CsrMatrix, _representative: &Array1<f64>) -> Result<()> {
        self.diag_inv = Some(matrix.diagonal_inverse()?);
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn apply(&mut self, correction: &mut Array1<f64>, defect: &Array1<f64>) -> Result<()> {
        let (diag_inv, _) = self.bound()?;
        if defect.len() != diag_inv.len() {
            return Err(GmgError::DimensionMismatch {
                expected: diag_inv.len(),
                got: defect.len(),
            });
        }
        for i in 0..defect.len() {
            correction[i] = self.omega * diag_inv[i] * defect[i];
        }
        Ok(())
    }

    fn apply_update_defect(
        &mut self,
        correction: &mut Array1<f64>,
        defect: &mut Array1<f64>,
    ) -> Result<()> {
        self.apply(correction, defect)?;
        let (_, matrix) = self.bound()?;
        matrix.apply_sub(defect, correction);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Smoother> {
        Box::new(self.clone())
    }
}

/// Direct solver via dense LU factorization with partial pivoting.
///
/// Exact up to round-off; the default base solver. Only suitable for the
/// small systems living at the base of the hierarchy.
#[derive(Debug, Clone, Default)]
pub struct LuSolver {
    factors: Option<LuFactors>,
    matrix: Option<CsrMatrix>,
}

#[derive(Debug, Clone)]
struct LuFactors {
    /// Combined factors; L is unit lower triangular below the diagonal.
    lu: Array2<f64>,
    /// Row swapped with row `k` at elimination step `k`, replayed in step
    /// order when applying the permutation.
    pivots: Vec<usize>,
    n: usize,
}

impl LuSolver {
    /// Create an unbound LU solver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory handle for per-level instantiation.
    pub fn factory() -> SmootherFactory {
        Arc::new(|| Box::new(LuSolver::new()))
    }

    fn factorize(dense: Array2<f64>) -> Result<LuFactors> {
        let n = dense.nrows();
        let mut lu = dense;
        let mut pivots: Vec<usize> = (0..n).collect();

        for k in 0..n {
            let mut max_val = lu[[k, k]].abs();
            let mut max_row = k;
            for i in (k + 1)..n {
                let val = lu[[i, k]].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val < 1e-30 {
                return Err(GmgError::SingularMatrix { pivot: k });
            }

            if max_row != k {
                for j in 0..n {
                    lu.swap([k, j], [max_row, j]);
                }
                pivots[k] = max_row;
            }

            let pivot = lu[[k, k]];
            for i in (k + 1)..n {
                let mult = lu[[i, k]] / pivot;
                lu[[i, k]] = mult;
                for j in (k + 1)..n {
                    let update = mult * lu[[k, j]];
                    lu[[i, j]] -= update;
                }
            }
        }

        Ok(LuFactors { lu, pivots, n })
    }

    fn solve(factors: &LuFactors, b: &Array1<f64>) -> Result<Array1<f64>> {
        if b.len() != factors.n {
            return Err(GmgError::DimensionMismatch {
                expected: factors.n,
                got: b.len(),
            });
        }

        let mut x = b.clone();
        let n = factors.n;

        // replay the elimination row swaps in step order
        for i in 0..n {
            let pivot = factors.pivots[i];
            if pivot != i {
                x.swap(i, pivot);
            }
        }

        // forward substitution: Ly = Pb
        for i in 0..n {
            for j in 0..i {
                let update = factors.lu[[i, j]] * x[j];
                x[i] -= update;
            }
        }

        // backward substitution: Ux = y
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                let update = factors.lu[[i, j]] * x[j];
                x[i] -= update;
            }
            x[i] /= factors.lu[[i, i]];
        }

        Ok(x)
    }
}

impl Smoother for LuSolver {
    fn init(&mut self, matrix: &CsrMatrix, _representative: &Array1<f64>) -> Result<()> {
        if matrix.num_rows != matrix.num_cols {
            return Err(GmgError::DimensionMismatch {
                expected: matrix.num_rows,
                got: matrix.num_cols,
            });
        }
        self.factors = Some(Self::factorize(matrix.to_dense())?);
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn apply(&mut self, correction: &mut Array1<f64>, defect: &Array1<f64>) -> Result<()> {
        let factors = self.factors.as_ref().ok_or(GmgError::MissingComponent {
            component: "base solver matrix",
        })?;
        let x = Self::solve(factors, defect)?;
        correction.assign(&x);
        Ok(())
    }

    fn apply_update_defect(
        &mut self,
        correction: &mut Array1<f64>,
        defect: &mut Array1<f64>,
    ) -> Result<()> {
        self.apply(correction, defect)?;
        let matrix = self.matrix.as_ref().ok_or(GmgError::MissingComponent {
            component: "base solver matrix",
        })?;
        matrix.apply_sub(defect, correction);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Smoother> {
        Box::new(self.clone())
    }
}

/// The identity iteration: `c = d`.
///
/// Useful for degenerating the cycle in tests and as a stand-in where a
/// stage must be configured but do no work.
#[derive(Debug, Clone, Default)]
pub struct IdentitySmoother {
    matrix: Option<CsrMatrix>,
}

impl IdentitySmoother {
    /// Create an identity smoother.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory handle for per-level instantiation.
    pub fn factory() -> SmootherFactory {
        Arc::new(|| Box::new(IdentitySmoother::new()))
    }
}

impl Smoother for IdentitySmoother {
    fn init(&mut self, matrix: &CsrMatrix, _representative: &Array1<f64>) -> Result<()> {
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn apply(&mut self, correction: &mut Array1<f64>, defect: &Array1<f64>) -> Result<()> {
        correction.assign(defect);
        Ok(())
    }

    fn apply_update_defect(
        &mut self,
        correction: &mut Array1<f64>,
        defect: &mut Array1<f64>,
    ) -> Result<()> {
        self.apply(correction, defect)?;
        let matrix = self.matrix.as_ref().ok_or(GmgError::MissingComponent {
            component: "smoother matrix",
        })?;
        matrix.apply_sub(defect, correction);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Smoother> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::CsrBuilder;
    use approx::assert_relative_eq;

    fn tridiag(n: usize) -> CsrMatrix {
        let mut b = CsrBuilder::new(n, n);
        for i in 0..n {
            let mut row = Vec::new();
            if i > 0 {
                row.push((i - 1, -1.0));
            }
            row.push((i, 2.0));
            if i + 1 < n {
                row.push((i + 1, -1.0));
            }
            b.add_row_entries(row.into_iter());
        }
        b.finish()
    }

    #[test]
    fn test_jacobi_reduces_residual() {
        let a = tridiag(8);
        let b = Array1::from_elem(8, 1.0);
        let rep = Array1::zeros(8);

        let mut smoother = JacobiSmoother::new(2.0 / 3.0);
        smoother.init(&a, &rep).unwrap();

        let mut c = Array1::zeros(8);
        let mut d = b.clone();
        let initial: f64 = d.iter().map(|v| v * v).sum::<f64>().sqrt();

        for _ in 0..10 {
            let mut step = Array1::zeros(8);
            smoother.apply_update_defect(&mut step, &mut d).unwrap();
            c += &step;
        }

        let final_norm: f64 = d.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(
            final_norm < initial,
            "residual should decrease: {initial} -> {final_norm}"
        );
    }

    #[test]
    fn test_jacobi_apply_leaves_defect_untouched() {
        let a = tridiag(4);
        let mut smoother = JacobiSmoother::default();
        smoother.init(&a, &Array1::zeros(4)).unwrap();

        let d = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let d_before = d.clone();
        let mut c = Array1::zeros(4);
        smoother.apply(&mut c, &d).unwrap();
        assert_eq!(d, d_before);
    }

    #[test]
    fn test_lu_solves_exactly() {
        let a = tridiag(5);
        let mut solver = LuSolver::new();
        solver.init(&a, &Array1::zeros(5)).unwrap();

        let x_exact = Array1::from_vec(vec![1.0, -2.0, 0.5, 3.0, -1.0]);
        let b = a.matvec(&x_exact);

        let mut x = Array1::zeros(5);
        solver.apply(&mut x, &b).unwrap();
        for i in 0..5 {
            assert_relative_eq!(x[i], x_exact[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_lu_update_defect_zeroes_residual() {
        let a = tridiag(4);
        let mut solver = LuSolver::new();
        solver.init(&a, &Array1::zeros(4)).unwrap();

        let mut d = Array1::from_vec(vec![1.0, 0.0, -2.0, 4.0]);
        let mut c = Array1::zeros(4);
        solver.apply_update_defect(&mut c, &mut d).unwrap();
        for i in 0..4 {
            assert_relative_eq!(d[i], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_lu_with_repeated_row_swaps() {
        // column maxima force a row swap at both elimination steps
        let a = CsrMatrix::from_triplets(
            3,
            3,
            vec![
                (0, 0, 0.1),
                (0, 1, 1.0),
                (1, 0, 0.2),
                (1, 2, 1.0),
                (2, 0, 1.0),
                (2, 1, 1.0),
                (2, 2, 1.0),
            ],
        );
        let mut solver = LuSolver::new();
        solver.init(&a, &Array1::zeros(3)).unwrap();

        let x_exact = Array1::from_vec(vec![2.0, -1.0, 3.0]);
        let b = a.matvec(&x_exact);
        let mut x = Array1::zeros(3);
        solver.apply(&mut x, &b).unwrap();
        for i in 0..3 {
            assert_relative_eq!(x[i], x_exact[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_lu_rejects_singular() {
        let a = CsrMatrix::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 0, 1.0)]);
        let mut solver = LuSolver::new();
        let err = solver.init(&a, &Array1::zeros(2)).unwrap_err();
        assert!(matches!(err, GmgError::SingularMatrix { .. }));
    }

    #[test]
    fn test_uninitialized_smoother_fails() {
        let mut smoother = JacobiSmoother::default();
        let mut c = Array1::zeros(2);
        let d = Array1::zeros(2);
        assert!(smoother.apply(&mut c, &d).is_err());
    }
}
