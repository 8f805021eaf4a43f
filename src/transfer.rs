//! Transfer operators shipped with the engine.
//!
//! [`StandardTransfer`] is matrix-backed: it fetches the interpolation or
//! injection stencil between its level pair from the assembly collaborator,
//! lets the attached constraints adjust it, and applies it (or its
//! transpose) afterwards. [`IdentityTransfer`] copies values unchanged
//! between equally sized levels.

use crate::error::{GmgError, Result};
use crate::grid_level::GridLevel;
use crate::sparse::CsrMatrix;
use crate::traits::{Assembly, Constraint, TransferFactory, TransferKind, TransferOperator};
use ndarray::Array1;
use std::sync::Arc;

/// Matrix-backed transfer between two consecutive levels.
///
/// Restriction is the transpose of prolongation; a single instance therefore
/// serves both directions.
pub struct StandardTransfer {
    kind: TransferKind,
    levels: Option<(GridLevel, GridLevel)>,
    matrix: Option<CsrMatrix>,
    constraints: Vec<Arc<dyn Constraint>>,
}

impl StandardTransfer {
    /// Interpolation-weight transfer (the usual prolongation stencil).
    pub fn interpolation() -> Self {
        Self::with_kind(TransferKind::Interpolation)
    }

    /// Pure injection at coincident degrees of freedom (the usual
    /// projection operator).
    pub fn injection() -> Self {
        Self::with_kind(TransferKind::Injection)
    }

    fn with_kind(kind: TransferKind) -> Self {
        Self {
            kind,
            levels: None,
            matrix: None,
            constraints: Vec::new(),
        }
    }

    /// Factory handle for per-level instantiation.
    pub fn factory(kind: TransferKind) -> TransferFactory {
        Arc::new(move || Box::new(StandardTransfer::with_kind(kind)))
    }

    fn matrix(&self) -> Result<&CsrMatrix> {
        self.matrix.as_ref().ok_or(GmgError::MissingComponent {
            component: "transfer matrix",
        })
    }
}

impl TransferOperator for StandardTransfer {
    fn set_levels(&mut self, coarse: GridLevel, fine: GridLevel) {
        self.levels = Some((coarse, fine));
        self.matrix = None;
    }

    fn init(&mut self, assembly: &dyn Assembly) -> Result<()> {
        let (coarse, fine) = self.levels.ok_or(GmgError::MissingComponent {
            component: "transfer levels",
        })?;
        let mut matrix = assembly.assemble_transfer(coarse, fine, self.kind)?;
        for constraint in &self.constraints {
            constraint.adjust_prolongation(&mut matrix, coarse, fine)?;
        }
        self.matrix = Some(matrix);
        Ok(())
    }

    fn prolongate(&self, fine: &mut Array1<f64>, coarse: &Array1<f64>) -> Result<()> {
        let p = self.matrix()?;
        if coarse.len() != p.num_cols {
            return Err(GmgError::DimensionMismatch {
                expected: p.num_cols,
                got: coarse.len(),
            });
        }
        if fine.len() != p.num_rows {
            return Err(GmgError::DimensionMismatch {
                expected: p.num_rows,
                got: fine.len(),
            });
        }
        fine.assign(&p.matvec(coarse));
        Ok(())
    }

    fn do_restrict(&self, coarse: &mut Array1<f64>, fine: &Array1<f64>) -> Result<()> {
        let p = self.matrix()?;
        if fine.len() != p.num_rows {
            return Err(GmgError::DimensionMismatch {
                expected: p.num_rows,
                got: fine.len(),
            });
        }
        if coarse.len() != p.num_cols {
            return Err(GmgError::DimensionMismatch {
                expected: p.num_cols,
                got: coarse.len(),
            });
        }
        coarse.assign(&p.matvec_transpose(fine));
        Ok(())
    }

    fn clear_constraints(&mut self) {
        self.constraints.clear();
    }

    fn add_constraint(&mut self, constraint: Arc<dyn Constraint>) {
        self.constraints.push(constraint);
    }

    fn clone_box(&self) -> Box<dyn TransferOperator> {
        Box::new(StandardTransfer {
            kind: self.kind,
            levels: self.levels,
            matrix: self.matrix.clone(),
            constraints: self.constraints.clone(),
        })
    }
}

/// Transfer that copies values unchanged between equally sized levels.
#[derive(Debug, Clone, Default)]
pub struct IdentityTransfer;

impl IdentityTransfer {
    /// Create an identity transfer.
    pub fn new() -> Self {
        Self
    }

    /// Factory handle for per-level instantiation.
    pub fn factory() -> TransferFactory {
        Arc::new(|| Box::new(IdentityTransfer))
    }
}

impl TransferOperator for IdentityTransfer {
    fn set_levels(&mut self, _coarse: GridLevel, _fine: GridLevel) {}

    fn init(&mut self, _assembly: &dyn Assembly) -> Result<()> {
        Ok(())
    }

    fn prolongate(&self, fine: &mut Array1<f64>, coarse: &Array1<f64>) -> Result<()> {
        if fine.len() != coarse.len() {
            return Err(GmgError::DimensionMismatch {
                expected: fine.len(),
                got: coarse.len(),
            });
        }
        fine.assign(coarse);
        Ok(())
    }

    fn do_restrict(&self, coarse: &mut Array1<f64>, fine: &Array1<f64>) -> Result<()> {
        if coarse.len() != fine.len() {
            return Err(GmgError::DimensionMismatch {
                expected: coarse.len(),
                got: fine.len(),
            });
        }
        coarse.assign(fine);
        Ok(())
    }

    fn clear_constraints(&mut self) {}

    fn add_constraint(&mut self, _constraint: Arc<dyn Constraint>) {}

    fn clone_box(&self) -> Box<dyn TransferOperator> {
        Box::new(IdentityTransfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ChainHierarchy;
    use approx::assert_relative_eq;

    #[test]
    fn test_standard_transfer_prolongates_linearly() {
        let space = ChainHierarchy::full_refinement(2, 3);
        let mut transfer = StandardTransfer::interpolation();
        transfer.set_levels(
            GridLevel::level_with_ghosts(0),
            GridLevel::level_with_ghosts(1),
        );
        transfer.init(&space).unwrap();

        let n_coarse = space.unknowns_on_level(0);
        let n_fine = space.unknowns_on_level(1);
        let coarse = Array1::from_elem(n_coarse, 1.0);
        let mut fine = Array1::zeros(n_fine);
        transfer.prolongate(&mut fine, &coarse).unwrap();

        // away from the chain ends a constant is reproduced exactly
        for i in 1..n_fine - 1 {
            assert_relative_eq!(fine[i], 1.0);
        }
    }

    #[test]
    fn test_restriction_is_transpose_of_prolongation() {
        let space = ChainHierarchy::full_refinement(2, 4);
        let mut transfer = StandardTransfer::interpolation();
        transfer.set_levels(
            GridLevel::level_with_ghosts(0),
            GridLevel::level_with_ghosts(1),
        );
        transfer.init(&space).unwrap();

        let n_coarse = space.unknowns_on_level(0);
        let n_fine = space.unknowns_on_level(1);

        // <P x, y> == <x, P^T y> for arbitrary vectors
        let x = Array1::from_shape_fn(n_coarse, |i| (i as f64 + 1.0).sin());
        let y = Array1::from_shape_fn(n_fine, |i| (i as f64 * 0.7).cos());

        let mut px = Array1::zeros(n_fine);
        transfer.prolongate(&mut px, &x).unwrap();
        let mut pty = Array1::zeros(n_coarse);
        transfer.do_restrict(&mut pty, &y).unwrap();

        let lhs: f64 = px.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.iter().zip(pty.iter()).map(|(a, b)| a * b).sum();
        assert_relative_eq!(lhs, rhs, epsilon = 1e-12);
    }

    #[test]
    fn test_identity_transfer_dimension_check() {
        let transfer = IdentityTransfer::new();
        let coarse = Array1::zeros(3);
        let mut fine = Array1::zeros(4);
        assert!(transfer.prolongate(&mut fine, &coarse).is_err());
    }
}
