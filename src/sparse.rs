//! Compressed Sparse Row (CSR) matrix storage.
//!
//! CSR format stores:
//! - `values`: non-zero entries in row-major order
//! - `col_indices`: column index for each value
//! - `row_ptrs`: index into values/col_indices where each row starts

use crate::error::{GmgError, Result};
use ndarray::{Array1, Array2};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Row count above which the matrix-vector product switches to rayon.
#[cfg(feature = "rayon")]
const PAR_ROW_THRESHOLD: usize = 4096;

/// Sparse matrix in CSR format with `f64` entries.
///
/// Memory-efficient storage with O(nnz) space and O(nnz) matrix-vector
/// products. A `0 x 0` matrix doubles as the "cleared" state for optional
/// contributions.
#[derive(Debug, Clone, Default)]
pub struct CsrMatrix {
    /// Number of rows
    pub num_rows: usize,
    /// Number of columns
    pub num_cols: usize,
    /// Non-zero values in row-major order
    pub values: Vec<f64>,
    /// Column indices for each value
    pub col_indices: Vec<usize>,
    /// Row pointers; `row_ptrs[num_rows]` equals the number of non-zeros
    pub row_ptrs: Vec<usize>,
}

impl CsrMatrix {
    /// Create an empty matrix of the given shape.
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self {
            num_rows,
            num_cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptrs: vec![0; num_rows + 1],
        }
    }

    /// Build from (row, col, value) triplets.
    ///
    /// Duplicate coordinates are summed, which makes this the natural target
    /// for additive element-wise assembly.
    pub fn from_triplets(
        num_rows: usize,
        num_cols: usize,
        mut triplets: Vec<(usize, usize, f64)>,
    ) -> Self {
        triplets.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut col_indices: Vec<usize> = Vec::with_capacity(triplets.len());
        let mut coords: Vec<(usize, usize)> = Vec::with_capacity(triplets.len());

        for (r, c, v) in triplets {
            debug_assert!(r < num_rows && c < num_cols, "triplet out of bounds");
            if coords.last() == Some(&(r, c)) {
                if let Some(last) = values.last_mut() {
                    *last += v;
                }
            } else {
                coords.push((r, c));
                col_indices.push(c);
                values.push(v);
            }
        }

        let mut row_ptrs = vec![0usize; num_rows + 1];
        for &(r, _) in &coords {
            row_ptrs[r + 1] += 1;
        }
        for i in 0..num_rows {
            row_ptrs[i + 1] += row_ptrs[i];
        }

        Self {
            num_rows,
            num_cols,
            values,
            col_indices,
            row_ptrs,
        }
    }

    /// Number of stored non-zeros.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Whether this is the cleared `0 x 0` matrix.
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0 && self.num_cols == 0
    }

    /// Entries of row `i` as `(col, value)` pairs.
    pub fn row_entries(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.row_ptrs[i]..self.row_ptrs[i + 1];
        self.col_indices[range.clone()]
            .iter()
            .zip(&self.values[range])
            .map(|(&c, &v)| (c, v))
    }

    /// Compute `y = A * x`.
    pub fn matvec(&self, x: &Array1<f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.num_cols);

        #[cfg(feature = "rayon")]
        if self.num_rows >= PAR_ROW_THRESHOLD {
            let y: Vec<f64> = (0..self.num_rows)
                .into_par_iter()
                .map(|i| self.row_entries(i).map(|(c, v)| v * x[c]).sum())
                .collect();
            return Array1::from_vec(y);
        }

        let mut y = Array1::zeros(self.num_rows);
        for i in 0..self.num_rows {
            y[i] = self.row_entries(i).map(|(c, v)| v * x[c]).sum();
        }
        y
    }

    /// Compute `y = A^T * x`.
    pub fn matvec_transpose(&self, x: &Array1<f64>) -> Array1<f64> {
        debug_assert_eq!(x.len(), self.num_rows);
        let mut y = Array1::zeros(self.num_cols);
        for i in 0..self.num_rows {
            let xi = x[i];
            for (c, v) in self.row_entries(i) {
                y[c] += v * xi;
            }
        }
        y
    }

    /// Update `d := d - A * x` in place.
    pub fn apply_sub(&self, d: &mut Array1<f64>, x: &Array1<f64>) {
        debug_assert_eq!(d.len(), self.num_rows);
        debug_assert_eq!(x.len(), self.num_cols);
        for i in 0..self.num_rows {
            let ax: f64 = self.row_entries(i).map(|(c, v)| v * x[c]).sum();
            d[i] -= ax;
        }
    }

    /// Extract the inverse diagonal.
    ///
    /// Fails with [`GmgError::ZeroDiagonal`] on a missing or zero diagonal
    /// entry.
    pub fn diagonal_inverse(&self) -> Result<Array1<f64>> {
        let mut inv = Array1::zeros(self.num_rows);
        for i in 0..self.num_rows {
            let diag = self
                .row_entries(i)
                .find(|&(c, _)| c == i)
                .map(|(_, v)| v)
                .unwrap_or(0.0);
            if diag.abs() < f64::MIN_POSITIVE {
                return Err(GmgError::ZeroDiagonal { row: i });
            }
            inv[i] = 1.0 / diag;
        }
        Ok(inv)
    }

    /// Dense copy, used by direct factorizations on small base problems.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.num_rows, self.num_cols));
        for i in 0..self.num_rows {
            for (c, v) in self.row_entries(i) {
                dense[[i, c]] += v;
            }
        }
        dense
    }

}

/// Incremental row-by-row CSR builder.
///
/// Rows must be appended in order; entries within a row in column order.
#[derive(Debug)]
pub struct CsrBuilder {
    num_rows: usize,
    num_cols: usize,
    values: Vec<f64>,
    col_indices: Vec<usize>,
    row_ptrs: Vec<usize>,
    current_row: usize,
}

impl CsrBuilder {
    /// Create a new builder for a matrix of the given shape.
    pub fn new(num_rows: usize, num_cols: usize) -> Self {
        Self {
            num_rows,
            num_cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptrs: vec![0],
            current_row: 0,
        }
    }

    /// Append entries for the current row (in column order), advancing to the
    /// next row. Zero entries are dropped.
    pub fn add_row_entries(&mut self, entries: impl Iterator<Item = (usize, f64)>) {
        for (col, val) in entries {
            if val != 0.0 {
                self.values.push(val);
                self.col_indices.push(col);
            }
        }
        self.row_ptrs.push(self.values.len());
        self.current_row += 1;
    }

    /// Finish building; unfilled trailing rows stay empty.
    pub fn finish(mut self) -> CsrMatrix {
        while self.current_row < self.num_rows {
            self.row_ptrs.push(self.values.len());
            self.current_row += 1;
        }

        CsrMatrix {
            num_rows: self.num_rows,
            num_cols: self.num_cols,
            values: self.values,
            col_indices: self.col_indices,
            row_ptrs: self.row_ptrs,
        }
    }
}
