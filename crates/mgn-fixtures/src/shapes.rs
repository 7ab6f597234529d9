#![forbid(unsafe_code)]

//! Seeded operand construction.
//!
//! Every draw goes through one [`DeterministicRng`], so the same configuration
//! always produces the same operands in the same order.

use crate::{GenerationError, GeneratorConfig};
use mgn_matrix::{Matrix, Transpose, plan_multiply};
use mgn_network::NetworkPlan;
use mgn_random::DeterministicRng;

/// `create` arguments in the library's `(x, y)` order that must be rejected.
pub const CREATE_BOUNDARY_DIMS: [(usize, usize); 3] = [(0, 0), (1, 0), (0, 1)];

const MAX_ROW_REDRAWS: usize = 64;

/// True when exactly one cell holds the row maximum.
#[must_use]
pub fn has_unique_max(row: &[f64]) -> bool {
    let Some(max) = row.iter().copied().reduce(f64::max) else {
        return false;
    };
    row.iter().filter(|&&v| v == max).count() == 1
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiplyOperands {
    pub lhs: Matrix,
    pub rhs: Matrix,
    pub transpose: Transpose,
    /// Expected `(rows, cols)` of the product.
    pub result_shape: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct ShapeGenerator {
    rng: DeterministicRng,
    min_dimension: usize,
    max_dimension: usize,
    value_range: (i64, i64),
    scalar_range: (i64, i64),
}

impl ShapeGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            rng: DeterministicRng::new(config.seed),
            min_dimension: config.min_dimension,
            max_dimension: config.max_dimension,
            value_range: config.value_range,
            scalar_range: config.scalar_range,
        }
    }

    /// Generator positioned `counter` draws into the configured seed's stream.
    pub fn resume(config: &GeneratorConfig, counter: u64) -> Self {
        Self {
            rng: DeterministicRng::from_state(config.seed, counter),
            ..Self::new(config)
        }
    }

    /// Seed and draw counter, enough to replay from this point.
    pub fn rng_state(&self) -> (u64, u64) {
        self.rng.state()
    }

    pub fn dimension(&mut self) -> Result<usize, GenerationError> {
        Ok(self
            .rng
            .uniform_usize(self.min_dimension, self.max_dimension)?)
    }

    /// A random `(rows, cols)` pair.
    pub fn shape(&mut self) -> Result<(usize, usize), GenerationError> {
        let cols = self.dimension()?;
        let rows = self.dimension()?;
        Ok((rows, cols))
    }

    pub fn integer_matrix(&mut self, rows: usize, cols: usize) -> Result<Matrix, GenerationError> {
        let (low, high) = self.value_range;
        let values = self.rng.fill_i64(rows * cols, low, high)?;
        Ok(Matrix::from_i64(rows, cols, &values)?)
    }

    pub fn uniform_matrix(
        &mut self,
        rows: usize,
        cols: usize,
        low: f64,
        high: f64,
    ) -> Result<Matrix, GenerationError> {
        let values = (0..rows * cols)
            .map(|_| self.rng.uniform_f64(low, high))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Matrix::new(rows, cols, values)?)
    }

    /// Two operands of one random shape.
    pub fn same_shape_pair(&mut self) -> Result<(Matrix, Matrix), GenerationError> {
        let (rows, cols) = self.shape()?;
        let lhs = self.integer_matrix(rows, cols)?;
        let rhs = self.integer_matrix(rows, cols)?;
        Ok((lhs, rhs))
    }

    /// Same-shape pair where each row of `rhs` is either a copy of the `lhs` row or
    /// a fresh draw, so row-argmax agreement counts land anywhere in `0..=rows`.
    ///
    /// Every row has a single maximum, so the count never depends on how ties break.
    pub fn argmax_pair(&mut self) -> Result<(Matrix, Matrix), GenerationError> {
        let (rows, cols) = self.shape()?;
        let mut lhs = Vec::with_capacity(rows * cols);
        let mut rhs = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            let row = self.unique_max_row(cols)?;
            if self.rng.next_u64() & 1 == 0 {
                rhs.extend_from_slice(&row);
            } else {
                rhs.extend(self.unique_max_row(cols)?);
            }
            lhs.extend(row);
        }
        Ok((Matrix::new(rows, cols, lhs)?, Matrix::new(rows, cols, rhs)?))
    }

    fn unique_max_row(&mut self, cols: usize) -> Result<Vec<f64>, GenerationError> {
        let (low, high) = self.value_range;
        for _ in 0..MAX_ROW_REDRAWS {
            let row: Vec<f64> = self
                .rng
                .fill_i64(cols, low, high)?
                .into_iter()
                .map(|v| v as f64)
                .collect();
            if has_unique_max(&row) {
                return Ok(row);
            }
        }
        Err(GenerationError::Config(
            "value_range too narrow to draw rows with a single maximum",
        ))
    }

    pub fn scalar(&mut self) -> Result<i64, GenerationError> {
        let (low, high) = self.scalar_range;
        Ok(self.rng.uniform_i64(low, high)?)
    }

    /// Valid `create` arguments in `(x, y)` order.
    pub fn create_dims(&mut self) -> Result<(usize, usize), GenerationError> {
        let x = self.dimension()?;
        let y = self.dimension()?;
        Ok((x, y))
    }

    /// Operands whose contracted dimensions agree under `transpose`.
    ///
    /// The left operand's shape is drawn freely. The right operand reuses the left's
    /// contracted dimension in its own contracted slot and draws the other one.
    pub fn multiply_operands(
        &mut self,
        transpose: Transpose,
    ) -> Result<MultiplyOperands, GenerationError> {
        let (lhs_rows, lhs_cols) = self.shape()?;
        let contracted = if transpose.left() { lhs_rows } else { lhs_cols };
        let free = self.dimension()?;
        let rhs_shape = if transpose.right() {
            (free, contracted)
        } else {
            (contracted, free)
        };

        let plan = plan_multiply((lhs_rows, lhs_cols), rhs_shape, transpose)?;
        let lhs = self.integer_matrix(lhs_rows, lhs_cols)?;
        let rhs = self.integer_matrix(rhs_shape.0, rhs_shape.1)?;
        Ok(MultiplyOperands {
            lhs,
            rhs,
            transpose,
            result_shape: (plan.rows, plan.cols),
        })
    }

    /// `count` layer widths, each within the dimension bounds.
    pub fn widths(&mut self, count: usize) -> Result<Vec<usize>, GenerationError> {
        (0..count).map(|_| self.dimension()).collect()
    }

    /// Weights for every layer of `plan`, uniform in each layer's init range.
    pub fn network_weights(&mut self, plan: &NetworkPlan) -> Result<Vec<Matrix>, GenerationError> {
        plan.layers
            .iter()
            .map(|layer| {
                let (rows, cols) = layer.weights.as_rows_cols();
                self.uniform_matrix(rows, cols, layer.spec.init_min, layer.spec.init_max)
            })
            .collect()
    }
}
