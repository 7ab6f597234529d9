#![forbid(unsafe_code)]

//! Row-major matrices and the matrix half of the reference evaluator.
//!
//! Every routine here is a plain restatement of the textbook definition. None of
//! them mirrors the stride tricks of the kernel library whose output they are
//! used to check.

use core::fmt;

pub const MATRIX_REASON_CODES: [&str; 5] = [
    "matrix_zero_dimension",
    "matrix_invalid_input_length",
    "matrix_size_overflow",
    "matrix_contraction_mismatch",
    "matrix_elementwise_shape_mismatch",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    ZeroDimension {
        rows: usize,
        cols: usize,
    },
    InvalidInputLength {
        expected: usize,
        actual: usize,
    },
    Overflow,
    ContractionMismatch {
        lhs: (usize, usize),
        rhs: (usize, usize),
        transpose: Transpose,
    },
    ElementwiseShapeMismatch {
        lhs: (usize, usize),
        rhs: (usize, usize),
    },
}

impl MatrixError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ZeroDimension { .. } => "matrix_zero_dimension",
            Self::InvalidInputLength { .. } => "matrix_invalid_input_length",
            Self::Overflow => "matrix_size_overflow",
            Self::ContractionMismatch { .. } => "matrix_contraction_mismatch",
            Self::ElementwiseShapeMismatch { .. } => "matrix_elementwise_shape_mismatch",
        }
    }
}

impl fmt::Display for MatrixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDimension { rows, cols } => {
                write!(f, "matrix dimensions must be non-zero, got {rows}x{cols}")
            }
            Self::InvalidInputLength { expected, actual } => {
                write!(f, "expected {expected} values, got {actual}")
            }
            Self::Overflow => write!(f, "matrix size arithmetic overflow"),
            Self::ContractionMismatch {
                lhs,
                rhs,
                transpose,
            } => write!(
                f,
                "cannot contract {}x{} with {}x{} under transpose={}",
                lhs.0,
                lhs.1,
                rhs.0,
                rhs.1,
                transpose.as_str()
            ),
            Self::ElementwiseShapeMismatch { lhs, rhs } => write!(
                f,
                "elementwise operands differ: {}x{} vs {}x{}",
                lhs.0, lhs.1, rhs.0, rhs.1
            ),
        }
    }
}

impl std::error::Error for MatrixError {}

/// Which operands of a product are read transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transpose {
    None,
    Left,
    Right,
    Both,
}

impl Transpose {
    pub const ALL: [Self; 4] = [Self::None, Self::Left, Self::Right, Self::Both];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Left => "left",
            Self::Right => "right",
            Self::Both => "both",
        }
    }

    #[must_use]
    pub const fn left(self) -> bool {
        matches!(self, Self::Left | Self::Both)
    }

    #[must_use]
    pub const fn right(self) -> bool {
        matches!(self, Self::Right | Self::Both)
    }
}

/// Output shape and contraction length of `op(lhs) · op(rhs)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplyPlan {
    pub rows: usize,
    pub cols: usize,
    pub inner: usize,
}

/// `lhs` and `rhs` are `(rows, cols)` of the stored, untransposed operands.
pub fn plan_multiply(
    lhs: (usize, usize),
    rhs: (usize, usize),
    transpose: Transpose,
) -> Result<MultiplyPlan, MatrixError> {
    let (lhs_outer, lhs_inner) = if transpose.left() {
        (lhs.1, lhs.0)
    } else {
        lhs
    };
    let (rhs_inner, rhs_outer) = if transpose.right() {
        (rhs.1, rhs.0)
    } else {
        rhs
    };
    if lhs_inner != rhs_inner {
        return Err(MatrixError::ContractionMismatch {
            lhs,
            rhs,
            transpose,
        });
    }
    Ok(MultiplyPlan {
        rows: lhs_outer,
        cols: rhs_outer,
        inner: lhs_inner,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, values: Vec<f64>) -> Result<Self, MatrixError> {
        let expected = checked_cell_count(rows, cols)?;
        if values.len() != expected {
            return Err(MatrixError::InvalidInputLength {
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { rows, cols, values })
    }

    pub fn zeros(rows: usize, cols: usize) -> Result<Self, MatrixError> {
        let count = checked_cell_count(rows, cols)?;
        Ok(Self {
            rows,
            cols,
            values: vec![0.0; count],
        })
    }

    pub fn from_rows(rows: &[&[f64]]) -> Result<Self, MatrixError> {
        let cols = rows.first().map_or(0, |row| row.len());
        let mut values = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(MatrixError::InvalidInputLength {
                    expected: cols,
                    actual: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Self::new(rows.len(), cols, values)
    }

    pub fn from_i64(rows: usize, cols: usize, values: &[i64]) -> Result<Self, MatrixError> {
        Self::new(rows, cols, values.iter().map(|&v| v as f64).collect())
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Panics when out of bounds, like slice indexing.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(row < self.rows && col < self.cols, "index ({row}, {col}) out of bounds");
        self.values[row * self.cols + col]
    }

    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    #[must_use]
    pub fn transposed(&self) -> Self {
        let mut values = Vec::with_capacity(self.values.len());
        for col in 0..self.cols {
            for row in 0..self.rows {
                values.push(self.values[row * self.cols + col]);
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            values,
        }
    }

    #[must_use]
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }
}

fn checked_cell_count(rows: usize, cols: usize) -> Result<usize, MatrixError> {
    if rows == 0 || cols == 0 {
        return Err(MatrixError::ZeroDimension { rows, cols });
    }
    rows.checked_mul(cols).ok_or(MatrixError::Overflow)
}

/// A unary function applied cell by cell, supplied by the caller.
pub trait CellTransform {
    fn apply(&self, value: f64) -> f64;
}

impl<F> CellTransform for F
where
    F: Fn(f64) -> f64,
{
    fn apply(&self, value: f64) -> f64 {
        self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementwiseOp {
    Add,
    Sub,
    Mul,
}

impl ElementwiseOp {
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
        }
    }
}

/// Elementwise binary op over equal shapes. Never broadcasts.
pub fn elementwise(lhs: &Matrix, rhs: &Matrix, op: ElementwiseOp) -> Result<Matrix, MatrixError> {
    ensure_same_shape(lhs, rhs)?;
    let values = lhs
        .values
        .iter()
        .zip(&rhs.values)
        .map(|(&l, &r)| op.apply(l, r))
        .collect();
    Ok(Matrix {
        rows: lhs.rows,
        cols: lhs.cols,
        values,
    })
}

fn ensure_same_shape(lhs: &Matrix, rhs: &Matrix) -> Result<(), MatrixError> {
    if lhs.shape() != rhs.shape() {
        return Err(MatrixError::ElementwiseShapeMismatch {
            lhs: lhs.shape(),
            rhs: rhs.shape(),
        });
    }
    Ok(())
}

/// `op(lhs) · op(rhs)` where `op` transposes according to `transpose`.
pub fn matmul(lhs: &Matrix, rhs: &Matrix, transpose: Transpose) -> Result<Matrix, MatrixError> {
    let plan = plan_multiply(lhs.shape(), rhs.shape(), transpose)?;
    let lhs_at = |i: usize, k: usize| {
        if transpose.left() {
            lhs.get(k, i)
        } else {
            lhs.get(i, k)
        }
    };
    let rhs_at = |k: usize, j: usize| {
        if transpose.right() {
            rhs.get(j, k)
        } else {
            rhs.get(k, j)
        }
    };

    let mut values = Vec::with_capacity(plan.rows * plan.cols);
    for i in 0..plan.rows {
        for j in 0..plan.cols {
            let dot: f64 = (0..plan.inner).map(|k| lhs_at(i, k) * rhs_at(k, j)).sum();
            values.push(dot);
        }
    }
    Matrix::new(plan.rows, plan.cols, values)
}

pub fn hadamard(lhs: &Matrix, rhs: &Matrix) -> Result<Matrix, MatrixError> {
    elementwise(lhs, rhs, ElementwiseOp::Mul)
}

pub fn subtract(lhs: &Matrix, rhs: &Matrix) -> Result<Matrix, MatrixError> {
    elementwise(lhs, rhs, ElementwiseOp::Sub)
}

pub fn add(lhs: &Matrix, rhs: &Matrix) -> Result<Matrix, MatrixError> {
    elementwise(lhs, rhs, ElementwiseOp::Add)
}

#[must_use]
pub fn scalar_multiply(matrix: &Matrix, factor: f64) -> Matrix {
    matrix.map(|v| v * factor)
}

#[must_use]
pub fn elementwise_square(matrix: &Matrix) -> Matrix {
    matrix.map(|v| v * v)
}

/// `lhs[i] * transform(rhs[i])`.
pub fn transform_hadamard(
    lhs: &Matrix,
    rhs: &Matrix,
    transform: &dyn CellTransform,
) -> Result<Matrix, MatrixError> {
    ensure_same_shape(lhs, rhs)?;
    let values = lhs
        .values
        .iter()
        .zip(&rhs.values)
        .map(|(&l, &r)| l * transform.apply(r))
        .collect();
    Ok(Matrix {
        rows: lhs.rows,
        cols: lhs.cols,
        values,
    })
}

/// Index of the first maximum in each row.
#[must_use]
pub fn row_argmax(matrix: &Matrix) -> Vec<usize> {
    (0..matrix.rows)
        .map(|r| {
            let row = matrix.row(r);
            let mut best = 0;
            for (idx, &value) in row.iter().enumerate().skip(1) {
                if value > row[best] {
                    best = idx;
                }
            }
            best
        })
        .collect()
}

/// Number of rows whose first-maximum index agrees between the operands.
pub fn row_argmax_agreement(lhs: &Matrix, rhs: &Matrix) -> Result<usize, MatrixError> {
    ensure_same_shape(lhs, rhs)?;
    Ok(row_argmax(lhs)
        .into_iter()
        .zip(row_argmax(rhs))
        .filter(|(l, r)| l == r)
        .count())
}

#[cfg(test)]
mod tests {
    use super::{
        ElementwiseOp, MATRIX_REASON_CODES, Matrix, MatrixError, Transpose, add,
        elementwise_square, hadamard, matmul, plan_multiply, row_argmax, row_argmax_agreement,
        scalar_multiply, subtract, transform_hadamard,
    };

    fn m(rows: &[&[f64]]) -> Matrix {
        Matrix::from_rows(rows).expect("valid literal")
    }

    #[test]
    fn reason_codes_cover_every_variant() {
        let errors = [
            MatrixError::ZeroDimension { rows: 0, cols: 1 },
            MatrixError::InvalidInputLength {
                expected: 1,
                actual: 2,
            },
            MatrixError::Overflow,
            MatrixError::ContractionMismatch {
                lhs: (1, 2),
                rhs: (3, 4),
                transpose: Transpose::None,
            },
            MatrixError::ElementwiseShapeMismatch {
                lhs: (1, 2),
                rhs: (2, 1),
            },
        ];
        for err in errors {
            assert!(MATRIX_REASON_CODES.contains(&err.reason_code()), "{err}");
        }
    }

    #[test]
    fn constructor_enforces_cell_count_and_non_zero_dims() {
        let err = Matrix::new(2, 3, vec![0.0; 5]).expect_err("short buffer");
        assert_eq!(err.reason_code(), "matrix_invalid_input_length");
        let err = Matrix::zeros(0, 3).expect_err("zero rows");
        assert_eq!(err.reason_code(), "matrix_zero_dimension");
        let err = Matrix::zeros(usize::MAX, 2).expect_err("overflow");
        assert_eq!(err, MatrixError::Overflow);

        let ok = Matrix::zeros(3, 4).expect("valid dims");
        assert_eq!(ok.shape(), (3, 4));
        assert_eq!(ok.len(), 12);
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = Matrix::from_rows(&[&[1.0, 2.0], &[3.0]]).expect_err("ragged rows");
        assert_eq!(err.reason_code(), "matrix_invalid_input_length");
    }

    #[test]
    fn plan_multiply_selects_contracted_dimensions() {
        let plain = plan_multiply((2, 3), (3, 5), Transpose::None).expect("plain");
        assert_eq!((plain.rows, plain.cols, plain.inner), (2, 5, 3));
        let left = plan_multiply((3, 2), (3, 5), Transpose::Left).expect("left");
        assert_eq!((left.rows, left.cols, left.inner), (2, 5, 3));
        let right = plan_multiply((2, 3), (5, 3), Transpose::Right).expect("right");
        assert_eq!((right.rows, right.cols, right.inner), (2, 5, 3));
        let both = plan_multiply((3, 2), (5, 3), Transpose::Both).expect("both");
        assert_eq!((both.rows, both.cols, both.inner), (2, 5, 3));

        let err = plan_multiply((2, 3), (2, 3), Transpose::None).expect_err("mismatch");
        assert_eq!(err.reason_code(), "matrix_contraction_mismatch");
    }

    #[test]
    fn matmul_matches_hand_computed_product() {
        let a = m(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let b = m(&[&[7.0, 8.0], &[9.0, 10.0], &[11.0, 12.0]]);
        let c = matmul(&a, &b, Transpose::None).expect("compatible");
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.values(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn transposed_variants_agree_with_explicit_transposition() {
        let a = m(&[&[1.0, -2.0], &[3.0, 4.0], &[-5.0, 6.0]]);
        let b = m(&[&[2.0, 0.0, 1.0], &[-1.0, 3.0, 2.0]]);
        let expected = matmul(&a, &b, Transpose::None).expect("plain");

        let left = matmul(&a.transposed(), &b, Transpose::Left).expect("left");
        let right = matmul(&a, &b.transposed(), Transpose::Right).expect("right");
        let both = matmul(&a.transposed(), &b.transposed(), Transpose::Both).expect("both");
        assert_eq!(left, expected);
        assert_eq!(right, expected);
        assert_eq!(both, expected);
    }

    #[test]
    fn matmul_fails_loudly_on_incompatible_shapes() {
        let a = Matrix::zeros(2, 3).expect("dims");
        let b = Matrix::zeros(2, 3).expect("dims");
        for transpose in [Transpose::None, Transpose::Both] {
            let err = matmul(&a, &b, transpose).expect_err("no broadcasting");
            assert_eq!(err.reason_code(), "matrix_contraction_mismatch");
        }
    }

    #[test]
    fn elementwise_ops_follow_cell_definitions() {
        let a = m(&[&[1.0, -2.0], &[0.0, 7.5]]);
        let b = m(&[&[3.0, 4.0], &[-1.0, 2.0]]);
        assert_eq!(hadamard(&a, &b).expect("same").values(), &[3.0, -8.0, -0.0, 15.0]);
        assert_eq!(subtract(&a, &b).expect("same").values(), &[-2.0, -6.0, 1.0, 5.5]);
        assert_eq!(add(&a, &b).expect("same").values(), &[4.0, 2.0, -1.0, 9.5]);
        assert_eq!(scalar_multiply(&a, -2.0).values(), &[-2.0, 4.0, -0.0, -15.0]);
        assert_eq!(elementwise_square(&a).values(), &[1.0, 4.0, 0.0, 56.25]);
        assert_eq!(ElementwiseOp::Sub.apply(1.0, 4.0), -3.0);
    }

    #[test]
    fn elementwise_ops_reject_mismatched_shapes() {
        let a = Matrix::zeros(2, 3).expect("dims");
        let b = Matrix::zeros(3, 2).expect("dims");
        for result in [hadamard(&a, &b), subtract(&a, &b), add(&a, &b)] {
            let err = result.expect_err("shape mismatch");
            assert_eq!(err.reason_code(), "matrix_elementwise_shape_mismatch");
        }
    }

    #[test]
    fn transform_hadamard_uses_caller_transform() {
        let a = m(&[&[2.0, 3.0, -1.0, 10.0]]);
        let b = m(&[&[5.0, 4.0, -7.0, 4.5]]);
        let clip = |v: f64| if v > 4.0 { 0.0 } else { v };
        let out = transform_hadamard(&a, &b, &clip).expect("same shape");
        assert_eq!(out.values(), &[0.0, 12.0, 7.0, 0.0]);

        let identity = |v: f64| v;
        let plain = transform_hadamard(&a, &b, &identity).expect("same shape");
        assert_eq!(plain, hadamard(&a, &b).expect("same shape"));
    }

    #[test]
    fn row_argmax_prefers_first_maximum() {
        let a = m(&[&[1.0, 5.0, 5.0], &[-3.0, -3.0, -4.0], &[0.0, 0.0, 9.0]]);
        assert_eq!(row_argmax(&a), vec![1, 0, 2]);

        let b = m(&[&[7.0, 0.0, 0.0], &[-1.0, -2.0, -3.0], &[1.0, 2.0, 3.0]]);
        assert_eq!(row_argmax_agreement(&a, &b).expect("same shape"), 2);
        assert_eq!(row_argmax_agreement(&a, &a).expect("same shape"), 3);
    }

    #[test]
    fn transposed_swaps_dimensions_and_cells() {
        let a = m(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let t = a.transposed();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.values(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.get(2, 1), 6.0);
        assert_eq!(t.transposed(), a);
    }
}
