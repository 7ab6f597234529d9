#![forbid(unsafe_code)]

//! Dense feed-forward network reference: architecture planning, forward pass and a
//! single gradient-descent step.
//!
//! Weights use the kernel library's storage order. Layer `i` holds a matrix with
//! `width_i` rows and `width_{i-1}` columns, so a forward step computes
//! `prev · Wᵀ`. Buffer shapes are reported as the library reports them: `x` is the
//! width (columns) and `y` the height (rows).

use core::fmt;

use mgn_matrix::{Matrix, MatrixError, Transpose, hadamard, matmul, scalar_multiply, subtract};
use serde::Serialize;

pub const NETWORK_REASON_CODES: [&str; 9] = [
    "network_empty_architecture",
    "network_zero_input_width",
    "network_zero_batch_size",
    "network_zero_layer_width",
    "network_init_range_invalid",
    "network_learning_rate_invalid",
    "network_weight_contract_violation",
    "network_operand_shape_mismatch",
    "network_matrix_contract_violation",
];

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    EmptyArchitecture,
    ZeroInputWidth,
    ZeroBatchSize,
    ZeroLayerWidth {
        layer: usize,
    },
    InitRangeInvalid {
        layer: usize,
        min: f64,
        max: f64,
    },
    LearningRateInvalid(f64),
    WeightCountMismatch {
        expected: usize,
        actual: usize,
    },
    WeightShapeMismatch {
        layer: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    OperandShapeMismatch {
        operand: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    Matrix(MatrixError),
}

impl NetworkError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::EmptyArchitecture => "network_empty_architecture",
            Self::ZeroInputWidth => "network_zero_input_width",
            Self::ZeroBatchSize => "network_zero_batch_size",
            Self::ZeroLayerWidth { .. } => "network_zero_layer_width",
            Self::InitRangeInvalid { .. } => "network_init_range_invalid",
            Self::LearningRateInvalid(_) => "network_learning_rate_invalid",
            Self::WeightCountMismatch { .. } | Self::WeightShapeMismatch { .. } => {
                "network_weight_contract_violation"
            }
            Self::OperandShapeMismatch { .. } => "network_operand_shape_mismatch",
            Self::Matrix(_) => "network_matrix_contract_violation",
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyArchitecture => write!(f, "network needs at least one layer"),
            Self::ZeroInputWidth => write!(f, "input width must be > 0"),
            Self::ZeroBatchSize => write!(f, "batch size must be > 0"),
            Self::ZeroLayerWidth { layer } => write!(f, "layer {layer} width must be > 0"),
            Self::InitRangeInvalid { layer, min, max } => {
                write!(f, "layer {layer} init range [{min}, {max}] is not ordered and finite")
            }
            Self::LearningRateInvalid(rate) => {
                write!(f, "learning rate {rate} must be finite and > 0")
            }
            Self::WeightCountMismatch { expected, actual } => {
                write!(f, "expected {expected} weight matrices, got {actual}")
            }
            Self::WeightShapeMismatch {
                layer,
                expected,
                actual,
            } => write!(
                f,
                "layer {layer} weights must be {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            Self::OperandShapeMismatch {
                operand,
                expected,
                actual,
            } => write!(
                f,
                "{operand} must be {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            Self::Matrix(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<MatrixError> for NetworkError {
    fn from(err: MatrixError) -> Self {
        Self::Matrix(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Identity,
    Relu,
}

impl Activation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Relu => "relu",
        }
    }

    #[must_use]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Self::Identity => value,
            Self::Relu => value.max(0.0),
        }
    }

    /// Derivative expressed through the activation's output.
    #[must_use]
    pub fn derivative_at_output(self, output: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Relu => {
                if output > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Dense,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayerSpec {
    pub kind: LayerKind,
    pub activation: Activation,
    pub init_min: f64,
    pub init_max: f64,
    pub width: usize,
}

impl LayerSpec {
    #[must_use]
    pub const fn dense(activation: Activation, width: usize) -> Self {
        Self {
            kind: LayerKind::Dense,
            activation,
            init_min: 0.0,
            init_max: 0.0,
            width,
        }
    }

    #[must_use]
    pub const fn with_init_range(mut self, min: f64, max: f64) -> Self {
        self.init_min = min;
        self.init_max = max;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSpec {
    pub input_width: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub layers: Vec<LayerSpec>,
}

/// Buffer dimensions in the library's `(x, y)` naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferShape {
    pub x: usize,
    pub y: usize,
}

impl BufferShape {
    #[must_use]
    pub const fn size(self) -> usize {
        self.x * self.y
    }

    /// Same dimensions as `(rows, cols)`.
    #[must_use]
    pub const fn as_rows_cols(self) -> (usize, usize) {
        (self.y, self.x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayerPlan {
    pub spec: LayerSpec,
    pub input_width: usize,
    pub weights: BufferShape,
    pub output: BufferShape,
    pub delta: BufferShape,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkPlan {
    pub input_width: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub layers: Vec<LayerPlan>,
    pub scratch_capacity: usize,
}

/// Expands a declarative layer list into concrete buffer shapes.
pub fn build_plan(spec: &NetworkSpec) -> Result<NetworkPlan, NetworkError> {
    if spec.layers.is_empty() {
        return Err(NetworkError::EmptyArchitecture);
    }
    if spec.input_width == 0 {
        return Err(NetworkError::ZeroInputWidth);
    }
    if spec.batch_size == 0 {
        return Err(NetworkError::ZeroBatchSize);
    }
    if !spec.learning_rate.is_finite() || spec.learning_rate <= 0.0 {
        return Err(NetworkError::LearningRateInvalid(spec.learning_rate));
    }

    let mut layers = Vec::with_capacity(spec.layers.len());
    let mut prev_width = spec.input_width;
    let mut scratch_capacity = 0usize;
    for (idx, layer) in spec.layers.iter().enumerate() {
        if layer.width == 0 {
            return Err(NetworkError::ZeroLayerWidth { layer: idx });
        }
        if !layer.init_min.is_finite()
            || !layer.init_max.is_finite()
            || layer.init_min > layer.init_max
        {
            return Err(NetworkError::InitRangeInvalid {
                layer: idx,
                min: layer.init_min,
                max: layer.init_max,
            });
        }
        let buffer = BufferShape {
            x: layer.width,
            y: spec.batch_size,
        };
        layers.push(LayerPlan {
            spec: *layer,
            input_width: prev_width,
            weights: BufferShape {
                x: prev_width,
                y: layer.width,
            },
            output: buffer,
            delta: buffer,
        });
        let product = prev_width
            .checked_mul(layer.width)
            .ok_or(NetworkError::Matrix(MatrixError::Overflow))?;
        scratch_capacity = scratch_capacity.max(product);
        prev_width = layer.width;
    }

    Ok(NetworkPlan {
        input_width: spec.input_width,
        batch_size: spec.batch_size,
        learning_rate: spec.learning_rate,
        layers,
        scratch_capacity,
    })
}

impl NetworkPlan {
    #[must_use]
    pub fn output_width(&self) -> usize {
        self.layers.last().map_or(self.input_width, |l| l.spec.width)
    }

    /// Builds weight matrices from flat row-major literals, one slice per layer.
    pub fn weights_from_flat(&self, flat: &[&[f64]]) -> Result<Vec<Matrix>, NetworkError> {
        if flat.len() != self.layers.len() {
            return Err(NetworkError::WeightCountMismatch {
                expected: self.layers.len(),
                actual: flat.len(),
            });
        }
        self.layers
            .iter()
            .zip(flat)
            .map(|(layer, values)| {
                let (rows, cols) = layer.weights.as_rows_cols();
                Matrix::new(rows, cols, values.to_vec()).map_err(NetworkError::from)
            })
            .collect()
    }

    pub fn validate_weights(&self, weights: &[Matrix]) -> Result<(), NetworkError> {
        if weights.len() != self.layers.len() {
            return Err(NetworkError::WeightCountMismatch {
                expected: self.layers.len(),
                actual: weights.len(),
            });
        }
        for (idx, (layer, w)) in self.layers.iter().zip(weights).enumerate() {
            let expected = layer.weights.as_rows_cols();
            if w.shape() != expected {
                return Err(NetworkError::WeightShapeMismatch {
                    layer: idx,
                    expected,
                    actual: w.shape(),
                });
            }
        }
        Ok(())
    }

    fn validate_operand(
        &self,
        operand: &'static str,
        matrix: &Matrix,
        cols: usize,
    ) -> Result<(), NetworkError> {
        let expected = (self.batch_size, cols);
        if matrix.shape() != expected {
            return Err(NetworkError::OperandShapeMismatch {
                operand,
                expected,
                actual: matrix.shape(),
            });
        }
        Ok(())
    }
}

/// Per-layer outputs of one forward pass, first layer first.
pub fn forward(
    plan: &NetworkPlan,
    weights: &[Matrix],
    input: &Matrix,
) -> Result<Vec<Matrix>, NetworkError> {
    plan.validate_weights(weights)?;
    plan.validate_operand("input", input, plan.input_width)?;

    let mut outputs: Vec<Matrix> = Vec::with_capacity(plan.layers.len());
    for (layer, w) in plan.layers.iter().zip(weights) {
        let prev = outputs.last().unwrap_or(input);
        let linear = matmul(prev, w, Transpose::Right)?;
        let activation = layer.spec.activation;
        outputs.push(linear.map(|v| activation.apply(v)));
    }
    Ok(outputs)
}

/// Output of the last layer.
pub fn predict(
    plan: &NetworkPlan,
    weights: &[Matrix],
    input: &Matrix,
) -> Result<Matrix, NetworkError> {
    forward(plan, weights, input)?
        .pop()
        .ok_or(NetworkError::EmptyArchitecture)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitStep {
    pub outputs: Vec<Matrix>,
    pub deltas: Vec<Matrix>,
    pub weights: Vec<Matrix>,
}

/// One forward pass followed by one backpropagation update at the plan's learning rate.
///
/// The output error is `out - target` with no batch averaging. Every delta is
/// computed from the pre-update weights before any layer is updated.
pub fn fit_step(
    plan: &NetworkPlan,
    weights: &[Matrix],
    input: &Matrix,
    target: &Matrix,
) -> Result<FitStep, NetworkError> {
    if plan.layers.is_empty() {
        return Err(NetworkError::EmptyArchitecture);
    }
    plan.validate_operand("target", target, plan.output_width())?;
    let outputs = forward(plan, weights, input)?;

    let last = plan.layers.len() - 1;
    let mut deltas = vec![None; plan.layers.len()];
    let mut incoming = subtract(&outputs[last], target)?;
    for idx in (0..=last).rev() {
        let activation = plan.layers[idx].spec.activation;
        let slope = outputs[idx].map(|v| activation.derivative_at_output(v));
        let delta = hadamard(&incoming, &slope)?;
        if idx > 0 {
            incoming = matmul(&delta, &weights[idx], Transpose::None)?;
        }
        deltas[idx] = Some(delta);
    }
    let deltas: Vec<Matrix> = deltas.into_iter().flatten().collect();

    let mut updated = Vec::with_capacity(weights.len());
    for (idx, (w, delta)) in weights.iter().zip(&deltas).enumerate() {
        let prev = if idx == 0 { input } else { &outputs[idx - 1] };
        let gradient = matmul(delta, prev, Transpose::Left)?;
        let step = scalar_multiply(&gradient, plan.learning_rate);
        updated.push(subtract(w, &step)?);
    }

    Ok(FitStep {
        outputs,
        deltas,
        weights: updated,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        Activation, BufferShape, LayerSpec, NETWORK_REASON_CODES, NetworkError, NetworkSpec,
        build_plan, fit_step, forward, predict,
    };
    use mgn_matrix::Matrix;

    const LITERAL_W0: [f64; 9] = [0.1, 0.2, -0.1, -0.1, 0.1, 0.9, 0.1, 0.4, 0.1];
    const LITERAL_W1: [f64; 9] = [0.3, 1.1, -0.3, 0.1, 0.2, 0.0, 0.0, 1.3, 0.1];

    fn approx_equal(lhs: f64, rhs: f64, tol: f64) -> bool {
        (lhs - rhs).abs() <= tol
    }

    fn assert_values_close(actual: &[f64], expected: &[f64], tol: f64, context: &str) {
        assert_eq!(actual.len(), expected.len(), "{context}: length");
        for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!(
                approx_equal(*a, *e, tol),
                "{context}[{idx}]: actual={a} expected={e} tol={tol}"
            );
        }
    }

    fn two_layer(
        input_width: usize,
        batch_size: usize,
        first: (Activation, usize),
        second: (Activation, usize),
    ) -> NetworkSpec {
        NetworkSpec {
            input_width,
            batch_size,
            learning_rate: 0.01,
            layers: vec![
                LayerSpec::dense(first.0, first.1),
                LayerSpec::dense(second.0, second.1),
            ],
        }
    }

    #[test]
    fn reason_codes_cover_every_variant() {
        let errors = [
            NetworkError::EmptyArchitecture,
            NetworkError::ZeroInputWidth,
            NetworkError::ZeroBatchSize,
            NetworkError::ZeroLayerWidth { layer: 1 },
            NetworkError::InitRangeInvalid {
                layer: 0,
                min: 1.0,
                max: 0.0,
            },
            NetworkError::LearningRateInvalid(-1.0),
            NetworkError::WeightCountMismatch {
                expected: 2,
                actual: 1,
            },
            NetworkError::OperandShapeMismatch {
                operand: "input",
                expected: (1, 3),
                actual: (3, 1),
            },
            NetworkError::Matrix(mgn_matrix::MatrixError::Overflow),
        ];
        for err in errors {
            assert!(NETWORK_REASON_CODES.contains(&err.reason_code()), "{err}");
        }
    }

    #[test]
    fn plan_reports_library_buffer_shapes() {
        let spec = two_layer(5, 7, (Activation::Relu, 3), (Activation::Identity, 11));
        let plan = build_plan(&spec).expect("valid architecture");

        assert_eq!(plan.layers[0].weights, BufferShape { x: 5, y: 3 });
        assert_eq!(plan.layers[0].output, BufferShape { x: 3, y: 7 });
        assert_eq!(plan.layers[0].delta, BufferShape { x: 3, y: 7 });
        assert_eq!(plan.layers[1].weights, BufferShape { x: 3, y: 11 });
        assert_eq!(plan.layers[1].output, BufferShape { x: 11, y: 7 });
        assert_eq!(plan.layers[1].input_width, 3);
        assert_eq!(plan.scratch_capacity, 33);
        assert_eq!(plan.output_width(), 11);
    }

    #[test]
    fn scratch_capacity_includes_input_product() {
        let spec = two_layer(16, 1, (Activation::Relu, 9), (Activation::Identity, 2));
        let plan = build_plan(&spec).expect("valid architecture");
        assert_eq!(plan.scratch_capacity, 144);

        let mut deep = two_layer(2, 1, (Activation::Relu, 3), (Activation::Identity, 4));
        deep.layers.push(LayerSpec::dense(Activation::Relu, 30));
        let plan = build_plan(&deep).expect("valid architecture");
        assert_eq!(plan.scratch_capacity, 4 * 30);
    }

    #[test]
    fn plan_rejects_degenerate_architectures() {
        let mut spec = two_layer(3, 1, (Activation::Relu, 3), (Activation::Identity, 3));

        spec.layers.clear();
        let err = build_plan(&spec).expect_err("no layers");
        assert_eq!(err.reason_code(), "network_empty_architecture");

        let mut spec = two_layer(0, 1, (Activation::Relu, 3), (Activation::Identity, 3));
        let err = build_plan(&spec).expect_err("zero input");
        assert_eq!(err.reason_code(), "network_zero_input_width");

        spec.input_width = 3;
        spec.batch_size = 0;
        let err = build_plan(&spec).expect_err("zero batch");
        assert_eq!(err.reason_code(), "network_zero_batch_size");

        spec.batch_size = 1;
        spec.layers[1].width = 0;
        let err = build_plan(&spec).expect_err("zero width");
        assert_eq!(err, NetworkError::ZeroLayerWidth { layer: 1 });

        spec.layers[1].width = 2;
        spec.layers[0] = spec.layers[0].with_init_range(0.2, 0.1);
        let err = build_plan(&spec).expect_err("inverted init range");
        assert_eq!(err.reason_code(), "network_init_range_invalid");

        spec.layers[0] = spec.layers[0].with_init_range(0.1, 0.2);
        spec.learning_rate = 0.0;
        let err = build_plan(&spec).expect_err("zero learning rate");
        assert_eq!(err.reason_code(), "network_learning_rate_invalid");
    }

    #[test]
    fn plan_rejects_width_products_that_overflow() {
        let spec = two_layer(2, 1, (Activation::Relu, usize::MAX), (Activation::Identity, 1));
        let err = build_plan(&spec).expect_err("width product overflows");
        assert_eq!(err, NetworkError::Matrix(mgn_matrix::MatrixError::Overflow));
        assert_eq!(err.reason_code(), "network_matrix_contract_violation");
    }

    #[test]
    fn predict_identity_network_matches_literal() {
        let spec = two_layer(3, 1, (Activation::Identity, 3), (Activation::Identity, 3));
        let plan = build_plan(&spec).expect("valid architecture");
        let weights = plan
            .weights_from_flat(&[&LITERAL_W0, &LITERAL_W1])
            .expect("weights fit plan");
        let input = Matrix::from_rows(&[&[8.5, 0.65, 1.2]]).expect("input");

        let out = predict(&plan, &weights, &input).expect("forward");
        assert_eq!(out.shape(), (1, 3));
        assert_values_close(out.values(), &[0.2135, 0.145, 0.5065], 1e-4, "predict");
    }

    #[test]
    fn predict_relu_network_collapses_to_zero() {
        let spec = two_layer(1, 1, (Activation::Relu, 3), (Activation::Identity, 1));
        let plan = build_plan(&spec).expect("valid architecture");
        let weights = plan
            .weights_from_flat(&[&[0.1, -0.1, 0.1], &[0.3, 1.1, -0.3]])
            .expect("weights fit plan");
        let input = Matrix::from_rows(&[&[8.5]]).expect("input");

        let outputs = forward(&plan, &weights, &input).expect("forward");
        assert_values_close(outputs[0].values(), &[0.85, 0.0, 0.85], 1e-12, "hidden");
        assert_values_close(outputs[1].values(), &[0.0], 1e-4, "predict");
    }

    #[test]
    fn fit_step_reproduces_literal_weight_update() {
        let spec = two_layer(3, 4, (Activation::Relu, 3), (Activation::Identity, 3));
        let plan = build_plan(&spec).expect("valid architecture");
        let weights = plan
            .weights_from_flat(&[&LITERAL_W0, &LITERAL_W1])
            .expect("weights fit plan");
        let input = Matrix::from_rows(&[
            &[8.5, 0.65, 1.2],
            &[9.5, 0.8, 1.3],
            &[9.9, 0.8, 0.5],
            &[9.0, 0.9, 1.0],
        ])
        .expect("input");
        let target = Matrix::from_rows(&[
            &[0.1, 1.0, 0.1],
            &[0.0, 1.0, 0.0],
            &[0.0, 0.0, 0.1],
            &[0.1, 1.0, 0.2],
        ])
        .expect("target");

        let step = fit_step(&plan, &weights, &input, &target).expect("fit");
        assert_values_close(
            step.weights[0].values(),
            &[
                0.118847, 0.201724, -0.0977926, -0.190674, 0.0930147, 0.886871, 0.093963,
                0.399449, 0.0994944,
            ],
            1e-4,
            "layer0",
        );
        assert_values_close(
            step.weights[1].values(),
            &[
                0.29901, 1.09916, -0.301627, 0.123058, 0.205844, 0.0328309, -0.0096053,
                1.29716, 0.0863697,
            ],
            1e-4,
            "layer1",
        );
        assert_eq!(step.deltas.len(), 2);
        assert_eq!(step.deltas[0].shape(), (4, 3));
    }

    #[test]
    fn fit_step_leaves_weights_unchanged_at_target() {
        let spec = two_layer(2, 1, (Activation::Identity, 2), (Activation::Identity, 1));
        let plan = build_plan(&spec).expect("valid architecture");
        let weights = plan
            .weights_from_flat(&[&[1.0, 0.0, 0.0, 1.0], &[0.5, -0.5]])
            .expect("weights fit plan");
        let input = Matrix::from_rows(&[&[4.0, 2.0]]).expect("input");
        let target = Matrix::from_rows(&[&[1.0]]).expect("target");

        let step = fit_step(&plan, &weights, &input, &target).expect("fit");
        assert_eq!(step.weights, weights);
    }

    #[test]
    fn forward_rejects_mismatched_operands() {
        let spec = two_layer(3, 2, (Activation::Relu, 3), (Activation::Identity, 3));
        let plan = build_plan(&spec).expect("valid architecture");
        let weights = plan
            .weights_from_flat(&[&LITERAL_W0, &LITERAL_W1])
            .expect("weights fit plan");

        let single_row = Matrix::from_rows(&[&[1.0, 2.0, 3.0]]).expect("input");
        let err = forward(&plan, &weights, &single_row).expect_err("batch mismatch");
        assert_eq!(err.reason_code(), "network_operand_shape_mismatch");

        let err = forward(&plan, &weights[..1], &single_row).expect_err("missing layer");
        assert_eq!(err.reason_code(), "network_weight_contract_violation");

        let err = plan
            .weights_from_flat(&[&LITERAL_W0, &LITERAL_W1[..6]])
            .expect_err("short literal");
        assert_eq!(err.reason_code(), "network_matrix_contract_violation");

        let swapped = vec![weights[0].clone(), Matrix::zeros(1, 3).expect("dims")];
        let err = forward(
            &plan,
            &swapped,
            &Matrix::zeros(2, 3).expect("dims"),
        )
        .expect_err("wrong layer shape");
        assert!(matches!(err, NetworkError::WeightShapeMismatch { layer: 1, .. }));
    }
}
