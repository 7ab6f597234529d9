#![forbid(unsafe_code)]

//! Fixture families in emission order.
//!
//! Every expected value is produced by `mgn-matrix` or `mgn-network`; the C text
//! only ever carries literals.

use crate::emitter::{CEmitter, FixtureEmitter, c_transpose, test_symbol};
use crate::shapes::{CREATE_BOUNDARY_DIMS, ShapeGenerator};
use crate::suite::TestSuite;
use crate::{GENERATION_SUITE, GenerationError, GenerationLogEntry, GeneratorConfig};
use mgn_matrix::{
    CellTransform, Matrix, MatrixError, Transpose, add, elementwise_square, hadamard, matmul,
    row_argmax_agreement, scalar_multiply, subtract, transform_hadamard,
};
use mgn_network::{Activation, LayerSpec, NetworkPlan, NetworkSpec, build_plan, fit_step, predict};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const CLIP_FUNCTION_NAME: &str = "clip_above_threshold";

const EXPECTS_REJECTION: &str = "fixture_expects_rejection";
const SHAPE_CONTRACT: &str = "fixture_shape_contract";
const GOLDEN_VALUE: &str = "fixture_golden_value";

const LITERAL_WEIGHTS: [[f64; 9]; 2] = [
    [0.1, 0.2, -0.1, -0.1, 0.1, 0.9, 0.1, 0.4, 0.1],
    [0.3, 1.1, -0.3, 0.1, 0.2, 0.0, 0.0, 1.3, 0.1],
];
const LITERAL_PREDICT_INPUT: [[f64; 3]; 1] = [[8.5, 0.65, 1.2]];
const RELU_PREDICT_WEIGHTS: [[f64; 3]; 2] = [[0.1, -0.1, 0.1], [0.3, 1.1, -0.3]];
const FIT_INPUT: [[f64; 3]; 4] = [
    [8.5, 0.65, 1.2],
    [9.5, 0.8, 1.3],
    [9.9, 0.8, 0.5],
    [9.0, 0.9, 1.0],
];
const FIT_TARGET: [[f64; 3]; 4] = [
    [0.1, 1.0, 0.1],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 0.1],
    [0.1, 1.0, 0.2],
];

/// Zeroes every value strictly above `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipAbove {
    pub threshold: f64,
}

impl ClipAbove {
    /// C definition of the same transform, for `mx_hadam_lambda`.
    #[must_use]
    pub fn c_declaration(&self, emitter: &CEmitter, name: &str) -> String {
        format!(
            "\nmx_type {name}(mx_type a) {{return (a > {}) ? 0 : a;}}\n",
            emitter.float_literal(self.threshold)
        )
    }
}

impl CellTransform for ClipAbove {
    fn apply(&self, value: f64) -> f64 {
        if value > self.threshold { 0.0 } else { value }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedSuite {
    pub suite: TestSuite<CEmitter>,
    pub log_entries: Vec<GenerationLogEntry>,
    pub operation_counts: BTreeMap<&'static str, usize>,
    /// Draws consumed from the seeded stream.
    pub rng_draws: u64,
}

/// Where an elementwise result lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultSlot {
    Fresh,
    InPlace,
}

struct FixtureBuilder<'a> {
    config: &'a GeneratorConfig,
    shapes: ShapeGenerator,
    suite: TestSuite<CEmitter>,
    log_entries: Vec<GenerationLogEntry>,
    operation_counts: BTreeMap<&'static str, usize>,
}

/// Builds every fixture family for an already validated `config`.
pub(crate) fn build_suite(config: &GeneratorConfig) -> Result<GeneratedSuite, GenerationError> {
    let mut builder = FixtureBuilder::new(config);
    builder.create_fixtures()?;
    builder.multiply_fixtures()?;
    builder.hadamard_fixtures()?;
    builder.subtract_fixtures()?;
    builder.scalar_multiply_fixtures()?;
    builder.transform_hadamard_fixtures()?;
    builder.square_fixtures()?;
    builder.add_to_first_fixtures()?;
    builder.argmax_compare_fixtures()?;
    builder.network_create_fixtures()?;
    builder.network_predict_fixtures()?;
    builder.network_fit_fixture()?;
    Ok(builder.finish())
}

impl<'a> FixtureBuilder<'a> {
    fn new(config: &'a GeneratorConfig) -> Self {
        let suite = TestSuite::new(CEmitter::new())
            .with_preamble(config.preamble.clone())
            .with_footer(config.footer.clone());
        Self {
            config,
            shapes: ShapeGenerator::new(config),
            suite,
            log_entries: Vec::new(),
            operation_counts: BTreeMap::new(),
        }
    }

    fn finish(self) -> GeneratedSuite {
        let (_, rng_draws) = self.shapes.rng_state();
        GeneratedSuite {
            suite: self.suite,
            log_entries: self.log_entries,
            operation_counts: self.operation_counts,
            rng_draws,
        }
    }

    /// Records a finished fixture. `replay` is the stream position before its first draw.
    fn push(
        &mut self,
        name: &str,
        operation: &'static str,
        reason_code: &'static str,
        replay: (u64, u64),
        shapes: Vec<(usize, usize)>,
        body: String,
    ) {
        let (seed, rng_counter) = replay;
        self.log_entries.push(GenerationLogEntry {
            suite: GENERATION_SUITE,
            fixture_id: test_symbol(self.suite.len(), name),
            test_name: name.to_string(),
            operation,
            seed,
            rng_counter,
            shapes,
            reason_code,
        });
        *self.operation_counts.entry(operation).or_insert(0) += 1;
        self.suite.add_test(name, body);
    }

    fn create_fixtures(&mut self) -> Result<(), GenerationError> {
        for (x, y) in CREATE_BOUNDARY_DIMS {
            let replay = self.shapes.rng_state();
            let mut body = format!("\tmx_t *a = mx_create({x}, {y});\n");
            body.push_str(&self.suite.emitter().assert("a != NULL"));
            self.push(
                "mx_create",
                "mx_create",
                EXPECTS_REJECTION,
                replay,
                vec![(y, x)],
                body,
            );
        }

        for _ in 0..self.config.repetitions.create {
            let replay = self.shapes.rng_state();
            let (x, y) = self.shapes.create_dims()?;
            let e = self.suite.emitter();
            let mut body = format!("\tmx_t *a = mx_create({x}, {y});\n");
            body.push_str(&e.assert("a == NULL"));
            body.push_str(&e.assert(&format!(
                "a->x != {x} || a->y != {y} || a->size != {}",
                x * y
            )));
            body.push_str("\tmx_destroy(a);\n");
            self.push("mx_create", "mx_create", SHAPE_CONTRACT, replay, vec![(y, x)], body);
        }
        Ok(())
    }

    fn multiply_fixtures(&mut self) -> Result<(), GenerationError> {
        for transpose in Transpose::ALL {
            let name = if matches!(transpose, Transpose::None) {
                "mx_mp"
            } else {
                "mx_mp (transposed)"
            };
            for _ in 0..self.config.repetitions.multiply_per_variant {
                let replay = self.shapes.rng_state();
                let ops = self.shapes.multiply_operands(transpose)?;
                let expected = matmul(&ops.lhs, &ops.rhs, transpose)?;
                let (rows, cols) = ops.result_shape;

                let e = self.suite.emitter();
                let mut body = e.matrix_literal("a", &ops.lhs);
                body.push_str(&e.matrix_literal("b", &ops.rhs));
                body.push_str(&e.empty_matrix_decl("res", rows, cols));
                body.push_str(&e.scalar_list_literal("exp", expected.values()));
                let _ = writeln!(body, "\tmx_mp(a, b, &res, {});\n", c_transpose(transpose));
                body.push_str(&e.matrix_compare("res", "exp", self.config.tolerance));

                let shapes = vec![ops.lhs.shape(), ops.rhs.shape(), expected.shape()];
                self.push(name, "mx_mp", GOLDEN_VALUE, replay, shapes, body);
            }
        }
        Ok(())
    }

    fn elementwise_fixture(
        &mut self,
        replay: (u64, u64),
        operation: &'static str,
        invocation: &str,
        (lhs, rhs): (&Matrix, Option<&Matrix>),
        expected: &Matrix,
        slot: ResultSlot,
    ) {
        let e = self.suite.emitter();
        let mut body = e.matrix_literal("a", lhs);
        if let Some(rhs) = rhs {
            body.push_str(&e.matrix_literal("b", rhs));
        }
        let actual = match slot {
            ResultSlot::Fresh => {
                let (rows, cols) = expected.shape();
                body.push_str(&e.empty_matrix_decl("res", rows, cols));
                "res"
            }
            ResultSlot::InPlace => "a",
        };
        body.push_str(&e.scalar_list_literal("exp", expected.values()));
        let _ = writeln!(body, "\t{invocation};");
        body.push_str(&e.matrix_compare(actual, "exp", self.config.tolerance));

        let mut shapes = vec![lhs.shape()];
        shapes.extend(rhs.map(Matrix::shape));
        self.push(operation, operation, GOLDEN_VALUE, replay, shapes, body);
    }

    fn hadamard_fixtures(&mut self) -> Result<(), GenerationError> {
        for _ in 0..self.config.repetitions.hadamard {
            let replay = self.shapes.rng_state();
            let (a, b) = self.shapes.same_shape_pair()?;
            let expected = hadamard(&a, &b)?;
            self.elementwise_fixture(
                replay,
                "mx_hadamard",
                "mx_hadamard(a, b, &res)",
                (&a, Some(&b)),
                &expected,
                ResultSlot::Fresh,
            );
        }
        Ok(())
    }

    fn subtract_fixtures(&mut self) -> Result<(), GenerationError> {
        for _ in 0..self.config.repetitions.subtract {
            let replay = self.shapes.rng_state();
            let (a, b) = self.shapes.same_shape_pair()?;
            let expected = subtract(&a, &b)?;
            self.elementwise_fixture(
                replay,
                "mx_sub",
                "mx_sub(a, b, &res)",
                (&a, Some(&b)),
                &expected,
                ResultSlot::Fresh,
            );
        }
        Ok(())
    }

    fn scalar_multiply_fixtures(&mut self) -> Result<(), GenerationError> {
        for _ in 0..self.config.repetitions.scalar_multiply {
            let replay = self.shapes.rng_state();
            let (rows, cols) = self.shapes.shape()?;
            let a = self.shapes.integer_matrix(rows, cols)?;
            let factor = self.shapes.scalar()?;
            let expected = scalar_multiply(&a, factor as f64);
            let invocation = format!("mx_mp_num(&a, {factor})");
            self.elementwise_fixture(
                replay,
                "mx_mp_num",
                &invocation,
                (&a, None),
                &expected,
                ResultSlot::InPlace,
            );
        }
        Ok(())
    }

    fn transform_hadamard_fixtures(&mut self) -> Result<(), GenerationError> {
        if self.config.repetitions.transform_hadamard == 0 {
            return Ok(());
        }
        let clip = ClipAbove {
            threshold: self.config.clip_threshold,
        };
        let declaration = clip.c_declaration(self.suite.emitter(), CLIP_FUNCTION_NAME);
        self.suite.raw_append(declaration);

        let invocation = format!("mx_hadam_lambda(&a, b, &{CLIP_FUNCTION_NAME})");
        for _ in 0..self.config.repetitions.transform_hadamard {
            let replay = self.shapes.rng_state();
            let (a, b) = self.shapes.same_shape_pair()?;
            let expected = transform_hadamard(&a, &b, &clip)?;
            self.elementwise_fixture(
                replay,
                "mx_hadam_lambda",
                &invocation,
                (&a, Some(&b)),
                &expected,
                ResultSlot::InPlace,
            );
        }
        Ok(())
    }

    fn square_fixtures(&mut self) -> Result<(), GenerationError> {
        for _ in 0..self.config.repetitions.elementwise_square {
            let replay = self.shapes.rng_state();
            let (rows, cols) = self.shapes.shape()?;
            let a = self.shapes.integer_matrix(rows, cols)?;
            let expected = elementwise_square(&a);
            self.elementwise_fixture(
                replay,
                "mx_elem_power_by_two",
                "mx_elem_power_by_two(&a)",
                (&a, None),
                &expected,
                ResultSlot::InPlace,
            );
        }
        Ok(())
    }

    fn add_to_first_fixtures(&mut self) -> Result<(), GenerationError> {
        for _ in 0..self.config.repetitions.add_to_first {
            let replay = self.shapes.rng_state();
            let (a, b) = self.shapes.same_shape_pair()?;
            let expected = add(&a, &b)?;
            self.elementwise_fixture(
                replay,
                "mx_add_to_first",
                "mx_add_to_first(&a, &b)",
                (&a, Some(&b)),
                &expected,
                ResultSlot::InPlace,
            );
        }
        Ok(())
    }

    fn argmax_compare_fixtures(&mut self) -> Result<(), GenerationError> {
        for _ in 0..self.config.repetitions.argmax_compare {
            let replay = self.shapes.rng_state();
            let (a, b) = self.shapes.argmax_pair()?;
            let agreed = row_argmax_agreement(&a, &b)?;

            let e = self.suite.emitter();
            let mut body = e.matrix_literal("a", &a);
            body.push_str(&e.matrix_literal("b", &b));
            body.push_str("\tint agreed = mx_hor_max_idx_cmp(a, b);\n");
            body.push_str(&e.assert(&format!("agreed != {agreed}")));
            self.push(
                "mx_hor_max_idx_cmp",
                "mx_hor_max_idx_cmp",
                GOLDEN_VALUE,
                replay,
                vec![a.shape(), b.shape()],
                body,
            );
        }
        Ok(())
    }

    fn network_spec(
        &self,
        input_width: usize,
        batch_size: usize,
        layers: &[(Activation, usize)],
    ) -> NetworkSpec {
        let (min, max) = self.config.network_init_range;
        NetworkSpec {
            input_width,
            batch_size,
            learning_rate: self.config.learning_rate,
            layers: layers
                .iter()
                .map(|&(activation, width)| {
                    LayerSpec::dense(activation, width).with_init_range(min, max)
                })
                .collect(),
        }
    }

    fn network_create_fixtures(&mut self) -> Result<(), GenerationError> {
        for _ in 0..self.config.repetitions.network_create {
            let replay = self.shapes.rng_state();
            let widths = self.shapes.widths(4)?;
            let spec = self.network_spec(
                widths[0],
                widths[1],
                &[(Activation::Relu, widths[2]), (Activation::Identity, widths[3])],
            );
            let plan = build_plan(&spec)?;

            let e = self.suite.emitter();
            let mut body = e.network_decl("nn", &spec);
            body.push_str("\tdense_data_t *ptr;\n");
            for (idx, layer) in plan.layers.iter().enumerate() {
                body.push_str(&e.assert(&format!(
                    "nn->layers[{idx}].delta == NULL || nn->layers[{idx}].out == NULL"
                )));
                for (buffer, shape) in [("delta", layer.delta), ("out", layer.output)] {
                    body.push_str(&e.assert(&format!(
                        "nn->layers[{idx}].{buffer}->x != {} || nn->layers[{idx}].{buffer}->y != {}",
                        shape.x, shape.y
                    )));
                }
                let _ = writeln!(body, "\n\tptr = (dense_data_t *) nn->layers[{idx}].data;");
                body.push_str(&e.assert(&format!(
                    "ptr->val->x != {} || ptr->val->y != {}",
                    layer.weights.x, layer.weights.y
                )));
            }
            body.push_str(&e.assert(&format!("nn->temp->size != {}", plan.scratch_capacity)));
            body.push_str("\tnn_destroy(nn);\n");

            let shapes = plan
                .layers
                .iter()
                .map(|layer| layer.weights.as_rows_cols())
                .collect();
            self.push("nn_create", "nn_create", SHAPE_CONTRACT, replay, shapes, body);
        }
        Ok(())
    }

    fn predict_fixture(
        &mut self,
        replay: (u64, u64),
        spec: &NetworkSpec,
        plan: &NetworkPlan,
        weights: &[Matrix],
        input: &Matrix,
    ) -> Result<(), GenerationError> {
        let expected = predict(plan, weights, input)?;
        let last = plan.layers.len().saturating_sub(1);

        let e = self.suite.emitter();
        let mut body = e.network_decl("n", spec);
        body.push_str(&e.matrix_literal("input", input));
        body.push_str(&load_weights(e, "n", weights));
        body.push_str("\tnn_predict(n, &input);\n");
        body.push_str(&e.scalar_list_literal("expected", expected.values()));
        body.push_str(&e.matrix_compare(
            &format!("(*n->layers[{last}].out)"),
            "expected",
            self.config.tolerance,
        ));
        body.push_str("\tnn_destroy(n);\n");

        let mut shapes = vec![input.shape()];
        shapes.extend(weights.iter().map(Matrix::shape));
        self.push("nn_predict", "nn_predict", GOLDEN_VALUE, replay, shapes, body);
        Ok(())
    }

    fn network_predict_fixtures(&mut self) -> Result<(), GenerationError> {
        let replay = self.shapes.rng_state();
        let spec = self.network_spec(3, 1, &[(Activation::Identity, 3), (Activation::Identity, 3)]);
        let plan = build_plan(&spec)?;
        let weights = plan.weights_from_flat(&[&LITERAL_WEIGHTS[0], &LITERAL_WEIGHTS[1]])?;
        let input = literal_matrix(&LITERAL_PREDICT_INPUT)?;
        self.predict_fixture(replay, &spec, &plan, &weights, &input)?;

        let spec = self.network_spec(1, 1, &[(Activation::Relu, 3), (Activation::Identity, 1)]);
        let plan = build_plan(&spec)?;
        let weights =
            plan.weights_from_flat(&[&RELU_PREDICT_WEIGHTS[0], &RELU_PREDICT_WEIGHTS[1]])?;
        let input = literal_matrix(&[[8.5]])?;
        self.predict_fixture(replay, &spec, &plan, &weights, &input)?;

        let (low, high) = self.config.network_input_range;
        for _ in 0..self.config.repetitions.network_predict {
            let replay = self.shapes.rng_state();
            let widths = self.shapes.widths(4)?;
            let spec = self.network_spec(
                widths[0],
                widths[1],
                &[(Activation::Relu, widths[2]), (Activation::Identity, widths[3])],
            );
            let plan = build_plan(&spec)?;
            let weights = self.shapes.network_weights(&plan)?;
            let input = self
                .shapes
                .uniform_matrix(plan.batch_size, plan.input_width, low, high)?;
            self.predict_fixture(replay, &spec, &plan, &weights, &input)?;
        }
        Ok(())
    }

    fn network_fit_fixture(&mut self) -> Result<(), GenerationError> {
        let replay = self.shapes.rng_state();
        let spec = self.network_spec(3, 4, &[(Activation::Relu, 3), (Activation::Identity, 3)]);
        let plan = build_plan(&spec)?;
        let weights = plan.weights_from_flat(&[&LITERAL_WEIGHTS[0], &LITERAL_WEIGHTS[1]])?;
        let input = literal_matrix(&FIT_INPUT)?;
        let target = literal_matrix(&FIT_TARGET)?;
        let step = fit_step(&plan, &weights, &input, &target)?;

        let e = self.suite.emitter();
        let mut body = e.network_decl("nn", &spec);
        body.push_str(&e.matrix_literal("input", &input));
        body.push_str(&load_weights(e, "nn", &weights));
        body.push_str(&e.matrix_literal("target", &target));
        body.push_str("\tnn_fit(nn, &input, &target);\n");
        for (idx, updated) in step.weights.iter().enumerate().rev() {
            let name = format!("exp_val{idx}");
            body.push_str(&e.scalar_list_literal(&name, updated.values()));
            let _ = writeln!(body, "\tptr = (dense_data_t *) nn->layers[{idx}].data;");
            body.push_str(&e.matrix_compare("(*ptr->val)", &name, self.config.tolerance));
        }
        body.push_str("\tnn_destroy(nn);\n");

        let mut shapes = vec![input.shape(), target.shape()];
        shapes.extend(weights.iter().map(Matrix::shape));
        self.push("nn_fit", "nn_fit", GOLDEN_VALUE, replay, shapes, body);
        Ok(())
    }
}

/// Declares `val{i}` for every layer and copies it over the layer's weights.
fn load_weights(emitter: &CEmitter, handle: &str, weights: &[Matrix]) -> String {
    let mut body = String::from("\tdense_data_t *ptr;\n");
    for (idx, w) in weights.iter().enumerate() {
        let name = format!("val{idx}");
        body.push_str(&emitter.scalar_list_literal(&name, w.values()));
        let _ = writeln!(body, "\tptr = (dense_data_t *) {handle}->layers[{idx}].data;");
        body.push_str(&emitter.array_copy(&name, "ptr->val->arr", "ptr->val->size"));
    }
    body
}

fn literal_matrix<const N: usize>(rows: &[[f64; N]]) -> Result<Matrix, MatrixError> {
    let rows: Vec<&[f64]> = rows.iter().map(|row| row.as_slice()).collect();
    Matrix::from_rows(&rows)
}
