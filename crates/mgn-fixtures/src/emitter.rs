#![forbid(unsafe_code)]

//! Source-text rendering for generated fixtures.
//!
//! Emitters only format values they are handed. They never compute anything, so a
//! rendered file is a pure function of the reference results and the call order.

use mgn_matrix::{Matrix, Transpose};
use mgn_network::{Activation, LayerKind, NetworkSpec};
use std::fmt::Write as _;

const VALUES_PER_LINE: usize = 8;

/// One accumulated test block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub body: String,
}

pub trait FixtureEmitter {
    /// Declares `name` as a matrix initialized from `matrix`.
    fn matrix_literal(&self, name: &str, matrix: &Matrix) -> String;

    /// Declares `name` as a flat array of values.
    fn scalar_list_literal(&self, name: &str, values: &[f64]) -> String;

    /// Declares `name` as a zero-filled `rows x cols` matrix.
    fn empty_matrix_decl(&self, name: &str, rows: usize, cols: usize) -> String;

    /// Fails the enclosing test when `failure_condition` evaluates true.
    fn assert(&self, failure_condition: &str) -> String;

    fn array_copy(&self, src: &str, dst: &str, len: &str) -> String;

    /// Fails when any cell of `actual` differs from `expected` by more than `epsilon`.
    fn matrix_compare(&self, actual: &str, expected: &str, epsilon: f64) -> String;

    /// Declares a layer initializer and constructs the network `handle` from it.
    fn network_decl(&self, handle: &str, spec: &NetworkSpec) -> String;

    /// Wraps a body into a standalone test unit. `ordinal` keeps symbols unique when
    /// several blocks share a name.
    fn test_block(&self, ordinal: usize, case: &TestCase) -> String;

    fn preamble(&self) -> String;

    /// Trailer that runs every block in order.
    fn runner(&self, cases: &[TestCase]) -> String;

    fn float_literal(&self, value: f64) -> String;
}

/// Emitter for the C test harness of the `mx`/`nn` library.
#[derive(Debug, Clone)]
pub struct CEmitter {
    headers: Vec<String>,
}

impl CEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            headers: vec!["mx.h".to_string(), "nn.h".to_string(), "dense.h".to_string()],
        }
    }

    #[must_use]
    pub fn with_headers(headers: Vec<String>) -> Self {
        Self { headers }
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn value_rows(&self, values: &[f64], per_line: usize) -> String {
        let per_line = per_line.max(1);
        let lines = values
            .chunks(per_line)
            .map(|chunk| {
                let joined = chunk
                    .iter()
                    .map(|&v| self.float_literal(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("\t\t{joined}")
            })
            .collect::<Vec<_>>();
        lines.join(",\n")
    }
}

impl Default for CEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use]
pub fn test_symbol(ordinal: usize, name: &str) -> String {
    let mut symbol = format!("test_{ordinal:03}_");
    let mut last_underscore = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            symbol.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            symbol.push('_');
            last_underscore = true;
        }
    }
    while symbol.ends_with('_') {
        symbol.pop();
    }
    symbol
}

#[must_use]
pub fn c_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `mx_mp_params` token for a transpose variant.
#[must_use]
pub const fn c_transpose(transpose: Transpose) -> &'static str {
    match transpose {
        Transpose::None => "DEF",
        Transpose::Left => "A",
        Transpose::Right => "B",
        Transpose::Both => "BOTH",
    }
}

const fn c_activation(activation: Activation) -> &'static str {
    match activation {
        Activation::Identity => "NO_FUNC",
        Activation::Relu => "RELU",
    }
}

const fn c_layer_kind(kind: LayerKind) -> &'static str {
    match kind {
        LayerKind::Dense => "DENSE",
    }
}

impl FixtureEmitter for CEmitter {
    fn matrix_literal(&self, name: &str, matrix: &Matrix) -> String {
        let (rows, cols) = matrix.shape();
        let mut out = format!("\tmx_type {name}_arr[] = {{\n");
        out.push_str(&self.value_rows(matrix.values(), cols));
        out.push_str("\n\t};\n");
        let _ = writeln!(
            out,
            "\tmx_t {name} = {{.arr = {name}_arr, .x = {cols}, .y = {rows}, .size = {}}};",
            rows * cols
        );
        out
    }

    fn scalar_list_literal(&self, name: &str, values: &[f64]) -> String {
        if values.len() <= VALUES_PER_LINE {
            let joined = values
                .iter()
                .map(|&v| self.float_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            return format!("\tmx_type {name}[] = {{{joined}}};\n");
        }
        format!(
            "\tmx_type {name}[] = {{\n{}\n\t}};\n",
            self.value_rows(values, VALUES_PER_LINE)
        )
    }

    fn empty_matrix_decl(&self, name: &str, rows: usize, cols: usize) -> String {
        let size = rows * cols;
        format!(
            "\tmx_type {name}_arr[{size}] = {{0}};\n\
             \tmx_t {name} = {{.arr = {name}_arr, .x = {cols}, .y = {rows}, .size = {size}}};\n"
        )
    }

    fn assert(&self, failure_condition: &str) -> String {
        format!(
            "\tif ({failure_condition}) {{\n\t\tFAIL_TEST({});\n\t}}\n",
            c_string_literal(failure_condition)
        )
    }

    fn array_copy(&self, src: &str, dst: &str, len: &str) -> String {
        format!("\tmemcpy({dst}, {src}, sizeof(mx_type) * ({len}));\n")
    }

    fn matrix_compare(&self, actual: &str, expected: &str, epsilon: f64) -> String {
        let eps = self.float_literal(epsilon);
        let size_message = c_string_literal(&format!("{actual} size differs from {expected}"));
        let cell_message = c_string_literal(&format!("{actual} differs from {expected}"));
        format!(
            "\tif (({actual}).size != sizeof({expected}) / sizeof({expected}[0])) {{\n\
             \t\tFAIL_TEST({size_message});\n\
             \t}}\n\
             \tfor (mx_size i = 0; i < ({actual}).size; ++i) {{\n\
             \t\tif (fabs(({actual}).arr[i] - {expected}[i]) > {eps}) {{\n\
             \t\t\tFAIL_TEST({cell_message});\n\
             \t\t}}\n\
             \t}}\n"
        )
    }

    fn network_decl(&self, handle: &str, spec: &NetworkSpec) -> String {
        let init_name = format!("{handle}_params");
        let mut out = format!("\tnn_params_t {init_name}[] = {{\n");
        let layers = spec
            .layers
            .iter()
            .map(|layer| {
                format!(
                    "\t\t{{.type = {}, .activ_func = {}, .max = {}, .min = {}, .size = {}}}",
                    c_layer_kind(layer.kind),
                    c_activation(layer.activation),
                    self.float_literal(layer.init_max),
                    self.float_literal(layer.init_min),
                    layer.width
                )
            })
            .collect::<Vec<_>>();
        out.push_str(&layers.join(",\n"));
        out.push_str("\n\t};\n");
        let _ = writeln!(
            out,
            "\tnn_array_t *{handle} = nn_create({}, {}, {}, {}, {init_name});",
            spec.input_width,
            spec.batch_size,
            spec.layers.len(),
            self.float_literal(spec.learning_rate)
        );
        out
    }

    fn test_block(&self, ordinal: usize, case: &TestCase) -> String {
        let mut out = format!(
            "\n/* {} */\nstatic int {}(void)\n{{\n",
            case.name,
            test_symbol(ordinal, &case.name)
        );
        out.push_str(&case.body);
        if !case.body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("\treturn 0;\n}\n");
        out
    }

    fn preamble(&self) -> String {
        let mut out = String::from(
            "/* Generated kernel fixtures. Regenerate instead of editing by hand. */\n\n\
             #include <math.h>\n#include <stdio.h>\n#include <string.h>\n",
        );
        for header in &self.headers {
            let _ = writeln!(out, "#include \"{header}\"");
        }
        out.push_str(
            "\n#define FAIL_TEST(msg) \\\n\
             \tdo { \\\n\
             \t\tfprintf(stderr, \"%s:%d: %s\\n\", __func__, __LINE__, msg); \\\n\
             \t\treturn 1; \\\n\
             \t} while (0)\n\n\
             static int run_test(const char *name, int (*test)(void))\n\
             {\n\
             \tint failed = test();\n\
             \tprintf(\"[%s] %s\\n\", failed ? \"FAIL\" : \" OK \", name);\n\
             \treturn failed;\n\
             }\n",
        );
        out
    }

    fn runner(&self, cases: &[TestCase]) -> String {
        let mut out = String::from("\nint main(void)\n{\n\tint failures = 0;\n");
        for (ordinal, case) in cases.iter().enumerate() {
            let _ = writeln!(
                out,
                "\tfailures += run_test({}, {});",
                c_string_literal(&case.name),
                test_symbol(ordinal, &case.name)
            );
        }
        out.push_str(&format!(
            "\tprintf(\"%d of {} test(s) failed\\n\", failures);\n\treturn failures;\n}}\n",
            cases.len()
        ));
        out
    }

    fn float_literal(&self, value: f64) -> String {
        if value.is_nan() {
            "NAN".to_string()
        } else if value.is_infinite() {
            if value > 0.0 {
                "INFINITY".to_string()
            } else {
                "-INFINITY".to_string()
            }
        } else {
            // Debug formatting is the shortest text that parses back to the same double.
            format!("{value:?}")
        }
    }
}
