#![forbid(unsafe_code)]

//! Golden-fixture generation for the `mx`/`nn` kernel library.
//!
//! [`run_generation`] draws operands from a seeded stream, computes expected
//! results with the reference crates, renders every fixture as C source and
//! persists the suite together with a reproducibility report.

pub mod emitter;
pub mod scenarios;
pub mod shapes;
pub mod suite;

use mgn_matrix::MatrixError;
use mgn_network::NetworkError;
use mgn_random::{DEFAULT_RNG_SEED, RandomError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub use scenarios::GeneratedSuite;
use scenarios::build_suite;

pub const GENERATION_SUITE: &str = "kernel_fixtures";
pub const REPORT_SCHEMA_VERSION: u8 = 1;

pub const GENERATION_REASON_CODES: [&str; 7] = [
    "generation_invalid_config",
    "generation_random_contract_violation",
    "generation_matrix_contract_violation",
    "generation_network_contract_violation",
    "generation_persistence_failed",
    "generation_log_append_failed",
    "generation_report_serialization_failed",
];

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    Config(&'static str),
    Random(RandomError),
    Matrix(MatrixError),
    Network(NetworkError),
    Persistence { path: PathBuf, message: String },
    Log(String),
    Serialization(String),
}

impl GenerationError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "generation_invalid_config",
            Self::Random(_) => "generation_random_contract_violation",
            Self::Matrix(_) => "generation_matrix_contract_violation",
            Self::Network(_) => "generation_network_contract_violation",
            Self::Persistence { .. } => "generation_persistence_failed",
            Self::Log(_) => "generation_log_append_failed",
            Self::Serialization(_) => "generation_report_serialization_failed",
        }
    }
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid generator config: {msg}"),
            Self::Random(err) => write!(f, "random draw failed ({}): {err}", err.reason_code()),
            Self::Matrix(err) => {
                write!(f, "reference evaluation failed ({}): {err}", err.reason_code())
            }
            Self::Network(err) => {
                write!(f, "network reference failed ({}): {err}", err.reason_code())
            }
            Self::Persistence { path, message } => {
                write!(f, "failed writing {}: {message}", path.display())
            }
            Self::Log(msg) | Self::Serialization(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<RandomError> for GenerationError {
    fn from(err: RandomError) -> Self {
        Self::Random(err)
    }
}

impl From<MatrixError> for GenerationError {
    fn from(err: MatrixError) -> Self {
        Self::Matrix(err)
    }
}

impl From<NetworkError> for GenerationError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err)
    }
}

/// How many fixtures each randomized family emits.
///
/// `add_to_first` and `argmax_compare` default to zero: their kernels are declared in
/// `mx.h` but missing from some library builds, and a suite referencing them fails to
/// link. Enable them for builds that ship both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Repetitions {
    pub create: usize,
    pub multiply_per_variant: usize,
    pub hadamard: usize,
    pub subtract: usize,
    pub scalar_multiply: usize,
    pub transform_hadamard: usize,
    pub elementwise_square: usize,
    pub add_to_first: usize,
    pub argmax_compare: usize,
    pub network_create: usize,
    pub network_predict: usize,
}

impl Default for Repetitions {
    fn default() -> Self {
        Self {
            create: 1,
            multiply_per_variant: 5,
            hadamard: 5,
            subtract: 5,
            scalar_multiply: 5,
            transform_hadamard: 1,
            elementwise_square: 3,
            add_to_first: 0,
            argmax_compare: 0,
            network_create: 5,
            network_predict: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub output_path: PathBuf,
    pub report_path: PathBuf,
    pub tolerance: f64,
    pub min_dimension: usize,
    pub max_dimension: usize,
    /// Inclusive integer range for matrix cells.
    pub value_range: (i64, i64),
    /// Inclusive integer range for `mx_mp_num` factors.
    pub scalar_range: (i64, i64),
    /// Cells above this are zeroed by the `mx_hadam_lambda` transform.
    pub clip_threshold: f64,
    pub repetitions: Repetitions,
    pub network_init_range: (f64, f64),
    pub network_input_range: (f64, f64),
    pub learning_rate: f64,
    pub preamble: Option<String>,
    pub footer: Option<String>,
}

impl GeneratorConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let generated = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("generated");
        Self {
            seed: DEFAULT_RNG_SEED,
            output_path: generated.join("main.c"),
            report_path: generated.join("kernel_fixture_report.json"),
            tolerance: 1e-4,
            min_dimension: 1,
            max_dimension: 16,
            value_range: (-254, 255),
            scalar_range: (-16, 16),
            clip_threshold: 4.0,
            repetitions: Repetitions::default(),
            network_init_range: (0.1, 0.2),
            network_input_range: (-1.0, 1.0),
            learning_rate: 0.01,
            preamble: None,
            footer: None,
        }
    }

    /// Same configuration writing into `dir`.
    #[must_use]
    pub fn with_output_dir(mut self, dir: &Path) -> Self {
        self.output_path = dir.join("main.c");
        self.report_path = dir.join("kernel_fixture_report.json");
        self
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.min_dimension == 0 {
            return Err(GenerationError::Config("min_dimension must be >= 1"));
        }
        if self.min_dimension > self.max_dimension {
            return Err(GenerationError::Config(
                "min_dimension must not exceed max_dimension",
            ));
        }
        if self.value_range.0 > self.value_range.1 {
            return Err(GenerationError::Config("value_range is inverted"));
        }
        if self.scalar_range.0 > self.scalar_range.1 {
            return Err(GenerationError::Config("scalar_range is inverted"));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(GenerationError::Config("tolerance must be finite and > 0"));
        }
        if !self.clip_threshold.is_finite() {
            return Err(GenerationError::Config("clip_threshold must be finite"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(GenerationError::Config(
                "learning_rate must be finite and > 0",
            ));
        }
        for (low, high) in [self.network_init_range, self.network_input_range] {
            if !low.is_finite() || !high.is_finite() || low >= high {
                return Err(GenerationError::Config(
                    "network ranges must be finite with low < high",
                ));
            }
        }
        Ok(())
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

/// One record per emitted fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationLogEntry {
    pub suite: &'static str,
    pub fixture_id: String,
    pub test_name: String,
    pub operation: &'static str,
    pub seed: u64,
    pub rng_counter: u64,
    pub shapes: Vec<(usize, usize)>,
    pub reason_code: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub schema_version: u8,
    pub suite: &'static str,
    pub seed: u64,
    pub rng_draws: u64,
    pub fixture_count: usize,
    pub auxiliary_count: usize,
    pub operation_counts: BTreeMap<&'static str, usize>,
    pub output_path: String,
    pub output_bytes: usize,
    pub sha256: String,
    pub tolerance: f64,
    pub config: GeneratorConfig,
}

static GENERATION_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

/// Enables JSONL fixture logging to `path`, or disables it with `None`.
pub fn set_generation_log_path(path: Option<PathBuf>) {
    let cell = GENERATION_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

fn maybe_append_generation_log(entries: &[GenerationLogEntry]) -> Result<(), GenerationError> {
    let configured = GENERATION_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    let Some(path) = configured else {
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            GenerationError::Log(format!("failed creating {}: {err}", parent.display()))
        })?;
    }

    let mut payload = Vec::new();
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(|err| {
            GenerationError::Log(format!("failed serializing generation log entry: {err}"))
        })?;
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| GenerationError::Log(format!("failed opening {}: {err}", path.display())))?;
    file.write_all(&payload)
        .map_err(|err| GenerationError::Log(format!("failed appending {}: {err}", path.display())))
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Builds the whole suite in memory. Nothing is written.
pub fn generate_suite(config: &GeneratorConfig) -> Result<GeneratedSuite, GenerationError> {
    config.validate()?;
    build_suite(config)
}

/// Generates and saves the suite, writes the report next to it, then appends the log.
///
/// Any failure before the save leaves the previous output untouched. Once the suite is
/// saved the report always describes it, even if the log append fails.
pub fn run_generation(config: &GeneratorConfig) -> Result<GenerationReport, GenerationError> {
    let generated = generate_suite(config)?;
    let rendered = generated.suite.save(&config.output_path)?;

    let report = GenerationReport {
        schema_version: REPORT_SCHEMA_VERSION,
        suite: GENERATION_SUITE,
        seed: config.seed,
        rng_draws: generated.rng_draws,
        fixture_count: generated.suite.len(),
        auxiliary_count: generated.suite.auxiliary().len(),
        operation_counts: generated.operation_counts,
        output_path: config.output_path.display().to_string(),
        output_bytes: rendered.len(),
        sha256: sha256_hex(rendered.as_bytes()),
        tolerance: config.tolerance,
        config: config.clone(),
    };
    write_generation_report(&config.report_path, &report)?;
    maybe_append_generation_log(&generated.log_entries)?;
    Ok(report)
}

pub fn write_generation_report(
    path: &Path,
    report: &GenerationReport,
) -> Result<(), GenerationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| GenerationError::Persistence {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;
    }
    let payload = serde_json::to_string_pretty(report).map_err(|err| {
        GenerationError::Serialization(format!("failed serializing generation report: {err}"))
    })?;
    fs::write(path, payload).map_err(|err| GenerationError::Persistence {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
