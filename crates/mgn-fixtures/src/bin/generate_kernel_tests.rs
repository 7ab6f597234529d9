#![forbid(unsafe_code)]

use mgn_fixtures::{GeneratorConfig, run_generation};

fn main() {
    if let Err(err) = run() {
        eprintln!("generate_kernel_tests failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cfg = GeneratorConfig::default_paths();
    let report = run_generation(&cfg).map_err(|err| err.to_string())?;
    println!(
        "generated {} fixtures (seed={:#x}, sha256={})",
        report.fixture_count, report.seed, report.sha256
    );
    println!("wrote {}", cfg.output_path.display());
    println!("wrote {}", cfg.report_path.display());
    Ok(())
}
