use std::fs;
use std::path::PathBuf;

use mgn_fixtures::{GeneratorConfig, generate_suite, run_generation, sha256_hex};

fn temp_dir(name: &str) -> PathBuf {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    std::env::temp_dir().join(format!("mgn_smoke_{name}_{ts}"))
}

#[test]
fn generated_suite_is_written_and_stable() {
    let dir = temp_dir("stable");
    let cfg = GeneratorConfig::default_paths().with_output_dir(&dir);

    let first = run_generation(&cfg).expect("first generation");
    let first_bytes = fs::read(&cfg.output_path).expect("suite exists");
    assert_eq!(first.sha256, sha256_hex(&first_bytes));

    let second = run_generation(&cfg).expect("second generation");
    let second_bytes = fs::read(&cfg.output_path).expect("suite exists");
    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first.sha256, second.sha256);
    assert!(cfg.report_path.exists());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn suite_text_has_harness_parts_in_order() {
    let generated = generate_suite(&GeneratorConfig::default_paths()).expect("generation");
    let text = generated.suite.render();

    let include = text.find("#include \"mx.h\"").expect("preamble");
    let aux = text.find("mx_type clip_above_threshold").expect("transform declaration");
    let first_block = text.find("static int test_000_mx_create").expect("first block");
    let fit = text.find("nn_fit(nn, &input, &target);").expect("fit block");
    let main = text.find("int main(void)").expect("runner");
    assert!(include < aux && aux < first_block && first_block < fit && fit < main);

    let last = generated.suite.len() - 1;
    assert!(text.contains(&format!("run_test(\"nn_fit\", test_{last:03}_nn_fit);")));
}

#[test]
fn configured_preamble_and_footer_replace_defaults() {
    let cfg = GeneratorConfig {
        preamble: Some("#include \"harness.h\"\n".to_string()),
        footer: Some("/* runner supplied by harness */\n".to_string()),
        ..GeneratorConfig::default_paths()
    };
    let text = generate_suite(&cfg).expect("generation").suite.render();
    assert!(text.starts_with("#include \"harness.h\"\n"));
    assert!(text.ends_with("/* runner supplied by harness */\n"));
    assert!(!text.contains("#define FAIL_TEST"));
}

#[test]
fn failed_generation_keeps_previous_output() {
    let dir = temp_dir("keeps_previous");
    let mut cfg = GeneratorConfig::default_paths().with_output_dir(&dir);
    run_generation(&cfg).expect("baseline generation");
    let baseline = fs::read(&cfg.output_path).expect("baseline suite");

    cfg.max_dimension = 0;
    let err = run_generation(&cfg).expect_err("invalid bounds");
    assert_eq!(err.reason_code(), "generation_invalid_config");
    assert_eq!(fs::read(&cfg.output_path).expect("still present"), baseline);

    let _ = fs::remove_dir_all(dir);
}
