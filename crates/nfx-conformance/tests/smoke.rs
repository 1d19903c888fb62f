use std::path::Path;

use nfx_conformance::{
    HarnessConfig, ReferenceBackend, Tolerance, load_model_file, run_all_suites, run_smoke,
    verify,
};

#[test]
fn smoke_report_is_stable() {
    let cfg = HarnessConfig::default_paths();
    let report = run_smoke(&cfg);
    assert_eq!(report.suite, "smoke");
    assert!(report.fixture_count >= 1);
    assert!(report.rejection_cases_present);

    let fixture_path = cfg.fixture_root.join("split_4D_float_2_nnfw.mod.py");
    assert!(Path::new(&fixture_path).exists());
}

#[test]
fn seed_fixture_verifies_its_own_expectations() {
    let cfg = HarnessConfig::default_paths();
    let model = load_model_file(&cfg.fixture_root.join("split_4D_float_2_nnfw.mod.py"))
        .expect("seed fixture should load");
    let bundle = &model.bundles[0];

    let mut actual = nfx_conformance::ActualOutputs::new();
    actual.insert(
        "op2".to_string(),
        vec![1.0, 3.0, 5.0, 7.0, 9.0, 11.0, 13.0, 15.0],
    );
    actual.insert(
        "op3".to_string(),
        vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0],
    );
    let result = verify(bundle, &actual, Tolerance::exact());
    assert!(result.passed(), "{result:?}");

    actual.insert("op3".to_string(), vec![2.0, 4.0, 6.0]);
    let err = verify(bundle, &actual, Tolerance::exact())
        .into_result()
        .expect_err("short output");
    assert_eq!(err.reason_code(), "length_mismatch");
}

#[test]
fn conformance_suites_pass() {
    let cfg = HarnessConfig::default_paths();
    let suites = run_all_suites(&cfg, &ReferenceBackend).expect("suites should execute");

    for suite in suites {
        assert!(
            suite.all_passed(),
            "suite {} failed with {:?}",
            suite.suite,
            suite.failures
        );
    }
}

#[test]
fn float32_device_outputs_verify_exactly() {
    let cfg = HarnessConfig::default_paths();
    let model = load_model_file(&cfg.fixture_root.join("split_3D_float_neg_axis.mod.py"))
        .expect("fixture should load");
    let bundle = &model.bundles[0];

    // What an f32 device hands back: the expected literals cast through f32.
    let mut actual = nfx_conformance::ActualOutputs::new();
    for (name, values) in [
        ("op2", [0.1_f32, 0.2, 0.7, 0.8]),
        ("op3", [0.3, 0.4, 0.9, 1.0]),
        ("op4", [0.5, 0.6, 1.1, 1.2]),
    ] {
        actual.insert(name.to_string(), values.iter().map(|&v| f64::from(v)).collect());
    }
    let result = verify(bundle, &actual, Tolerance::exact());
    assert!(result.passed(), "{result:?}");
    assert_eq!(result.mismatch_count(), 0);
}
