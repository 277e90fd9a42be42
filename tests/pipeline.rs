mod common;

use onnx_ort_convert::onnx_opset::{load_model, version, ConversionError};
use onnx_ort_convert::{ConversionReport, ConvertConfig, PipelineError};

#[test]
fn upgrades_model_into_new_output_directory() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let infile = dir.path().join("in").join("classifier.onnx");
    common::write_model(&common::legacy_model(), &infile);

    let outdir = dir.path().join("out").join("nested");
    let mut config = ConvertConfig::new(infile.to_str().unwrap(), &outdir);
    config.skip_ort = true;
    let report = onnx_ort_convert::run(&config).unwrap();

    let upgraded_path = outdir.join("classifier-upver.onnx");
    assert_eq!(report.upgraded_model, upgraded_path);
    assert!(report.ort_model.is_none());
    assert!(report.ort_exit_code.is_none());

    let upgraded = load_model(&upgraded_path).unwrap();
    assert_eq!(version::default_opset_version(&upgraded.opset_import), Some(17));
    assert_eq!(upgraded.ir_version, 8);
    assert_eq!(upgraded.producer_name, "integration-test");

    let graph = upgraded.graph.unwrap();
    let op_types: Vec<_> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
    assert_eq!(op_types, vec!["Constant", "Unsqueeze", "Flatten", "Softmax", "Shape", "Reshape"]);
    assert_eq!(graph.node.last().unwrap().output, vec!["y".to_string()]);
    assert_eq!(report.summary.source_opset, 11);
    assert_eq!(report.summary.rewrites.len(), 2);

    // The input is left untouched.
    let original = load_model(&infile).unwrap();
    assert_eq!(original, common::legacy_model());
}

#[test]
fn writes_json_report() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let infile = dir.path().join("model.onnx");
    common::write_model(&common::legacy_model(), &infile);

    let mut config = ConvertConfig::new(infile.to_str().unwrap(), dir.path());
    config.skip_ort = true;
    config.target_opset = 13;
    config.report = Some(dir.path().join("report.json"));
    let report = onnx_ort_convert::run(&config).unwrap();

    let written: ConversionReport = serde_json::from_slice(&std::fs::read(dir.path().join("report.json")).unwrap()).unwrap();
    assert_eq!(written, report);
    assert_eq!(written.summary.target_opset, 13);
    assert_eq!(written.summary.target_ir_version, 7);
}

#[test]
fn downgrade_fails_before_writing() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let infile = dir.path().join("model.onnx");
    let mut model = common::legacy_model();
    model.opset_import[0].version = 18;
    common::write_model(&model, &infile);

    let outdir = dir.path().join("out");
    let config = ConvertConfig::new(infile.to_str().unwrap(), &outdir);
    let err = onnx_ort_convert::run(&config).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Conversion(ConversionError::DowngradeUnsupported { from: 18, to: 17 })
    ));
    assert_eq!(err.exit_code(), 1);
    assert!(!outdir.exists());
}

#[test]
fn missing_input_is_an_io_error() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = ConvertConfig::new(dir.path().join("nope.onnx").to_str().unwrap(), dir.path());
    assert!(matches!(onnx_ort_convert::run(&config), Err(PipelineError::ModelIo(_))));
}
