use std::path::Path;
use std::sync::Once;

use onnx_ort_convert::onnx_opset::attributes::make_ints_attribute;
use onnx_ort_convert::onnx_opset::onnx;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn float_input(name: &str, rank: usize) -> onnx::ValueInfoProto {
    onnx::ValueInfoProto {
        name: name.to_string(),
        r#type: Some(onnx::TypeProto {
            value: Some(onnx::type_proto::Value::TensorType(onnx::type_proto::Tensor {
                elem_type: onnx::tensor_proto::DataType::Float as i32,
                shape: Some(onnx::TensorShapeProto {
                    dim: (0..rank).map(|i| onnx::tensor_shape_proto::Dimension {
                        value: Some(onnx::tensor_shape_proto::dimension::Value::DimValue(i as i64 + 2)),
                        .. Default::default()
                    }).collect(),
                }),
            })),
            .. Default::default()
        }),
        .. Default::default()
    }
}

/// Opset 11 model: x -> Unsqueeze(axes=[0]) -> Softmax(axis=1) -> y
pub fn legacy_model() -> onnx::ModelProto {
    onnx::ModelProto {
        ir_version: 6,
        producer_name: "integration-test".to_string(),
        opset_import: vec![onnx::OperatorSetIdProto { domain: String::new(), version: 11 }],
        graph: Some(onnx::GraphProto {
            name: "legacy".to_string(),
            node: vec![
                onnx::NodeProto {
                    name: "expand".to_string(),
                    op_type: "Unsqueeze".to_string(),
                    input: vec!["x".to_string()],
                    output: vec!["x4".to_string()],
                    attribute: vec![make_ints_attribute("axes", vec![0])],
                    .. Default::default()
                },
                onnx::NodeProto {
                    name: "probs".to_string(),
                    op_type: "Softmax".to_string(),
                    input: vec!["x4".to_string()],
                    output: vec!["y".to_string()],
                    .. Default::default()
                },
            ],
            input: vec![float_input("x", 3)],
            output: vec![onnx::ValueInfoProto { name: "y".to_string(), .. Default::default() }],
            .. Default::default()
        }),
        .. Default::default()
    }
}

pub fn write_model(model: &onnx::ModelProto, path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    onnx_ort_convert::onnx_opset::save_model(model, path).unwrap();
}
