use std::collections::BTreeSet;
use std::path::Path;

use prost::Message;

use crate::onnx;
use crate::onnx::tensor_proto::DataLocation;

#[derive(Debug, thiserror::Error)]
pub enum ModelIoError {
    #[error("Failed to read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("Failed to write {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error(transparent)]
    DecodeError(#[from] prost::DecodeError),
}

pub fn decode_model(onnx_bytes: &[u8]) -> Result<onnx::ModelProto, ModelIoError> {
    Ok(onnx::ModelProto::decode(onnx_bytes)?)
}

pub fn encode_model(model: &onnx::ModelProto) -> Vec<u8> {
    model.encode_to_vec()
}

pub fn load_model(path: &Path) -> Result<onnx::ModelProto, ModelIoError> {
    let onnx_bytes = std::fs::read(path).map_err(|source| ModelIoError::Read {
        path: path.display().to_string(),
        source,
    })?;
    log::debug!("Read {} bytes from {}", onnx_bytes.len(), path.display());
    decode_model(&onnx_bytes)
}

pub fn save_model(model: &onnx::ModelProto, path: &Path) -> Result<(), ModelIoError> {
    let onnx_bytes = encode_model(model);
    std::fs::write(path, &onnx_bytes).map_err(|source| ModelIoError::Write {
        path: path.display().to_string(),
        source,
    })?;
    log::debug!("Wrote {} bytes to {}", onnx_bytes.len(), path.display());
    Ok(())
}

/// Relative file locations of every externally stored tensor in the model.
pub fn external_data_locations(model: &onnx::ModelProto) -> BTreeSet<String> {
    let mut locations = BTreeSet::new();
    if let Some(graph) = &model.graph {
        collect_graph_locations(graph, &mut locations);
    }
    for training_info in &model.training_info {
        for graph in training_info.initialization.iter().chain(training_info.algorithm.iter()) {
            collect_graph_locations(graph, &mut locations);
        }
    }
    for function in &model.functions {
        for node in &function.node {
            collect_node_locations(node, &mut locations);
        }
    }
    locations
}

fn collect_graph_locations(graph: &onnx::GraphProto, locations: &mut BTreeSet<String>) {
    for tensor in &graph.initializer {
        collect_tensor_location(tensor, locations);
    }
    for sparse in &graph.sparse_initializer {
        collect_sparse_location(sparse, locations);
    }
    for node in &graph.node {
        collect_node_locations(node, locations);
    }
}

fn collect_node_locations(node: &onnx::NodeProto, locations: &mut BTreeSet<String>) {
    for attr in &node.attribute {
        if let Some(tensor) = &attr.t {
            collect_tensor_location(tensor, locations);
        }
        for tensor in &attr.tensors {
            collect_tensor_location(tensor, locations);
        }
        if let Some(sparse) = &attr.sparse_tensor {
            collect_sparse_location(sparse, locations);
        }
        for sparse in &attr.sparse_tensors {
            collect_sparse_location(sparse, locations);
        }
        if let Some(graph) = &attr.g {
            collect_graph_locations(graph, locations);
        }
        for graph in &attr.graphs {
            collect_graph_locations(graph, locations);
        }
    }
}

fn collect_sparse_location(sparse: &onnx::SparseTensorProto, locations: &mut BTreeSet<String>) {
    for tensor in sparse.values.iter().chain(sparse.indices.iter()) {
        collect_tensor_location(tensor, locations);
    }
}

fn collect_tensor_location(tensor: &onnx::TensorProto, locations: &mut BTreeSet<String>) {
    if tensor.data_location != DataLocation::External as i32 {
        return;
    }
    for entry in &tensor.external_data {
        if entry.key == "location" {
            locations.insert(entry.value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn external_tensor(name: &str, location: &str) -> onnx::TensorProto {
        onnx::TensorProto {
            name: name.to_string(),
            data_type: onnx::tensor_proto::DataType::Float as i32,
            dims: vec![4],
            data_location: DataLocation::External as i32,
            external_data: vec![
                onnx::StringStringEntryProto { key: "location".to_string(), value: location.to_string() },
                onnx::StringStringEntryProto { key: "offset".to_string(), value: "0".to_string() },
            ],
            .. Default::default()
        }
    }

    #[test]
    fn save_then_load_preserves_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        let model = onnx::ModelProto {
            ir_version: 7,
            producer_name: "unit".to_string(),
            opset_import: vec![onnx::OperatorSetIdProto { domain: String::new(), version: 12 }],
            graph: Some(onnx::GraphProto {
                name: "g".to_string(),
                node: vec![onnx::NodeProto {
                    op_type: "Relu".to_string(),
                    input: vec!["x".to_string()],
                    output: vec!["y".to_string()],
                    .. Default::default()
                }],
                .. Default::default()
            }),
            .. Default::default()
        };
        save_model(&model, &path).unwrap();
        assert_eq!(load_model(&path).unwrap(), model);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_model(&dir.path().join("absent.onnx")).unwrap_err();
        assert!(matches!(err, ModelIoError::Read { .. }));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(decode_model(&[0xff, 0xff, 0xff]), Err(ModelIoError::DecodeError(_))));
    }

    #[test]
    fn external_locations_include_subgraphs() {
        let subgraph = onnx::GraphProto {
            initializer: vec![external_tensor("w2", "branch.bin")],
            .. Default::default()
        };
        let model = onnx::ModelProto {
            graph: Some(onnx::GraphProto {
                initializer: vec![
                    external_tensor("w1", "weights.bin"),
                    onnx::TensorProto { name: "inline".to_string(), .. Default::default() },
                ],
                node: vec![onnx::NodeProto {
                    op_type: "If".to_string(),
                    attribute: vec![onnx::AttributeProto {
                        name: "then_branch".to_string(),
                        r#type: onnx::attribute_proto::AttributeType::Graph as i32,
                        g: Some(subgraph),
                        .. Default::default()
                    }],
                    .. Default::default()
                }],
                .. Default::default()
            }),
            .. Default::default()
        };
        let locations: Vec<_> = external_data_locations(&model).into_iter().collect();
        assert_eq!(locations, vec!["branch.bin".to_string(), "weights.bin".to_string()]);
    }
}
