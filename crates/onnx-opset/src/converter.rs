use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::adapters;
use crate::onnx;
use crate::version::{self, MAX_SUPPORTED_OPSET};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Model has no graph")]
    MissingGraph,
    #[error("Model does not import the default ONNX domain")]
    MissingDefaultOpset,
    #[error("Downgrading from opset {from} to {to} is not supported")]
    DowngradeUnsupported { from: i64, to: i64 },
    #[error("Target opset {0} is outside the supported range 1..={max}", max = MAX_SUPPORTED_OPSET)]
    UnsupportedTarget(i64),
    #[error("Cannot convert {op_type} node '{node}' to opset {version}: {reason}")]
    UnsupportedNode { op_type: String, node: String, version: i64, reason: String },
    #[error("{op_type} node '{node}' is missing required attribute '{attribute}'")]
    MissingAttribute { op_type: String, node: String, attribute: String },
    #[error("{op_type} node '{node}' has an invalid '{attribute}' attribute: {reason}")]
    InvalidAttribute { op_type: String, node: String, attribute: String, reason: String },
}

/// One node rewrite performed while crossing into `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteRecord {
    pub version: i64,
    pub op_type: String,
    pub node: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub source_opset: i64,
    pub target_opset: i64,
    pub source_ir_version: i64,
    pub target_ir_version: i64,
    pub rewrites: Vec<RewriteRecord>,
}

pub(crate) fn node_label(node: &onnx::NodeProto) -> String {
    if node.name.is_empty() {
        format!("<unnamed {}>", node.op_type)
    } else {
        node.name.clone()
    }
}

/// Hands out value and node names that do not collide with anything in the model.
pub(crate) struct NameAllocator {
    used: HashSet<String>,
    next_id: usize,
}

impl NameAllocator {
    fn new() -> Self {
        Self { used: HashSet::new(), next_id: 0 }
    }

    fn reserve_graph(&mut self, graph: &onnx::GraphProto) {
        for value in graph.input.iter().chain(graph.output.iter()).chain(graph.value_info.iter()) {
            self.used.insert(value.name.clone());
        }
        for tensor in &graph.initializer {
            self.used.insert(tensor.name.clone());
        }
        for node in &graph.node {
            self.used.insert(node.name.clone());
            self.used.extend(node.input.iter().cloned());
            self.used.extend(node.output.iter().cloned());
            for attr in &node.attribute {
                for subgraph in attr.g.iter().chain(attr.graphs.iter()) {
                    self.reserve_graph(subgraph);
                }
            }
        }
    }

    pub(crate) fn fresh(&mut self, hint: &str) -> String {
        let name = loop {
            let name = format!("{}_{}", hint, self.next_id);
            self.next_id += 1;
            if !self.used.contains(&name) {
                break name;
            }
        };
        self.used.insert(name.clone());
        name
    }
}

/// What is statically known about a value from the graph's declarations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ValueFacts {
    pub rank: Option<usize>,
    pub elem_type: Option<i32>,
}

fn value_info_facts(value: &onnx::ValueInfoProto) -> ValueFacts {
    let tensor_type = value.r#type.as_ref().and_then(|t| match &t.value {
        Some(onnx::type_proto::Value::TensorType(tensor_type)) => Some(tensor_type),
        _ => None,
    });
    match tensor_type {
        Some(tensor_type) => ValueFacts {
            rank: tensor_type.shape.as_ref().map(|shape| shape.dim.len()),
            elem_type: Some(tensor_type.elem_type).filter(|x| *x != 0),
        },
        None => ValueFacts::default(),
    }
}

fn graph_facts(graph: &onnx::GraphProto, outer: &HashMap<String, ValueFacts>) -> HashMap<String, ValueFacts> {
    let mut facts = outer.clone();
    for tensor in &graph.initializer {
        facts.insert(tensor.name.clone(), ValueFacts {
            rank: Some(tensor.dims.len()),
            elem_type: Some(tensor.data_type),
        });
    }
    for value in graph.input.iter().chain(graph.value_info.iter()).chain(graph.output.iter()) {
        let new_facts = value_info_facts(value);
        let entry = facts.entry(value.name.clone()).or_default();
        entry.rank = entry.rank.or(new_facts.rank);
        entry.elem_type = entry.elem_type.or(new_facts.elem_type);
    }
    facts
}

/// Scratch space handed to an adapter while it rewrites a single node.
pub(crate) struct RewriteContext<'a> {
    pub version: i64,
    names: &'a mut NameAllocator,
    facts: &'a HashMap<String, ValueFacts>,
    prelude: Vec<onnx::NodeProto>,
}

impl<'a> RewriteContext<'a> {
    fn new(version: i64, names: &'a mut NameAllocator, facts: &'a HashMap<String, ValueFacts>) -> Self {
        Self { version, names, facts, prelude: vec![] }
    }

    pub(crate) fn fresh_name(&mut self, hint: &str) -> String {
        self.names.fresh(hint)
    }

    pub(crate) fn facts(&self, value: &str) -> ValueFacts {
        self.facts.get(value).copied().unwrap_or_default()
    }

    /// Emits a node that runs before the one being rewritten.
    pub(crate) fn push_node(&mut self, node: onnx::NodeProto) {
        self.prelude.push(node);
    }

    /// Emits a `Constant` node producing `value` and returns the name of its output.
    pub(crate) fn constant(&mut self, hint: &str, value: onnx::TensorProto) -> String {
        let output = self.fresh_name(hint);
        let name = self.fresh_name(&format!("{}_const", hint));
        self.push_node(onnx::NodeProto {
            name,
            op_type: "Constant".to_string(),
            output: vec![output.clone()],
            attribute: vec![crate::attributes::make_tensor_attribute("value", value)],
            .. Default::default()
        });
        output
    }

    pub(crate) fn unsupported(&self, node: &onnx::NodeProto, reason: impl Into<String>) -> ConversionError {
        ConversionError::UnsupportedNode {
            op_type: node.op_type.clone(),
            node: node_label(node),
            version: self.version,
            reason: reason.into(),
        }
    }

    fn into_prelude(self) -> Vec<onnx::NodeProto> {
        self.prelude
    }
}

fn upgrade_graph(
    graph: &mut onnx::GraphProto,
    version: i64,
    names: &mut NameAllocator,
    outer_facts: &HashMap<String, ValueFacts>,
    rewrites: &mut Vec<RewriteRecord>,
) -> Result<(), ConversionError> {
    let facts = graph_facts(graph, outer_facts);
    let nodes = std::mem::take(&mut graph.node);
    let mut upgraded = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        for attr in node.attribute.iter_mut() {
            if let Some(subgraph) = attr.g.as_mut() {
                upgrade_graph(subgraph, version, names, &facts, rewrites)?;
            }
            for subgraph in attr.graphs.iter_mut() {
                upgrade_graph(subgraph, version, names, &facts, rewrites)?;
            }
        }
        if version::is_default_domain(&node.domain) {
            if let Some(adapter) = adapters::lookup(&node.op_type, version) {
                let op_type = node.op_type.clone();
                let mut ctx = RewriteContext::new(version, names, &facts);
                let action = adapter(&mut node, &mut ctx)?;
                upgraded.extend(ctx.into_prelude());
                if let Some(action) = action {
                    log::debug!("opset {}: {} '{}': {}", version, op_type, node_label(&node), action);
                    rewrites.push(RewriteRecord {
                        version,
                        op_type,
                        node: node_label(&node),
                        action,
                    });
                }
            }
        }
        upgraded.push(node);
    }
    graph.node = upgraded;
    Ok(())
}

/// Upgrades `model` to `target_opset` of the default ONNX domain.
///
/// Conversion walks one opset version at a time. Every default-domain node,
/// including nodes nested in control-flow subgraphs, is offered to the
/// adapter registered for the version being entered; operators whose schema
/// did not change are carried over untouched. Nodes of other domains and
/// model-local functions keep their own imports and are not modified.
///
/// The returned model imports `target_opset` and its `ir_version` is raised
/// to at least the minimum IR version that opset requires.
pub fn convert_version(model: &onnx::ModelProto, target_opset: i64) -> Result<(onnx::ModelProto, ConversionSummary), ConversionError> {
    if !(1..=MAX_SUPPORTED_OPSET).contains(&target_opset) {
        return Err(ConversionError::UnsupportedTarget(target_opset));
    }
    let source_opset = version::default_opset_version(&model.opset_import)
        .ok_or(ConversionError::MissingDefaultOpset)?;
    if target_opset < source_opset {
        return Err(ConversionError::DowngradeUnsupported { from: source_opset, to: target_opset });
    }

    let mut converted = model.clone();
    let mut summary = ConversionSummary {
        source_opset,
        target_opset,
        source_ir_version: model.ir_version,
        target_ir_version: model.ir_version,
        rewrites: vec![],
    };
    if source_opset == target_opset {
        log::info!("Model already targets opset {}, nothing to convert", target_opset);
        return Ok((converted, summary));
    }

    let graph = converted.graph.as_mut().ok_or(ConversionError::MissingGraph)?;
    let mut names = NameAllocator::new();
    names.reserve_graph(graph);
    for training_info in &converted.training_info {
        for training_graph in training_info.initialization.iter().chain(training_info.algorithm.iter()) {
            names.reserve_graph(training_graph);
        }
    }

    let no_outer_facts = HashMap::new();
    for version in (source_opset + 1)..=target_opset {
        upgrade_graph(graph, version, &mut names, &no_outer_facts, &mut summary.rewrites)?;
        for training_info in converted.training_info.iter_mut() {
            for training_graph in training_info.initialization.iter_mut().chain(training_info.algorithm.iter_mut()) {
                upgrade_graph(training_graph, version, &mut names, &no_outer_facts, &mut summary.rewrites)?;
            }
        }
    }

    if let Some(opset) = version::default_opset_mut(&mut converted.opset_import) {
        opset.version = target_opset;
    }
    let min_ir_version = version::min_ir_version_for_opset(target_opset);
    if converted.ir_version < min_ir_version {
        log::info!("Raising IR version from {} to {}", converted.ir_version, min_ir_version);
        converted.ir_version = min_ir_version;
    }
    summary.target_ir_version = converted.ir_version;

    log::info!(
        "Converted model from opset {} to {} ({} node rewrites)",
        source_opset,
        target_opset,
        summary.rewrites.len()
    );
    Ok((converted, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::*;

    fn node(op_type: &str, inputs: &[&str], outputs: &[&str], attribute: Vec<onnx::AttributeProto>) -> onnx::NodeProto {
        onnx::NodeProto {
            op_type: op_type.to_string(),
            name: format!("{}_node", op_type.to_lowercase()),
            input: inputs.iter().map(|x| x.to_string()).collect(),
            output: outputs.iter().map(|x| x.to_string()).collect(),
            attribute,
            .. Default::default()
        }
    }

    fn model(opset: i64, ir_version: i64, nodes: Vec<onnx::NodeProto>) -> onnx::ModelProto {
        onnx::ModelProto {
            ir_version,
            opset_import: vec![onnx::OperatorSetIdProto { domain: String::new(), version: opset }],
            graph: Some(onnx::GraphProto { node: nodes, .. Default::default() }),
            .. Default::default()
        }
    }

    fn nodes(model: &onnx::ModelProto) -> &[onnx::NodeProto] {
        &model.graph.as_ref().unwrap().node
    }

    fn constant_int64s(node: &onnx::NodeProto) -> Vec<i64> {
        assert_eq!(node.op_type, "Constant");
        node.attribute[0].t.as_ref().unwrap().int64_data.clone()
    }

    #[test]
    fn same_version_is_untouched() {
        let original = model(17, 8, vec![node("Relu", &["x"], &["y"], vec![])]);
        let (converted, summary) = convert_version(&original, 17).unwrap();
        assert_eq!(converted, original);
        assert!(summary.rewrites.is_empty());
    }

    #[test]
    fn downgrade_is_rejected() {
        let original = model(13, 7, vec![]);
        assert!(matches!(
            convert_version(&original, 11),
            Err(ConversionError::DowngradeUnsupported { from: 13, to: 11 })
        ));
    }

    #[test]
    fn target_out_of_range_is_rejected() {
        let original = model(13, 7, vec![]);
        assert!(matches!(convert_version(&original, 99), Err(ConversionError::UnsupportedTarget(99))));
        assert!(matches!(convert_version(&original, 0), Err(ConversionError::UnsupportedTarget(0))));
        assert!(matches!(convert_version(&original, 20), Err(ConversionError::UnsupportedTarget(20))));
        assert!(convert_version(&original, 19).is_ok());
    }

    #[test]
    fn missing_default_domain_is_rejected() {
        let mut original = model(13, 7, vec![]);
        original.opset_import[0].domain = "com.microsoft".to_string();
        assert!(matches!(convert_version(&original, 17), Err(ConversionError::MissingDefaultOpset)));
    }

    #[test]
    fn opset_and_ir_version_are_bumped() {
        let mut original = model(11, 6, vec![node("Relu", &["x"], &["y"], vec![])]);
        original.opset_import.push(onnx::OperatorSetIdProto { domain: "com.microsoft".to_string(), version: 1 });
        let (converted, summary) = convert_version(&original, 17).unwrap();
        assert_eq!(version::default_opset_version(&converted.opset_import), Some(17));
        assert_eq!(converted.opset_import[1].version, 1);
        assert_eq!(converted.ir_version, 8);
        assert_eq!(summary.source_ir_version, 6);
        assert_eq!(summary.target_ir_version, 8);
        assert_eq!(nodes(&converted), nodes(&original));
    }

    #[test]
    fn newer_ir_version_is_kept() {
        let original = model(11, 9, vec![]);
        let (converted, _) = convert_version(&original, 12).unwrap();
        assert_eq!(converted.ir_version, 9);
    }

    #[test]
    fn unsqueeze_axes_move_to_constant_input() {
        let original = model(12, 7, vec![node("Unsqueeze", &["x"], &["y"], vec![make_ints_attribute("axes", vec![0, 2])])]);
        let (converted, summary) = convert_version(&original, 13).unwrap();
        let nodes = nodes(&converted);
        assert_eq!(nodes.len(), 2);
        assert_eq!(constant_int64s(&nodes[0]), vec![0, 2]);
        assert_eq!(nodes[1].input, vec!["x".to_string(), nodes[0].output[0].clone()]);
        assert!(nodes[1].attribute.is_empty());
        assert_eq!(summary.rewrites.len(), 1);
        assert_eq!(summary.rewrites[0].version, 13);
    }

    #[test]
    fn subgraph_nodes_are_upgraded() {
        let branch = onnx::GraphProto {
            node: vec![node("Squeeze", &["a"], &["b"], vec![make_ints_attribute("axes", vec![1])])],
            .. Default::default()
        };
        let if_node = node("If", &["cond"], &["out"], vec![onnx::AttributeProto {
            name: "then_branch".to_string(),
            r#type: onnx::attribute_proto::AttributeType::Graph as i32,
            g: Some(branch),
            .. Default::default()
        }]);
        let (converted, _) = convert_version(&model(12, 7, vec![if_node]), 13).unwrap();
        let branch = nodes(&converted)[0].attribute[0].g.as_ref().unwrap();
        assert_eq!(branch.node.len(), 2);
        assert_eq!(branch.node[0].op_type, "Constant");
        assert_eq!(branch.node[1].input.len(), 2);
    }

    #[test]
    fn custom_domain_nodes_are_ignored() {
        let mut custom = node("Unsqueeze", &["x"], &["y"], vec![make_ints_attribute("axes", vec![0])]);
        custom.domain = "com.example".to_string();
        let (converted, summary) = convert_version(&model(12, 7, vec![custom.clone()]), 13).unwrap();
        assert_eq!(nodes(&converted), &[custom]);
        assert!(summary.rewrites.is_empty());
    }

    #[test]
    fn generated_names_avoid_existing_values() {
        let original = model(12, 7, vec![
            node("Identity", &["x"], &["unsqueeze_node_axes_0"], vec![]),
            node("Unsqueeze", &["unsqueeze_node_axes_0"], &["y"], vec![make_ints_attribute("axes", vec![0])]),
        ]);
        let (converted, _) = convert_version(&original, 13).unwrap();
        let constant = &nodes(&converted)[1];
        assert_eq!(constant.op_type, "Constant");
        assert_ne!(constant.output[0], "unsqueeze_node_axes_0");
    }

    #[test]
    fn upgrades_chain_across_versions() {
        // Upsample-7 becomes Upsample-9 (scales input), then Resize-10, then Resize-11 (roi input).
        let original = model(8, 3, vec![node(
            "Upsample",
            &["x"],
            &["y"],
            vec![make_floats_attribute("scales", vec![1.0, 1.0, 2.0, 2.0])],
        )]);
        let (converted, summary) = convert_version(&original, 11).unwrap();
        let nodes = nodes(&converted);
        let resize = nodes.last().unwrap();
        assert_eq!(resize.op_type, "Resize");
        assert_eq!(resize.input.len(), 3);
        assert_eq!(query_attribute_string(&resize.attribute, "coordinate_transformation_mode").as_deref(), Some("asymmetric"));
        assert_eq!(summary.rewrites.iter().map(|r| r.version).collect::<Vec<_>>(), vec![9, 10, 11]);
    }
}
