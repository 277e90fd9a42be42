//! Per-operator rewrites applied when a node crosses the opset version in
//! which its operator's schema changed.
//!
//! An adapter receives the node as it was valid in `version - 1` and leaves
//! it valid in `version`. It may emit helper nodes (mostly `Constant`s for
//! attributes that became inputs) through the [`RewriteContext`]; these are
//! placed directly before the rewritten node. The returned string describes
//! the rewrite, or `None` when the node needed no change.

use crate::attributes::*;
use crate::converter::{node_label, ConversionError, RewriteContext};
use crate::onnx;
use crate::onnx::tensor_proto::DataType;

pub(crate) type AdapterFn = fn(&mut onnx::NodeProto, &mut RewriteContext) -> Result<Option<String>, ConversionError>;

/// Ops whose version 6 dropped the legacy `consumed_inputs` attribute.
const CONSUMED_INPUTS_OPS: &[&str] = &[
    "Abs", "Add", "BatchNormalization", "Ceil", "Clip", "Div", "Dropout", "Elu", "Exp", "Floor",
    "HardSigmoid", "InstanceNormalization", "LeakyRelu", "Log", "Max", "Mean", "Min", "Mul",
    "Neg", "PRelu", "Reciprocal", "Relu", "Selu", "Sigmoid", "Sqrt", "Sub", "Sum", "Tanh",
];

/// Ops that switched from `broadcast`/`axis` attributes to numpy broadcasting in version 7.
const LEGACY_BROADCAST_OPS: &[&str] = &[
    "Add", "Sub", "Mul", "Div", "Pow", "And", "Or", "Xor", "Equal", "Greater", "Less",
];

/// Reductions whose `axes` attribute became an input in version 18.
const AXES_INPUT_REDUCE_OPS: &[&str] = &[
    "ReduceMean", "ReduceMax", "ReduceMin", "ReduceProd", "ReduceL1", "ReduceL2",
    "ReduceLogSum", "ReduceLogSumExp", "ReduceSumSquare",
];

pub(crate) fn lookup(op_type: &str, version: i64) -> Option<AdapterFn> {
    let adapter: AdapterFn = match (op_type, version) {
        ("Pad", 2) => pad_rename_paddings,
        ("Concat", 4) => concat_default_axis,
        ("Reshape", 5) => reshape_shape_to_input,
        ("Cast", 6) => cast_to_enum,
        (op, 6) if CONSUMED_INPUTS_OPS.contains(&op) => drop_consumed_inputs,
        (op, 7) if LEGACY_BROADCAST_OPS.contains(&op) => legacy_broadcast,
        ("Gemm", 7) => gemm_drop_broadcast,
        ("BatchNormalization" | "Dropout", 7) => drop_is_test,
        ("Upsample", 7) => upsample_scale_attributes,
        ("BatchNormalization", 9) => batch_normalization_drop_spatial,
        ("Upsample", 9) => upsample_scales_to_input,
        ("Scan", 9) => scan_batch_axis,
        ("Upsample", 10) => upsample_to_resize,
        ("Slice", 10) => slice_attributes_to_inputs,
        ("TopK", 10) => topk_k_to_input,
        ("Pad", 11) => pad_attributes_to_inputs,
        ("Clip", 11) => clip_attributes_to_inputs,
        ("Resize", 11) => resize_insert_roi,
        ("Scatter", 11) => scatter_to_scatter_elements,
        ("Dropout", 12) => dropout_ratio_to_input,
        ("Split", 13) => split_to_input,
        ("Squeeze" | "Unsqueeze" | "ReduceSum", 13) => axes_to_input,
        ("Softmax" | "LogSoftmax" | "Hardmax", 13) => softmax_coerced_axis,
        ("Resize", 13) => resize_drop_tf_half_pixel,
        ("RoiAlign", 16) => roi_align_pin_output_half_pixel,
        (op, 18) if AXES_INPUT_REDUCE_OPS.contains(&op) => axes_to_input,
        _ => return None,
    };
    Some(adapter)
}

fn name_hint(node: &onnx::NodeProto, suffix: &str) -> String {
    if node.name.is_empty() {
        format!("{}_{}", node.op_type.to_lowercase(), suffix)
    } else {
        format!("{}_{}", node.name, suffix)
    }
}

/// Places `value` at input slot `index`, padding skipped optional inputs with "".
fn set_input(node: &mut onnx::NodeProto, index: usize, value: String) {
    if node.input.len() <= index {
        node.input.resize(index + 1, String::new());
    }
    node.input[index] = value;
}

fn missing_attribute(node: &onnx::NodeProto, attribute: &str) -> ConversionError {
    ConversionError::MissingAttribute {
        op_type: node.op_type.clone(),
        node: node_label(node),
        attribute: attribute.to_string(),
    }
}

fn invalid_attribute(node: &onnx::NodeProto, attribute: &str, reason: impl Into<String>) -> ConversionError {
    ConversionError::InvalidAttribute {
        op_type: node.op_type.clone(),
        node: node_label(node),
        attribute: attribute.to_string(),
        reason: reason.into(),
    }
}

fn int64_tensor(values: Vec<i64>) -> onnx::TensorProto {
    onnx::TensorProto {
        dims: vec![values.len() as i64],
        data_type: DataType::Int64 as i32,
        int64_data: values,
        .. Default::default()
    }
}

fn float_tensor(values: Vec<f32>) -> onnx::TensorProto {
    onnx::TensorProto {
        dims: vec![values.len() as i64],
        data_type: DataType::Float as i32,
        float_data: values,
        .. Default::default()
    }
}

/// Builds a rank-0 tensor holding `value` in the element type `elem_type`.
/// Unknown or unspecified element types fall back to float32.
fn scalar_like(elem_type: Option<i32>, value: f32) -> onnx::TensorProto {
    let data_type = elem_type
        .and_then(|x| DataType::try_from(x).ok())
        .unwrap_or(DataType::Float);
    let mut tensor = onnx::TensorProto {
        data_type: data_type as i32,
        .. Default::default()
    };
    match data_type {
        DataType::Double => tensor.double_data = vec![value as f64],
        DataType::Float16 => tensor.int32_data = vec![half::f16::from_f32(value).to_bits() as i32],
        DataType::Bfloat16 => tensor.int32_data = vec![half::bf16::from_f32(value).to_bits() as i32],
        DataType::Int64 => tensor.int64_data = vec![value as i64],
        DataType::Int32 | DataType::Int16 | DataType::Int8 | DataType::Uint16 | DataType::Uint8 | DataType::Bool => {
            tensor.int32_data = vec![value as i32]
        }
        DataType::Uint32 | DataType::Uint64 => tensor.uint64_data = vec![value as u64],
        _ => {
            tensor.data_type = DataType::Float as i32;
            tensor.float_data = vec![value];
        }
    }
    tensor
}

fn pad_rename_paddings(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    match take_attribute(&mut node.attribute, "paddings") {
        Some(mut paddings) => {
            paddings.name = "pads".to_string();
            set_attribute(&mut node.attribute, paddings);
            Ok(Some("renamed attribute paddings to pads".to_string()))
        }
        None => Ok(None),
    }
}

fn concat_default_axis(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    if has_attribute(&node.attribute, "axis") {
        return Ok(None);
    }
    node.attribute.push(make_int_attribute("axis", 1));
    Ok(Some("made implicit axis=1 explicit".to_string()))
}

fn reshape_shape_to_input(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let shape = query_attribute_ints(&node.attribute, "shape").ok_or_else(|| missing_attribute(node, "shape"))?;
    take_attribute(&mut node.attribute, "shape");
    take_attribute(&mut node.attribute, "consumed_inputs");
    let shape_input = ctx.constant(&name_hint(node, "shape"), int64_tensor(shape));
    set_input(node, 1, shape_input);
    Ok(Some("moved shape attribute to input".to_string()))
}

fn cast_to_enum(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let Some(type_name) = query_attribute_string(&node.attribute, "to") else {
        // Already an integer type code.
        return Ok(None);
    };
    let data_type = match type_name.to_uppercase().as_str() {
        "FLOAT" => DataType::Float,
        "UINT8" => DataType::Uint8,
        "INT8" => DataType::Int8,
        "UINT16" => DataType::Uint16,
        "INT16" => DataType::Int16,
        "INT32" => DataType::Int32,
        "INT64" => DataType::Int64,
        "STRING" => DataType::String,
        "BOOL" => DataType::Bool,
        "FLOAT16" => DataType::Float16,
        "DOUBLE" => DataType::Double,
        "UINT32" => DataType::Uint32,
        "UINT64" => DataType::Uint64,
        _ => return Err(invalid_attribute(node, "to", format!("unknown type name {:?}", type_name))),
    };
    set_attribute(&mut node.attribute, make_int_attribute("to", data_type as i64));
    Ok(Some(format!("converted to={} into type code {}", type_name, data_type as i32)))
}

fn drop_consumed_inputs(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    Ok(take_attribute(&mut node.attribute, "consumed_inputs").map(|_| "dropped consumed_inputs".to_string()))
}

fn legacy_broadcast(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let broadcast = query_attribute_int(&node.attribute, "broadcast").unwrap_or(0);
    let axis = query_attribute_int(&node.attribute, "axis");
    let had_attributes = take_attribute(&mut node.attribute, "broadcast").is_some()
        | take_attribute(&mut node.attribute, "axis").is_some();

    // Without broadcasting both inputs have identical shapes.
    let Some(axis) = axis.filter(|_| broadcast != 0) else {
        return Ok(had_attributes.then(|| "dropped legacy broadcast attributes".to_string()));
    };
    if node.input.len() < 2 {
        return Err(ctx.unsupported(node, "broadcast requires two inputs"));
    }
    let rank_a = ctx.facts(&node.input[0]).rank;
    let rank_b = ctx.facts(&node.input[1]).rank;
    let (Some(rank_a), Some(rank_b)) = (rank_a, rank_b) else {
        return Err(ctx.unsupported(node, "legacy broadcast axis needs known input ranks"));
    };
    let axis = if axis < 0 { axis + rank_a as i64 } else { axis };
    if axis < 0 || axis as usize + rank_b > rank_a {
        return Err(invalid_attribute(node, "axis", format!("{} does not fit ranks {} and {}", axis, rank_a, rank_b)));
    }
    let trailing = rank_a - axis as usize - rank_b;
    if rank_b == 0 || trailing == 0 {
        return Ok(Some("dropped legacy broadcast attributes".to_string()));
    }

    // Legacy broadcasting aligned B at `axis`; append unit dims so numpy rules match.
    let unsqueezed = ctx.fresh_name(&name_hint(node, "broadcast"));
    let axes = (rank_b..rank_b + trailing).map(|x| x as i64).collect();
    let unsqueeze_name = ctx.fresh_name(&name_hint(node, "unsqueeze"));
    ctx.push_node(onnx::NodeProto {
        name: unsqueeze_name,
        op_type: "Unsqueeze".to_string(),
        input: vec![node.input[1].clone()],
        output: vec![unsqueezed.clone()],
        attribute: vec![make_ints_attribute("axes", axes)],
        .. Default::default()
    });
    node.input[1] = unsqueezed;
    Ok(Some(format!("unsqueezed second input by {} trailing dims for numpy broadcasting", trailing)))
}

fn gemm_drop_broadcast(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    Ok(take_attribute(&mut node.attribute, "broadcast").map(|_| "dropped broadcast".to_string()))
}

fn drop_is_test(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    Ok(take_attribute(&mut node.attribute, "is_test").map(|_| "dropped is_test".to_string()))
}

fn batch_normalization_drop_spatial(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    match query_attribute_int(&node.attribute, "spatial") {
        Some(0) => Err(invalid_attribute(node, "spatial", "per-activation normalization has no equivalent")),
        _ => Ok(take_attribute(&mut node.attribute, "spatial").map(|_| "dropped spatial".to_string())),
    }
}

fn upsample_scale_attributes(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let height_scale = query_attribute_float(&node.attribute, "height_scale");
    let width_scale = query_attribute_float(&node.attribute, "width_scale");
    let (Some(height_scale), Some(width_scale)) = (height_scale, width_scale) else {
        return Ok(None);
    };
    take_attribute(&mut node.attribute, "height_scale");
    take_attribute(&mut node.attribute, "width_scale");
    set_attribute(&mut node.attribute, make_floats_attribute("scales", vec![1.0, 1.0, height_scale, width_scale]));
    if let Some(mode) = query_attribute_string(&node.attribute, "mode") {
        // Upsample-1 called linear interpolation "bilinear".
        if mode == "bilinear" {
            set_attribute(&mut node.attribute, make_string_attribute("mode", "linear"));
        }
    }
    Ok(Some("merged height_scale/width_scale into scales".to_string()))
}

fn upsample_scales_to_input(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let scales = query_attribute_floats(&node.attribute, "scales").ok_or_else(|| missing_attribute(node, "scales"))?;
    take_attribute(&mut node.attribute, "scales");
    let scales_input = ctx.constant(&name_hint(node, "scales"), float_tensor(scales));
    set_input(node, 1, scales_input);
    Ok(Some("moved scales attribute to input".to_string()))
}

fn scan_batch_axis(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    Err(ctx.unsupported(node, "Scan-8 batched semantics cannot be expressed by Scan-9"))
}

fn upsample_to_resize(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    node.op_type = "Resize".to_string();
    Ok(Some("replaced deprecated Upsample with Resize".to_string()))
}

fn slice_attributes_to_inputs(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let starts = query_attribute_ints(&node.attribute, "starts").ok_or_else(|| missing_attribute(node, "starts"))?;
    let ends = query_attribute_ints(&node.attribute, "ends").ok_or_else(|| missing_attribute(node, "ends"))?;
    let axes = query_attribute_ints(&node.attribute, "axes");
    for name in ["starts", "ends", "axes"] {
        take_attribute(&mut node.attribute, name);
    }
    let starts_input = ctx.constant(&name_hint(node, "starts"), int64_tensor(starts));
    set_input(node, 1, starts_input);
    let ends_input = ctx.constant(&name_hint(node, "ends"), int64_tensor(ends));
    set_input(node, 2, ends_input);
    if let Some(axes) = axes {
        let axes_input = ctx.constant(&name_hint(node, "axes"), int64_tensor(axes));
        set_input(node, 3, axes_input);
    }
    Ok(Some("moved starts/ends/axes attributes to inputs".to_string()))
}

fn topk_k_to_input(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let k = query_attribute_int(&node.attribute, "k").ok_or_else(|| missing_attribute(node, "k"))?;
    take_attribute(&mut node.attribute, "k");
    let k_input = ctx.constant(&name_hint(node, "k"), int64_tensor(vec![k]));
    set_input(node, 1, k_input);
    Ok(Some("moved k attribute to input".to_string()))
}

fn pad_attributes_to_inputs(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let pads = query_attribute_ints(&node.attribute, "pads").ok_or_else(|| missing_attribute(node, "pads"))?;
    let value = query_attribute_float(&node.attribute, "value");
    take_attribute(&mut node.attribute, "pads");
    take_attribute(&mut node.attribute, "value");
    let pads_input = ctx.constant(&name_hint(node, "pads"), int64_tensor(pads));
    set_input(node, 1, pads_input);
    if let Some(value) = value.filter(|x| *x != 0.0) {
        let elem_type = node.input.first().and_then(|x| ctx.facts(x).elem_type);
        let value_input = ctx.constant(&name_hint(node, "value"), scalar_like(elem_type, value));
        set_input(node, 2, value_input);
    }
    Ok(Some("moved pads/value attributes to inputs".to_string()))
}

fn clip_attributes_to_inputs(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let min = query_attribute_float(&node.attribute, "min");
    let max = query_attribute_float(&node.attribute, "max");
    take_attribute(&mut node.attribute, "min");
    take_attribute(&mut node.attribute, "max");
    if min.is_none() && max.is_none() {
        return Ok(None);
    }
    let elem_type = node.input.first().and_then(|x| ctx.facts(x).elem_type);
    if let Some(min) = min {
        let min_input = ctx.constant(&name_hint(node, "min"), scalar_like(elem_type, min));
        set_input(node, 1, min_input);
    }
    if let Some(max) = max {
        let max_input = ctx.constant(&name_hint(node, "max"), scalar_like(elem_type, max));
        set_input(node, 2, max_input);
    }
    Ok(Some("moved min/max attributes to inputs".to_string()))
}

fn resize_insert_roi(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    if node.input.len() < 2 {
        return Err(ctx.unsupported(node, "Resize-10 requires a scales input"));
    }
    let roi = ctx.constant(&name_hint(node, "roi"), float_tensor(vec![]));
    node.input.insert(1, roi);
    // Resize-10 maps output coordinates with x_in = x_out / scale.
    if !has_attribute(&node.attribute, "coordinate_transformation_mode") {
        node.attribute.push(make_string_attribute("coordinate_transformation_mode", "asymmetric"));
    }
    let mode = query_attribute_string(&node.attribute, "mode").unwrap_or_else(|| "nearest".to_string());
    if mode == "nearest" && !has_attribute(&node.attribute, "nearest_mode") {
        node.attribute.push(make_string_attribute("nearest_mode", "floor"));
    }
    Ok(Some("inserted empty roi input and pinned Resize-10 coordinate mapping".to_string()))
}

fn scatter_to_scatter_elements(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    node.op_type = "ScatterElements".to_string();
    Ok(Some("replaced deprecated Scatter with ScatterElements".to_string()))
}

fn dropout_ratio_to_input(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let Some(ratio) = query_attribute_float(&node.attribute, "ratio") else {
        return Ok(None);
    };
    take_attribute(&mut node.attribute, "ratio");
    let ratio_input = ctx.constant(&name_hint(node, "ratio"), scalar_like(None, ratio));
    set_input(node, 1, ratio_input);
    Ok(Some("moved ratio attribute to input".to_string()))
}

fn split_to_input(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let Some(split) = query_attribute_ints(&node.attribute, "split") else {
        return Ok(None);
    };
    take_attribute(&mut node.attribute, "split");
    let split_input = ctx.constant(&name_hint(node, "split"), int64_tensor(split));
    set_input(node, 1, split_input);
    Ok(Some("moved split attribute to input".to_string()))
}

fn axes_to_input(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let Some(axes) = query_attribute_ints(&node.attribute, "axes") else {
        if node.op_type == "Unsqueeze" {
            return Err(missing_attribute(node, "axes"));
        }
        return Ok(None);
    };
    take_attribute(&mut node.attribute, "axes");
    let axes_input = ctx.constant(&name_hint(node, "axes"), int64_tensor(axes));
    set_input(node, 1, axes_input);
    Ok(Some("moved axes attribute to input".to_string()))
}

fn resize_drop_tf_half_pixel(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    match query_attribute_string(&node.attribute, "coordinate_transformation_mode").as_deref() {
        Some("tf_half_pixel_for_nn") => Err(ctx.unsupported(node, "coordinate_transformation_mode tf_half_pixel_for_nn was removed")),
        _ => Ok(None),
    }
}

/// RoiAlign-10 always sampled with the output_half_pixel mapping; 16 made it
/// an attribute defaulting to half_pixel.
fn roi_align_pin_output_half_pixel(node: &mut onnx::NodeProto, _ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    if has_attribute(&node.attribute, "coordinate_transformation_mode") {
        return Ok(None);
    }
    node.attribute.push(make_string_attribute("coordinate_transformation_mode", "output_half_pixel"));
    Ok(Some("pinned RoiAlign-10 coordinate_transformation_mode=output_half_pixel".to_string()))
}

/// Before version 13 the softmax family coerced its input to 2D around `axis`
/// (default 1). From 13 on, `axis` (default -1) names the single reduced
/// dimension. The two agree when `axis` is the innermost dimension; otherwise
/// the old behaviour is rebuilt as Flatten -> op(axis=1) -> Reshape.
fn softmax_coerced_axis(node: &mut onnx::NodeProto, ctx: &mut RewriteContext) -> Result<Option<String>, ConversionError> {
    let axis = query_attribute_int(&node.attribute, "axis").unwrap_or(1);
    let input = node.input.first().cloned().ok_or_else(|| ctx.unsupported(node, "missing input"))?;
    let innermost = match ctx.facts(&input).rank {
        Some(rank) => axis == -1 || axis == rank as i64 - 1,
        None => axis == -1,
    };
    if innermost {
        set_attribute(&mut node.attribute, make_int_attribute("axis", axis));
        return Ok(Some(format!("made axis={} explicit", axis)));
    }

    let flattened = ctx.fresh_name(&name_hint(node, "flat"));
    let flatten_name = ctx.fresh_name(&name_hint(node, "flatten"));
    ctx.push_node(onnx::NodeProto {
        name: flatten_name,
        op_type: "Flatten".to_string(),
        input: vec![input.clone()],
        output: vec![flattened.clone()],
        attribute: vec![make_int_attribute("axis", axis)],
        .. Default::default()
    });
    let normalized = ctx.fresh_name(&name_hint(node, "normalized"));
    let inner_name = ctx.fresh_name(&name_hint(node, "inner"));
    ctx.push_node(onnx::NodeProto {
        name: inner_name,
        op_type: node.op_type.clone(),
        input: vec![flattened],
        output: vec![normalized.clone()],
        attribute: vec![make_int_attribute("axis", 1)],
        .. Default::default()
    });
    let shape = ctx.fresh_name(&name_hint(node, "shape"));
    let shape_name = ctx.fresh_name(&name_hint(node, "shape_of"));
    ctx.push_node(onnx::NodeProto {
        name: shape_name,
        op_type: "Shape".to_string(),
        input: vec![input],
        output: vec![shape.clone()],
        .. Default::default()
    });

    let op_type = std::mem::replace(&mut node.op_type, "Reshape".to_string());
    node.input = vec![normalized, shape];
    node.attribute.clear();
    Ok(Some(format!("rebuilt 2D-coerced {} around axis {} with Flatten/Reshape", op_type, axis)))
}
