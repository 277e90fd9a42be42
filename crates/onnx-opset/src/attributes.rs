use crate::onnx;
use crate::onnx::attribute_proto::AttributeType;

pub fn query_attribute_float(attributes: &[onnx::AttributeProto], name: &str) -> Option<f32> {
    for attr in attributes {
        if attr.name == name && attr.r#type == AttributeType::Float as i32 {
            return Some(attr.f)
        }
    }
    None
}

pub fn query_attribute_int(attributes: &[onnx::AttributeProto], name: &str) -> Option<i64> {
    for attr in attributes {
        if attr.name == name && attr.r#type == AttributeType::Int as i32 {
            return Some(attr.i)
        }
    }
    None
}

pub fn query_attribute_ints(attributes: &[onnx::AttributeProto], name: &str) -> Option<Vec<i64>> {
    for attr in attributes {
        if attr.name == name && attr.r#type == AttributeType::Ints as i32 {
            return Some(attr.ints.clone())
        }
    }
    None
}

pub fn query_attribute_floats(attributes: &[onnx::AttributeProto], name: &str) -> Option<Vec<f32>> {
    for attr in attributes {
        if attr.name == name && attr.r#type == AttributeType::Floats as i32 {
            return Some(attr.floats.clone())
        }
    }
    None
}

pub fn query_attribute_string(attributes: &[onnx::AttributeProto], name: &str) -> Option<String> {
    for attr in attributes {
        if attr.name == name && attr.r#type == AttributeType::String as i32 {
            return Some(String::from_utf8_lossy(&attr.s).into_owned())
        }
    }
    None
}

/// Removes the named attribute and hands it back, if present.
pub fn take_attribute(attributes: &mut Vec<onnx::AttributeProto>, name: &str) -> Option<onnx::AttributeProto> {
    let idx = attributes.iter().position(|attr| attr.name == name)?;
    Some(attributes.remove(idx))
}

pub fn has_attribute(attributes: &[onnx::AttributeProto], name: &str) -> bool {
    attributes.iter().any(|attr| attr.name == name)
}

pub fn set_attribute(attributes: &mut Vec<onnx::AttributeProto>, attribute: onnx::AttributeProto) {
    match attributes.iter_mut().find(|attr| attr.name == attribute.name) {
        Some(existing) => *existing = attribute,
        None => attributes.push(attribute),
    }
}

pub fn make_int_attribute(name: &str, value: i64) -> onnx::AttributeProto {
    onnx::AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Int as i32,
        i: value,
        .. Default::default()
    }
}

pub fn make_ints_attribute(name: &str, values: Vec<i64>) -> onnx::AttributeProto {
    onnx::AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Ints as i32,
        ints: values,
        .. Default::default()
    }
}

pub fn make_floats_attribute(name: &str, values: Vec<f32>) -> onnx::AttributeProto {
    onnx::AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Floats as i32,
        floats: values,
        .. Default::default()
    }
}

pub fn make_float_attribute(name: &str, value: f32) -> onnx::AttributeProto {
    onnx::AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Float as i32,
        f: value,
        .. Default::default()
    }
}

pub fn make_string_attribute(name: &str, value: &str) -> onnx::AttributeProto {
    onnx::AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::String as i32,
        s: value.as_bytes().to_vec(),
        .. Default::default()
    }
}

pub fn make_tensor_attribute(name: &str, value: onnx::TensorProto) -> onnx::AttributeProto {
    onnx::AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Tensor as i32,
        t: Some(value),
        .. Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_respects_attribute_type() {
        let attrs = vec![make_int_attribute("axis", 2), make_float_attribute("ratio", 0.25)];
        assert_eq!(query_attribute_int(&attrs, "axis"), Some(2));
        assert_eq!(query_attribute_float(&attrs, "axis"), None);
        assert_eq!(query_attribute_float(&attrs, "ratio"), Some(0.25));
        assert_eq!(query_attribute_ints(&attrs, "axes"), None);
    }

    #[test]
    fn set_replaces_existing_and_take_removes() {
        let mut attrs = vec![make_string_attribute("mode", "nearest")];
        set_attribute(&mut attrs, make_string_attribute("mode", "linear"));
        assert_eq!(attrs.len(), 1);
        assert_eq!(query_attribute_string(&attrs, "mode").as_deref(), Some("linear"));

        let taken = take_attribute(&mut attrs, "mode").unwrap();
        assert_eq!(taken.s, b"linear");
        assert!(attrs.is_empty());
        assert!(take_attribute(&mut attrs, "mode").is_none());
    }
}
