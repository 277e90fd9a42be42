use crate::onnx;

/// Highest default-domain opset the converter knows how to reach. GridSample
/// and DFT change at 20 and GroupNormalization at 21, none of which are adapted.
pub const MAX_SUPPORTED_OPSET: i64 = 19;

pub const DEFAULT_DOMAIN: &str = "";
pub const DEFAULT_DOMAIN_ALIAS: &str = "ai.onnx";

pub fn is_default_domain(domain: &str) -> bool {
    domain == DEFAULT_DOMAIN || domain == DEFAULT_DOMAIN_ALIAS
}

/// Minimum IR version able to carry a model importing the given default-domain opset.
pub fn min_ir_version_for_opset(opset: i64) -> i64 {
    use onnx::Version;
    let version = match opset {
        ..=2 => Version::IrVersion20171010,
        3..=6 => Version::IrVersion20171030,
        7..=8 => Version::IrVersion2017113,
        9 => Version::IrVersion2019122,
        10 => Version::IrVersion2019318,
        11 => Version::IrVersion2019919,
        12..=14 => Version::IrVersion202058,
        15..=18 => Version::IrVersion2021730,
        19..=20 => Version::IrVersion202355,
        _ => Version::IrVersion2024325,
    };
    version as i64
}

pub fn default_opset_version(opset_import: &[onnx::OperatorSetIdProto]) -> Option<i64> {
    opset_import.iter()
        .find(|opset| is_default_domain(&opset.domain))
        .map(|opset| opset.version)
}

pub fn default_opset_mut(opset_import: &mut [onnx::OperatorSetIdProto]) -> Option<&mut onnx::OperatorSetIdProto> {
    opset_import.iter_mut().find(|opset| is_default_domain(&opset.domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_table_matches_release_history() {
        assert_eq!(min_ir_version_for_opset(7), 3);
        assert_eq!(min_ir_version_for_opset(11), 6);
        assert_eq!(min_ir_version_for_opset(13), 7);
        assert_eq!(min_ir_version_for_opset(17), 8);
        assert_eq!(min_ir_version_for_opset(21), 10);
    }

    #[test]
    fn default_domain_accepts_alias() {
        let imports = vec![
            onnx::OperatorSetIdProto { domain: "com.microsoft".to_string(), version: 1 },
            onnx::OperatorSetIdProto { domain: "ai.onnx".to_string(), version: 9 },
        ];
        assert_eq!(default_opset_version(&imports), Some(9));
        assert_eq!(default_opset_version(&imports[..1]), None);
    }
}
