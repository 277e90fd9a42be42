use std::path::{Path, PathBuf};

use crate::ort_tool::OptimizationStyle;

const ONNX_SUFFIX: &str = ".onnx";
const UPGRADED_SUFFIX: &str = "-upver.onnx";

/// Final path component of `path`, accepting both `/` and `\` as separators.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// File name of the upgraded intermediate model for `infile`.
///
/// Every `.onnx` in the base name becomes `-upver.onnx`. A name without
/// `.onnx` gets the suffix appended, so the intermediate never shadows a
/// file of the same name in the output directory.
pub fn upgraded_file_name(infile: &str) -> String {
    let name = basename(infile);
    if name.contains(ONNX_SUFFIX) {
        name.replace(ONNX_SUFFIX, UPGRADED_SUFFIX)
    } else {
        format!("{}{}", name, UPGRADED_SUFFIX)
    }
}

pub fn upgraded_model_path(infile: &str, outdir: &Path) -> PathBuf {
    outdir.join(upgraded_file_name(infile))
}

/// Where the ORT conversion tool writes its artifact for `model`.
pub fn expected_ort_path(model: &Path, style: OptimizationStyle) -> PathBuf {
    let stem = model.file_stem().map(|x| x.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = match style {
        OptimizationStyle::Fixed => format!("{}.ort", stem),
        OptimizationStyle::Runtime => format!("{}.with_runtime_opt.ort", stem),
    };
    model.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_handles_both_separators() {
        assert_eq!(basename("models/resnet.onnx"), "resnet.onnx");
        assert_eq!(basename(r"C:\models\resnet.onnx"), "resnet.onnx");
        assert_eq!(basename("resnet.onnx"), "resnet.onnx");
        assert_eq!(basename("dir/"), "");
    }

    #[test]
    fn upgraded_name_replaces_extension() {
        assert_eq!(upgraded_file_name("/data/yolo.onnx"), "yolo-upver.onnx");
        assert_eq!(upgraded_file_name(r"in\yolo.onnx"), "yolo-upver.onnx");
    }

    #[test]
    fn upgraded_name_replaces_every_occurrence() {
        assert_eq!(upgraded_file_name("a.onnx.onnx"), "a-upver.onnx-upver.onnx");
    }

    #[test]
    fn upgraded_name_without_extension_is_suffixed() {
        assert_eq!(upgraded_file_name("weights.pb"), "weights.pb-upver.onnx");
    }

    #[test]
    fn upgraded_path_lands_in_outdir() {
        assert_eq!(
            upgraded_model_path("in/model.onnx", Path::new("out")),
            Path::new("out").join("model-upver.onnx")
        );
    }

    #[test]
    fn ort_path_depends_on_style() {
        let model = Path::new("out").join("model-upver.onnx");
        assert_eq!(expected_ort_path(&model, OptimizationStyle::Fixed), Path::new("out").join("model-upver.ort"));
        assert_eq!(
            expected_ort_path(&model, OptimizationStyle::Runtime),
            Path::new("out").join("model-upver.with_runtime_opt.ort")
        );
    }
}
