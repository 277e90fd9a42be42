use std::path::{Path, PathBuf};

use clap::Parser;

use crate::ort_tool::{OptimizationStyle, OrtConversionCommand, TargetPlatform};

pub const DEFAULT_TARGET_OPSET: i64 = 17;
pub const DEFAULT_PYTHON: &str = "python3";

/// Upgrade an ONNX model's opset and convert it to the ORT format.
#[derive(Parser, Debug, Clone)]
#[command(name = "onnx-ort-convert", version, about)]
pub struct ConvertConfig {
    /// ONNX model to convert
    #[arg(long)]
    pub infile: String,

    /// Directory receiving the upgraded model and the ORT artifact
    #[arg(long)]
    pub outdir: PathBuf,

    /// Default-domain opset to upgrade the model to
    #[arg(long, env = "ONNX_ORT_TARGET_OPSET", default_value_t = DEFAULT_TARGET_OPSET)]
    pub target_opset: i64,

    /// Python interpreter with onnxruntime installed
    #[arg(long, env = "ONNX_ORT_PYTHON", default_value = DEFAULT_PYTHON)]
    pub python: String,

    /// Optimization style passed to the ORT converter
    #[arg(long, env = "ONNX_ORT_OPTIMIZATION_STYLE", value_enum, ignore_case = true, default_value_t = OptimizationStyle::Fixed)]
    pub optimization_style: OptimizationStyle,

    /// Target platform for the ORT converter's optimizations
    #[arg(long, value_enum, ignore_case = true)]
    pub target_platform: Option<TargetPlatform>,

    /// Record required operator types for a reduced runtime build
    #[arg(long)]
    pub enable_type_reduction: bool,

    /// Also save the optimized ONNX model produced by the ORT converter
    #[arg(long)]
    pub save_optimized_onnx_model: bool,

    /// Stop after writing the upgraded ONNX model
    #[arg(long)]
    pub skip_ort: bool,

    /// Write a JSON conversion report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl ConvertConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(infile: &str, outdir: &Path) -> Self {
        Self {
            infile: infile.to_string(),
            outdir: outdir.to_path_buf(),
            target_opset: DEFAULT_TARGET_OPSET,
            python: DEFAULT_PYTHON.to_string(),
            optimization_style: OptimizationStyle::Fixed,
            target_platform: None,
            enable_type_reduction: false,
            save_optimized_onnx_model: false,
            skip_ort: false,
            report: None,
            verbose: false,
        }
    }

    pub fn ort_command(&self, model: &Path) -> OrtConversionCommand {
        OrtConversionCommand {
            optimization_style: self.optimization_style,
            target_platform: self.target_platform,
            enable_type_reduction: self.enable_type_reduction,
            save_optimized_onnx_model: self.save_optimized_onnx_model,
            .. OrtConversionCommand::new(&self.python, model, &self.outdir)
        }
    }
}
