use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Python module that turns an ONNX model into the ORT format.
pub const ORT_CONVERTER_MODULE: &str = "onnxruntime.tools.convert_onnx_models_to_ort";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default,
    strum_macros::Display, strum_macros::EnumString, clap::ValueEnum)]
pub enum OptimizationStyle {
    /// Optimizations are applied once, at conversion time.
    #[default]
    Fixed,
    /// Some optimizations are deferred to model load time.
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq,
    strum_macros::Display, strum_macros::EnumString, clap::ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum TargetPlatform {
    Arm,
    Amd64,
}

#[derive(Debug, thiserror::Error)]
pub enum OrtToolError {
    #[error("Failed to launch {python}: {source}")]
    Spawn { python: String, source: std::io::Error },
}

#[derive(Debug, Clone)]
pub struct OrtConversionCommand {
    pub python: String,
    pub model: PathBuf,
    pub output_dir: PathBuf,
    pub optimization_style: OptimizationStyle,
    pub target_platform: Option<TargetPlatform>,
    pub enable_type_reduction: bool,
    pub save_optimized_onnx_model: bool,
}

impl OrtConversionCommand {
    pub fn new(python: &str, model: &Path, output_dir: &Path) -> Self {
        Self {
            python: python.to_string(),
            model: model.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            optimization_style: OptimizationStyle::default(),
            target_platform: None,
            enable_type_reduction: false,
            save_optimized_onnx_model: false,
        }
    }

    /// Arguments passed to the interpreter.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            ORT_CONVERTER_MODULE.into(),
            self.model.clone().into(),
            "--output_dir".into(),
            self.output_dir.clone().into(),
            "--optimization_style".into(),
            self.optimization_style.to_string().into(),
        ];
        if let Some(platform) = self.target_platform {
            args.push("--target_platform".into());
            args.push(platform.to_string().into());
        }
        if self.enable_type_reduction {
            args.push("--enable_type_reduction".into());
        }
        if self.save_optimized_onnx_model {
            args.push("--save_optimized_onnx_model".into());
        }
        args
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.python);
        command.args(self.args());
        command
    }

    /// Runs the tool with inherited stdio and blocks until it exits.
    pub fn run(&self) -> Result<ExitStatus, OrtToolError> {
        tracing::info!("Running {} -m {} on {}", self.python, ORT_CONVERTER_MODULE, self.model.display());
        tracing::debug!("ORT tool arguments: {:?}", self.args());
        let status = self.to_command()
            .status()
            .map_err(|source| OrtToolError::Spawn { python: self.python.clone(), source })?;
        tracing::debug!("ORT tool exited with {}", status);
        Ok(status)
    }
}
