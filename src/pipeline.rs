use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use onnx_opset::model_io::{self, ModelIoError};
use onnx_opset::{ConversionError, ConversionSummary};

use crate::config::ConvertConfig;
use crate::ort_tool::OrtToolError;
use crate::paths;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    ModelIo(#[from] ModelIoError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    OrtTool(#[from] OrtToolError),
    #[error("Failed to create output directory {path}: {source}")]
    CreateOutputDir { path: String, source: std::io::Error },
    #[error("External data location {location:?} escapes the model directory")]
    ExternalDataOutsideModelDir { location: String },
    #[error("Failed to copy external data {from} to {to}: {source}")]
    CopyExternalData { from: String, to: String, source: std::io::Error },
    #[error("Failed to write report {path}: {source}")]
    WriteReport { path: String, source: std::io::Error },
    #[error(transparent)]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("ORT conversion tool failed with exit code {code}")]
    OrtToolFailed { code: i32 },
    #[error("ORT conversion tool was terminated without an exit code")]
    OrtToolTerminated,
}

impl PipelineError {
    /// Process exit code for this failure: the tool's own code when it failed, otherwise 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::OrtToolFailed { code } => *code,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    pub input: String,
    pub upgraded_model: PathBuf,
    pub ort_model: Option<PathBuf>,
    pub ort_exit_code: Option<i32>,
    pub external_data: Vec<String>,
    pub summary: ConversionSummary,
}

fn create_output_dir(outdir: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(outdir).map_err(|source| PipelineError::CreateOutputDir {
        path: outdir.display().to_string(),
        source,
    })
}

/// External data must stay below the model's directory on both sides of the copy.
fn check_external_data_location(location: &str) -> Result<(), PipelineError> {
    let escapes = Path::new(location).components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(PipelineError::ExternalDataOutsideModelDir { location: location.to_string() });
    }
    Ok(())
}

/// Copies external tensor files next to the upgraded model so its relative references still resolve.
fn copy_external_data(locations: &[String], source_dir: &Path, outdir: &Path) -> Result<(), PipelineError> {
    for location in locations {
        check_external_data_location(location)?;
        let from = source_dir.join(location);
        let to = outdir.join(location);
        if from == to || (to.exists() && same_file(&from, &to)) {
            continue;
        }
        if let Some(parent) = to.parent() {
            create_output_dir(parent)?;
        }
        tracing::info!("Copying external data {} to {}", from.display(), to.display());
        std::fs::copy(&from, &to).map_err(|source| PipelineError::CopyExternalData {
            from: from.display().to_string(),
            to: to.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn write_report(report: &ConversionReport, path: &Path) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).map_err(|source| PipelineError::WriteReport {
        path: path.display().to_string(),
        source,
    })
}

/// Upgrades `config.infile` to the target opset, saves it into `config.outdir`
/// and hands it to the ORT conversion tool.
pub fn run(config: &ConvertConfig) -> Result<ConversionReport, PipelineError> {
    let infile = Path::new(&config.infile);
    tracing::info!("Loading {}", infile.display());
    let original_model = model_io::load_model(infile)?;

    let (converted_model, summary) = onnx_opset::convert_version(&original_model, config.target_opset)?;
    for rewrite in &summary.rewrites {
        tracing::debug!("opset {} {} '{}': {}", rewrite.version, rewrite.op_type, rewrite.node, rewrite.action);
    }

    create_output_dir(&config.outdir)?;
    let upgraded_model = paths::upgraded_model_path(&config.infile, &config.outdir);
    model_io::save_model(&converted_model, &upgraded_model)?;
    tracing::info!("Saved opset {} model to {}", summary.target_opset, upgraded_model.display());

    let external_data: Vec<String> = model_io::external_data_locations(&converted_model).into_iter().collect();
    if !external_data.is_empty() {
        let source_dir = infile.parent().unwrap_or(Path::new(""));
        copy_external_data(&external_data, source_dir, &config.outdir)?;
    }

    let mut report = ConversionReport {
        input: config.infile.clone(),
        upgraded_model: upgraded_model.clone(),
        ort_model: None,
        ort_exit_code: None,
        external_data,
        summary,
    };

    if config.skip_ort {
        tracing::info!("Skipping ORT conversion");
    } else {
        let status = config.ort_command(&upgraded_model).run()?;
        report.ort_exit_code = status.code();
        match status.code() {
            Some(0) => {
                let ort_model = paths::expected_ort_path(&upgraded_model, config.optimization_style);
                if ort_model.exists() {
                    tracing::info!("Wrote {}", ort_model.display());
                } else {
                    tracing::warn!("ORT tool succeeded but {} was not found", ort_model.display());
                }
                report.ort_model = Some(ort_model);
            }
            Some(code) => return Err(PipelineError::OrtToolFailed { code }),
            None => return Err(PipelineError::OrtToolTerminated),
        }
    }

    if let Some(report_path) = &config.report {
        write_report(&report, report_path)?;
        tracing::info!("Wrote report to {}", report_path.display());
    }
    Ok(report)
}
