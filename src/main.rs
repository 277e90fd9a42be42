use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use onnx_ort_convert::{pipeline, ConversionReport, ConvertConfig, PipelineError};

fn run(config: &ConvertConfig) -> anyhow::Result<ConversionReport> {
    let report = pipeline::run(config)
        .with_context(|| format!("Converting {} failed", config.infile))?;
    Ok(report)
}

fn main() -> ExitCode {
    let config = ConvertConfig::parse();
    if let Err(err) = onnx_ort_convert::logging::init(config.verbose) {
        eprintln!("Failed to initialize logging: {}", err);
    }

    match run(&config) {
        Ok(report) => {
            match &report.ort_model {
                Some(ort_model) => tracing::info!("Done: {}", ort_model.display()),
                None => tracing::info!("Done: {}", report.upgraded_model.display()),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{:#}", err);
            let code = err.downcast_ref::<PipelineError>()
                .map(|err| err.exit_code())
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
