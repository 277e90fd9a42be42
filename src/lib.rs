pub mod config;
pub mod logging;
pub mod ort_tool;
pub mod paths;
pub mod pipeline;

pub use config::ConvertConfig;
pub use onnx_opset;
pub use pipeline::{run, ConversionReport, PipelineError};
