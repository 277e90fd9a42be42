pub mod onnx;
pub mod attributes;
pub mod model_io;
pub mod version;
pub mod converter;
mod adapters;

pub use converter::{convert_version, ConversionError, ConversionSummary, RewriteRecord};
pub use model_io::{load_model, save_model, ModelIoError};
