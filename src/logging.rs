use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the stderr subscriber. `RUST_LOG` wins over `verbose` when set.
/// Records emitted through the `log` facade are forwarded as well.
pub fn init(verbose: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let default_directives = if verbose {
        "onnx_ort_convert=debug,onnx_opset=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()
}
