use std::io::Write;

use appmesh_inject::{Meta, PodPatcher, TeraRenderer};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer, Registry,
};

/// Compiles a resolved pod mutation into the JSON patch returned by the App Mesh injector.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CommandArgs {
    /// YAML or JSON document describing the resolved mutation.
    #[arg(long)]
    with_meta_file: String,
    /// Pretty print the patch.
    #[arg(long)]
    pretty: bool,
    /// Also write logs to this file.
    #[arg(long)]
    log_file: Option<String>,
}

fn init_tracing_logging(log_file: Option<&str>) -> Option<WorkerGuard> {
    let console_filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()));
    let console_layer = fmt::layer()
        .event_format(fmt::format().compact())
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|meta| !meta.is_span()))
        .with_filter(console_filter);
    let registry = Registry::default().with(console_layer);

    if let Some(log_file) = log_file {
        let file_appender = tracing_appender::rolling::never(".", log_file);
        let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
        let file_filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_FILE_LOG").unwrap_or_else(|_| "debug".to_owned()));
        let file_layer = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_span_events(FmtSpan::NONE)
            .with_target(true)
            .with_ansi(false)
            .with_filter(filter::filter_fn(|meta| !meta.is_span()))
            .with_filter(file_filter);
        registry.with(file_layer).init();
        Some(guard)
    } else {
        registry.init();
        None
    }
}

fn main() -> appmesh_inject::Result<()> {
    let args = CommandArgs::parse();
    let _guard = init_tracing_logging(args.log_file.as_deref());

    let meta: Meta = serde_yaml::from_str(&std::fs::read_to_string(&args.with_meta_file)?)?;
    info!("Compiling patch for pod {} from {}", meta.pod_name(), args.with_meta_file);

    let patch = PodPatcher::new(TeraRenderer).compile(&meta)?;
    let output = if args.pretty { serde_json::to_string_pretty(&patch)? } else { serde_json::to_string(&patch)? };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{output}")?;
    Ok(())
}
