use clap::Parser;
/// 边缘目标计数代理 - 4线程架构
///
/// 主程序入口 - 直接运行: cargo run --bin edge-counter --release -- --source frames/
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{info, warn};

use edge_counter::input::{FrameSource, ImageFolderSource};
use edge_counter::upload::{BackendSink, DocumentSink, DocumentStatusReporter, TelemetrySink};
use edge_counter::{
    open_backend, telemetry, AgentConfig, Args, ControlCell, DurableBuffer, Pipeline,
    PipelineParts,
};

const RETENTION_DAY: Duration = Duration::from_secs(24 * 3600);

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_level);

    let config = AgentConfig::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    info!(
        camera = %config.camera_id,
        site = %config.site_id,
        classes = ?config.detection_config.object_classes,
        "configuration loaded"
    );

    let Some(source_dir) = args.source.as_deref() else {
        bail!("no frame source given (use --source <dir>)");
    };
    let source: Box<dyn FrameSource> = Box::new(
        ImageFolderSource::open(source_dir)
            .with_context(|| format!("failed to open frame source {}", source_dir.display()))?,
    );

    let backend = open_backend(&config.detection_config).context("failed to load model")?;

    let retention = RETENTION_DAY * config.storage_config.retention_days;
    let buffer = Arc::new(
        DurableBuffer::open(config.journal_path(), retention)
            .context("failed to open local buffer")?,
    );
    info!(
        path = %buffer.path().display(),
        pending = buffer.pending_count(),
        "local buffer ready"
    );

    let control = Arc::new(ControlCell::new(
        args.auto_start || config.api_config.auto_start,
    ));
    if let Some(url) = args.backend_url.as_deref() {
        control.set_backend_target(
            url,
            args.backend_api_key.clone(),
            Duration::from_secs(args.report_interval),
        );
    }

    let timeout = config.transmission_config.request_timeout();
    let sinks: Vec<Box<dyn TelemetrySink>> = vec![
        Box::new(DocumentSink::new(
            config.sink_config.document_store_url.clone(),
            config.sink_config.document_store_token.clone(),
            timeout,
        )),
        Box::new(BackendSink::new(control.clone(), timeout)),
    ];
    let reporter = DocumentStatusReporter::new(
        config.sink_config.document_store_url.clone(),
        config.sink_config.document_store_token.clone(),
        &config.camera_id,
        timeout,
    );

    let grace = config.pipeline_config.shutdown_grace();
    let pipeline = Pipeline::start(PipelineParts {
        config,
        source,
        backend,
        buffer,
        sinks,
        reporter: Some(Box::new(reporter)),
        control,
    })?;

    static CTRL_HANDLER: Once = Once::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let status_every = Duration::from_secs(args.status_interval.max(1));
    let mut last_status = Instant::now();
    while !shutdown.load(Ordering::SeqCst) && pipeline.is_running() {
        thread::sleep(Duration::from_millis(200));
        if last_status.elapsed() >= status_every {
            last_status = Instant::now();
            let status = pipeline.status();
            info!(
                fps = %format!("{:.1}", status.fps),
                processed = status.total_frames_processed,
                dropped = status.frames_dropped,
                tracks = status.active_tracks,
                errors = status.error_count,
                pending = status.pending_records,
                active = status.detection_active,
                "status"
            );
        }
    }

    let report = pipeline.shutdown(grace);
    if !report.detached.is_empty() {
        warn!(threads = ?report.detached, "some workers were abandoned at shutdown");
    }
    Ok(())
}
