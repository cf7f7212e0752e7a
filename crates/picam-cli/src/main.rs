//! picam - video and still capture on the camera pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use picam_engine::{
    init_still_pipeline, init_video_pipeline, EncodedFrame, EventSink, SessionControls,
};
use picam_mmal::sim::{SimConfig, SimulatedHardware};
use picam_mmal::Host;
use picam_types::{
    command_channel, event_channel, signal_channel, FrameNextMethod, PipelineEvent, StillConfig,
    VideoConfig, WaitMethod,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod inputs;
mod output;

use output::SegmentWriter;

#[derive(Parser)]
#[command(name = "picam")]
#[command(about = "Video and still capture for the Raspberry Pi camera pipeline")]
#[command(version)]
struct Cli {
    /// Session to run
    #[arg(short, long, value_enum, default_value_t = Mode::Video)]
    mode: Mode,

    /// Session configuration (JSON); defaults apply to missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file pattern, `%d` or `%04d` is replaced by the segment or frame number
    #[arg(short, long)]
    output: Option<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Video,
    Still,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "picam=debug,picam_engine=debug,picam_camera=debug,picam_encoder=debug,picam_mmal=debug"
    } else {
        "picam=info,picam_engine=info,picam_camera=info,picam_encoder=info,picam_mmal=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before any thread exists, so every thread inherits the mask.
    #[cfg(unix)]
    let user_signals = inputs::block_user_signals()?;

    let (signal_tx, signal_rx) = signal_channel();
    #[cfg(unix)]
    user_signals.spawn_listener(signal_tx);
    #[cfg(not(unix))]
    drop(signal_tx);

    let (command_tx, command_rx) = command_channel();
    let controls = SessionControls::new()
        .with_commands(command_rx)
        .with_signals(signal_rx);
    inputs::install_ctrlc(controls.abort_flag())?;

    match cli.mode {
        Mode::Video => {
            let config: VideoConfig = load_config(cli.config.as_deref())?;
            init_logging(cli.verbose || config.common.verbose);
            if config.wait_method == WaitMethod::Keypress {
                inputs::spawn_stdin_reader(command_tx);
            }
            run_video(config, &controls, cli.output)
        }
        Mode::Still => {
            let config: StillConfig = load_config(cli.config.as_deref())?;
            init_logging(cli.verbose || config.common.verbose);
            if config.frame_next == FrameNextMethod::Keypress {
                inputs::spawn_stdin_reader(command_tx);
            }
            run_still(config, &controls, cli.output)
        }
    }
}

fn simulated_host() -> Host {
    Host::new(Arc::new(SimulatedHardware::new(SimConfig::default())))
}

/// Log pipeline events until the session drops its sender.
fn spawn_event_logger(rx: Receiver<PipelineEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            match event {
                PipelineEvent::StateChanged { current, .. } => debug!("State: {}", current.name()),
                PipelineEvent::CaptureToggled { capturing } => debug!(capturing, "Capture toggled"),
                PipelineEvent::SegmentRotated { segment } => info!(segment, "New segment"),
                PipelineEvent::StillCaptured { frame, bytes } => info!(frame, bytes, "Still captured"),
                PipelineEvent::ZoomChanged { roi } => {
                    info!("Zoom {:.3},{:.3} {:.3}x{:.3}", roi.x, roi.y, roi.w, roi.h)
                }
                PipelineEvent::Metrics(m) => info!(
                    frames = m.frames_delivered,
                    bytes = m.bytes_delivered,
                    stills = m.stills_captured,
                    skipped = m.skipped_buffers,
                    segments = m.segments_rotated,
                    uptime = m.uptime_seconds,
                    "Session metrics"
                ),
                PipelineEvent::Error {
                    recoverable: true,
                    message,
                } => warn!("{}", message),
                PipelineEvent::Error { message, .. } => error!("{}", message),
            }
        }
    })
}

fn run_video(config: VideoConfig, controls: &SessionControls, output: Option<String>) -> Result<()> {
    let host = simulated_host();
    let (event_tx, event_rx) = event_channel();
    let logger = spawn_event_logger(event_rx);

    let mut session = init_video_pipeline(&host, config, EventSink::new(event_tx))
        .context("Failed to create video pipeline")?;

    // Frames arrive on the dispatch worker; a write failure stops the session.
    let (frame_tx, writer) = match output {
        Some(pattern) => {
            let (tx, rx) = crossbeam_channel::bounded::<EncodedFrame>(64);
            let abort = controls.clone();
            let handle = thread::spawn(move || -> Result<()> {
                let mut writer = SegmentWriter::new(pattern);
                for frame in rx {
                    if let Err(e) = writer.write(&frame) {
                        abort.abort();
                        return Err(e);
                    }
                }
                writer.finish()
            });
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };
    let result = session.start_capture(controls, move |frame| {
        if let Some(tx) = &frame_tx {
            if tx.send(frame).is_err() {
                debug!("Frame writer closed");
            }
        }
    });

    session.teardown();
    let written = match writer {
        Some(handle) => handle
            .join()
            .map_err(|_| anyhow::anyhow!("Frame writer panicked"))?,
        None => Ok(()),
    };
    if logger.join().is_err() {
        warn!("Event logger panicked");
    }

    let metrics = result.context("Video capture failed")?;
    written?;
    info!(frames = metrics.frames_delivered, "Done");
    Ok(())
}

fn run_still(config: StillConfig, controls: &SessionControls, output: Option<String>) -> Result<()> {
    let host = simulated_host();
    let (event_tx, event_rx) = event_channel();
    let logger = spawn_event_logger(event_rx);

    let mut session = init_still_pipeline(&host, config, EventSink::new(event_tx))
        .context("Failed to create still pipeline")?;

    let mut write_error = None;
    let result = session.capture_loop(controls, |image| {
        let Some(pattern) = output.as_deref() else {
            return;
        };
        match output::write_still(pattern, image.frame, &image.data) {
            Ok(path) => debug!(path = %path.display(), "Still written"),
            Err(e) => {
                controls.abort();
                write_error = Some(e);
            }
        }
    });

    session.teardown();
    if logger.join().is_err() {
        warn!("Event logger panicked");
    }

    let metrics = result.context("Still capture failed")?;
    if let Some(e) = write_error {
        return Err(e);
    }
    info!(stills = metrics.stills_captured, "Done");
    Ok(())
}
