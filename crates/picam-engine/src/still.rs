//! One-shot still capture sessions.

use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use picam_mmal::{Host, Parameter, PortFeeder, PortRef};
use picam_types::{
    PipelineEvent, PipelineKind, SessionMetrics, SessionState, StillConfig, StopReason,
};
use tracing::{debug, error, info, instrument, warn};

use crate::controls::{SessionControls, ABORT_INTERVAL};
use crate::dispatch::{spawn_still_worker, StillImage, StillRequest};
use crate::error::{HalContext, PipelineError};
use crate::events::EventSink;
use crate::metrics::MetricsCollector;
use crate::pacing::{still_pacer, Pace};
use crate::state::{Blueprint, PipelineState};
use crate::PipelineResult;

/// A built still pipeline: camera preview output into the preview sink,
/// camera capture output into the image encoder.
pub struct StillSession {
    state: PipelineState,
    config: StillConfig,
    metrics: Arc<MetricsCollector>,
}

/// Bring up the host and build a still pipeline.
///
/// On failure nothing built so far remains on the hardware.
#[instrument(name = "init_still_pipeline", skip_all)]
pub fn init_still_pipeline(
    host: &Host,
    mut config: StillConfig,
    events: EventSink,
) -> PipelineResult<StillSession> {
    host.bring_up().stage("Failed to bring up host")?;
    let graph = host.graph().stage("Failed to create pipeline graph")?;

    let state = PipelineState::initialize(graph, Blueprint::Still(&mut config), events)?;
    state.events().transition_to(SessionState::Ready {
        kind: PipelineKind::Still,
    });

    Ok(StillSession {
        state,
        config,
        metrics: Arc::new(MetricsCollector::new()),
    })
}

/// Ports touched by each capture.
#[derive(Clone, Copy)]
struct CapturePorts {
    capture: PortRef,
    control: PortRef,
    encoder_output: PortRef,
}

impl StillSession {
    /// Capture frames as paced by `config.frame_next` until the pacer
    /// stops or `controls` is aborted.
    ///
    /// `on_image` runs on the calling thread once per completed image.
    #[instrument(name = "still_capture", skip_all)]
    pub fn capture_loop<F>(
        &mut self,
        controls: &SessionControls,
        mut on_image: F,
    ) -> PipelineResult<SessionMetrics>
    where
        F: FnMut(&StillImage),
    {
        let events = self.state.events().clone();
        let camera = self.state.camera()?;
        let ports = CapturePorts {
            capture: camera.capture_port(),
            control: camera.control_port(),
            encoder_output: self.state.encoder()?.output_port(),
        };

        self.metrics = Arc::new(MetricsCollector::new());
        self.metrics.start();
        events.transition_to(SessionState::Capturing {
            kind: PipelineKind::Still,
        });

        let mut pacer = still_pacer(&self.config);
        let mut frame = u64::from(self.config.frame_start);

        let result = loop {
            let pace = pacer.wait_next(&mut frame, controls);
            if pace == Pace::Stop || controls.is_aborted() {
                break Ok(());
            }

            let index = if self.config.timestamp {
                u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
            } else {
                frame
            };

            match self.capture_one(index, ports, controls) {
                Ok(Some(image)) => self.deliver(&image, &mut on_image),
                Ok(None) => debug!(frame = index, "Capture abandoned"),
                Err(e) => break Err(e),
            }

            if pace == Pace::Last {
                break Ok(());
            }
        };

        let reason = match &result {
            Err(e) => {
                events.send(PipelineEvent::Error {
                    recoverable: false,
                    message: e.to_string(),
                });
                StopReason::Failed {
                    message: e.to_string(),
                }
            }
            Ok(()) if controls.is_aborted() => StopReason::Aborted,
            Ok(()) => StopReason::Completed,
        };
        info!("{}", reason.message());
        self.state.set_stop_reason(reason);

        let snapshot = self.metrics.snapshot();
        self.metrics.stop();
        events.send(PipelineEvent::Metrics(snapshot.clone()));
        events.transition_to(SessionState::Ready {
            kind: PipelineKind::Still,
        });

        result.map(|()| snapshot)
    }

    fn deliver<F>(&self, image: &StillImage, on_image: &mut F)
    where
        F: FnMut(&StillImage),
    {
        on_image(image);
        self.metrics.record_still(image.data.len());

        let events = self.state.events();
        events.send(PipelineEvent::StillCaptured {
            frame: image.frame,
            bytes: image.data.len(),
        });
        if image.truncated {
            let err = PipelineError::TransmissionFailed { frame: image.frame };
            warn!("{}", err);
            events.send(PipelineEvent::Error {
                recoverable: true,
                message: err.to_string(),
            });
        }
    }

    /// Take one picture.
    ///
    /// Returns `None` when the session was aborted before the image
    /// completed.
    fn capture_one(
        &mut self,
        frame: u64,
        ports: CapturePorts,
        controls: &SessionControls,
    ) -> PipelineResult<Option<StillImage>> {
        self.prepare_capture(ports);

        let output = ports.encoder_output;
        let rx = self
            .state
            .graph_mut()
            .enable_output(output)
            .stage("Failed to enable encoder output port")?;
        let feeder = match self.state.graph().feeder(output) {
            Ok(feeder) => feeder,
            Err(e) => {
                self.disable_output(output);
                return Err(e).stage("Failed to attach encoder output pool");
            }
        };

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let worker = spawn_still_worker(
            rx,
            feeder.clone(),
            StillRequest::new(frame),
            done_tx,
            controls.abort_flag(),
            Arc::clone(&self.metrics),
        );

        let result = self
            .trigger(&feeder, ports, frame)
            .map(|()| wait_for_image(&done_rx, controls));

        self.disable_output(output);
        if worker.join().is_err() {
            error!("Still dispatch worker panicked");
        }
        result
    }

    /// Per-capture settings. None of them are fatal.
    fn prepare_capture(&self, ports: CapturePorts) {
        let graph = self.state.graph();

        if let Err(e) = graph.set_parameter(ports.encoder_output, &Parameter::ExifDisable(true)) {
            warn!("Unable to disable EXIF: {}", e);
        }
        if self.config.raw {
            if let Err(e) = graph.set_parameter(ports.capture, &Parameter::EnableRawCapture(true)) {
                error!("RAW was requested, but failed to enable: {}", e);
            }
        }
        let shutter = Parameter::ShutterSpeed(self.config.camera.shutter_speed);
        if let Err(e) = graph.set_parameter(ports.control, &shutter) {
            error!("Unable to set shutter speed: {}", e);
        }
    }

    fn trigger(&self, feeder: &PortFeeder, ports: CapturePorts, frame: u64) -> PipelineResult<()> {
        let queued = feeder
            .prime()
            .stage("Unable to send buffers to encoder output port")?;
        debug!(queued, "Encoder output primed");

        let graph = self.state.graph();
        if self.config.burst {
            if let Err(e) = graph.set_parameter(ports.control, &Parameter::Burst(true)) {
                warn!("Unable to enable burst mode: {}", e);
            }
        }

        graph
            .set_parameter(ports.capture, &Parameter::Capture(true))
            .stage("Failed to start capture")?;
        info!(frame, "Capturing");
        Ok(())
    }

    fn disable_output(&mut self, port: PortRef) {
        if let Err(e) = self.state.graph_mut().disable_port(port) {
            warn!(%port, "Failed to disable encoder output port: {}", e);
        }
    }

    /// Counters for the current or last run.
    pub fn metrics(&self) -> SessionMetrics {
        self.metrics.snapshot()
    }

    /// The effective configuration, after sensor defaults.
    pub fn config(&self) -> &StillConfig {
        &self.config
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Release every hardware resource held by the session.
    pub fn teardown(mut self) {
        self.state.teardown();
    }
}

/// Block until the image completes, checking for abort.
fn wait_for_image(done: &Receiver<StillImage>, controls: &SessionControls) -> Option<StillImage> {
    loop {
        match done.recv_timeout(ABORT_INTERVAL) {
            Ok(image) => return Some(image),
            Err(RecvTimeoutError::Timeout) if controls.is_aborted() => return None,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}
