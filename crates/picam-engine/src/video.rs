//! Continuous video capture sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use picam_camera::zoom;
use picam_mmal::{Host, Parameter, PortRef};
use picam_types::{
    PipelineEvent, PipelineKind, SessionMetrics, SessionState, StopReason, VideoConfig,
};
use tracing::{debug, error, info, instrument, warn};

use crate::controls::SessionControls;
use crate::dispatch::{spawn_video_worker, EncodedFrame, Segmenter, VideoFrameAssembler};
use crate::error::HalContext;
use crate::events::EventSink;
use crate::metrics::MetricsCollector;
use crate::pacing::{video_pacer, SegmentCounter, Transition};
use crate::state::{Blueprint, PipelineState};
use crate::PipelineResult;

/// A built video pipeline: camera video output tunnelled into the video
/// encoder, whose output the application drains.
pub struct VideoSession {
    state: PipelineState,
    config: VideoConfig,
    metrics: Arc<MetricsCollector>,
}

/// Bring up the host and build a video pipeline.
///
/// On failure nothing built so far remains on the hardware.
#[instrument(name = "init_video_pipeline", skip_all)]
pub fn init_video_pipeline(
    host: &Host,
    mut config: VideoConfig,
    events: EventSink,
) -> PipelineResult<VideoSession> {
    host.bring_up().stage("Failed to bring up host")?;
    let graph = host.graph().stage("Failed to create pipeline graph")?;

    // Segments can only start on a codec header.
    if (config.split_wait || config.segment_size_ms > 0) && !config.inline_headers {
        info!("Enabling inline headers for segmented output");
        config.inline_headers = true;
    }

    let state = PipelineState::initialize(graph, Blueprint::Video(&mut config), events)?;
    state.events().transition_to(SessionState::Ready {
        kind: PipelineKind::Video,
    });

    Ok(VideoSession {
        state,
        config,
        metrics: Arc::new(MetricsCollector::new()),
    })
}

/// Ports and flags the toggle loop drives.
struct CaptureTargets {
    camera_port: PortRef,
    encoder_output: PortRef,
    split_now: Arc<AtomicBool>,
}

impl VideoSession {
    /// Run the capture state machine until it stops or `controls` is
    /// aborted, handing every encoded frame to `on_frame` on the dispatch
    /// worker.
    ///
    /// The encoder output is disabled and the worker joined before this
    /// returns, whether or not an error occurred.
    #[instrument(name = "video_capture", skip_all)]
    pub fn start_capture<F>(
        &mut self,
        controls: &SessionControls,
        on_frame: F,
    ) -> PipelineResult<SessionMetrics>
    where
        F: FnMut(EncodedFrame) + Send + 'static,
    {
        let events = self.state.events().clone();
        let targets = CaptureTargets {
            camera_port: self.state.camera()?.video_port(),
            encoder_output: self.state.encoder()?.output_port(),
            split_now: Arc::new(AtomicBool::new(false)),
        };

        let output = targets.encoder_output;
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

        self.metrics = Arc::new(MetricsCollector::new());
        self.metrics.start();
        events.transition_to(SessionState::Capturing {
            kind: PipelineKind::Video,
        });

        let segment_size =
            (self.config.segment_size_ms > 0).then(|| Duration::from_millis(self.config.segment_size_ms));
        let assembler = VideoFrameAssembler::new(Segmenter::new(
            SegmentCounter::new(self.config.segment_number, self.config.segment_wrap),
            segment_size,
            self.config.split_wait,
            Arc::clone(&targets.split_now),
        ));
        let worker = spawn_video_worker(
            rx,
            feeder.clone(),
            assembler,
            on_frame,
            Arc::clone(&self.metrics),
            events.clone(),
        );

        let result = feeder
            .prime()
            .stage("Unable to send buffers to encoder output port")
            .and_then(|queued| {
                debug!(queued, "Encoder output primed");
                self.run_toggle_loop(controls, &targets)
            });

        self.set_capture(targets.camera_port, false);
        self.disable_output(output);
        if worker.join().is_err() {
            error!("Video dispatch worker panicked");
        }

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
            kind: PipelineKind::Video,
        });

        result.map(|()| snapshot)
    }

    fn run_toggle_loop(
        &mut self,
        controls: &SessionControls,
        targets: &CaptureTargets,
    ) -> PipelineResult<()> {
        let mut pacer = video_pacer(&self.config);
        let camera = self.state.camera()?.id();
        let mut capturing = true;

        self.toggle(capturing, true, targets)?;
        loop {
            match pacer.next(capturing, controls) {
                Transition::Toggle => {
                    capturing = !capturing;
                    self.toggle(capturing, false, targets)?;
                }
                Transition::Zoom(command) => {
                    let mut roi = self.config.camera.roi;
                    match zoom(self.state.graph(), camera, command, &mut roi) {
                        Ok(_) => {
                            self.config.camera.roi = roi;
                            self.state.events().send(PipelineEvent::ZoomChanged { roi });
                        }
                        Err(e) => warn!("Zoom failed: {}", e),
                    }
                }
                Transition::Stop => return Ok(()),
            }
        }
    }

    /// Switch the camera video output between running and paused.
    fn toggle(&self, capturing: bool, initial: bool, targets: &CaptureTargets) -> PipelineResult<()> {
        let graph = self.state.graph();

        // Every resumed stream, the first one included, opens on an I-frame.
        if self.config.split_wait {
            if capturing {
                if let Err(e) =
                    graph.set_parameter(targets.encoder_output, &Parameter::RequestIFrame(true))
                {
                    warn!("Unable to request an I-frame: {}", e);
                }
            } else if !initial {
                targets.split_now.store(true, Ordering::SeqCst);
            }
        }

        graph
            .set_parameter(targets.camera_port, &Parameter::Capture(capturing))
            .stage("Failed to start capture")?;
        info!("{}", if capturing { "Capturing" } else { "Paused" });

        if !initial {
            self.metrics.record_toggle();
        }
        self.state
            .events()
            .send(PipelineEvent::CaptureToggled { capturing });
        Ok(())
    }

    fn set_capture(&self, port: PortRef, capturing: bool) {
        if let Err(e) = self
            .state
            .graph()
            .set_parameter(port, &Parameter::Capture(capturing))
        {
            warn!("Failed to stop capture: {}", e);
        }
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

    /// The effective configuration, after sensor defaults and zoom.
    pub fn config(&self) -> &VideoConfig {
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
