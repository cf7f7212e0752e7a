//! Pipeline construction, rollback and ordered teardown.

use picam_camera::{
    apply_sensor_defaults, check_camera_model, create_preview, create_still_camera,
    create_video_camera, detect_sensor, CameraHandle,
};
use picam_encoder::{create_still_encoder, create_video_encoder, EncoderHandle};
use picam_mmal::{ComponentId, ConnectionId, Graph, HalError, PortRef, Status};
use picam_types::{
    CommonSettings, PipelineKind, SessionState, ShutdownPhase, StartupPhase, StillConfig,
    StopReason, VideoConfig,
};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{HalContext, PipelineError};
use crate::events::EventSink;
use crate::PipelineResult;

/// What to build.
pub(crate) enum Blueprint<'a> {
    Video(&'a mut VideoConfig),
    Still(&'a mut StillConfig),
}

impl Blueprint<'_> {
    fn kind(&self) -> PipelineKind {
        match self {
            Self::Video(_) => PipelineKind::Video,
            Self::Still(_) => PipelineKind::Still,
        }
    }

    fn common_mut(&mut self) -> &mut CommonSettings {
        match self {
            Self::Video(config) => &mut config.common,
            Self::Still(config) => &mut config.common,
        }
    }
}

/// Everything one session has built on the hardware.
///
/// Components are created in [`StartupPhase`] order. A failed phase rolls
/// back every earlier one, so a session either exists fully built or not
/// at all. Dropping the state tears it down.
pub struct PipelineState {
    kind: PipelineKind,
    graph: Graph,
    camera: Option<CameraHandle>,
    preview: Option<ComponentId>,
    encoder: Option<EncoderHandle>,
    preview_connection: Option<ConnectionId>,
    encoder_connection: Option<ConnectionId>,
    current_phase: Option<StartupPhase>,
    events: EventSink,
    stop_reason: StopReason,
    released: bool,
}

impl PipelineState {
    /// Build every phase in order.
    #[instrument(name = "init_pipeline", skip_all, fields(kind = blueprint.kind().name()))]
    pub(crate) fn initialize(
        graph: Graph,
        mut blueprint: Blueprint<'_>,
        events: EventSink,
    ) -> PipelineResult<Self> {
        let mut state = Self {
            kind: blueprint.kind(),
            graph,
            camera: None,
            preview: None,
            encoder: None,
            preview_connection: None,
            encoder_connection: None,
            current_phase: None,
            events,
            stop_reason: StopReason::Completed,
            released: false,
        };

        let mut phase = StartupPhase::FIRST;
        loop {
            state.current_phase = Some(phase);
            state.events.transition_to(SessionState::Starting { phase });

            if let Err(source) = state.init_phase(&mut blueprint, phase) {
                let err = PipelineError::Startup {
                    phase,
                    source: Box::new(source),
                };
                error!("{}", err);
                state.rollback();
                state.events.transition_to(SessionState::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        state.current_phase = None;
        info!(kind = state.kind.name(), "Pipeline built");
        Ok(state)
    }

    fn init_phase(&mut self, blueprint: &mut Blueprint<'_>, phase: StartupPhase) -> PipelineResult<()> {
        debug!("Initializing phase: {:?}", phase);

        match phase {
            StartupPhase::DetectSensor => {
                let sensor = detect_sensor(&mut self.graph);
                check_camera_model(&sensor.name)?;
                apply_sensor_defaults(blueprint.common_mut(), &sensor);
            }
            StartupPhase::CreateCamera => {
                let camera = match blueprint {
                    Blueprint::Video(config) => create_video_camera(
                        &mut self.graph,
                        &config.common,
                        &config.camera,
                        config.framerate,
                    )?,
                    Blueprint::Still(config) => create_still_camera(
                        &mut self.graph,
                        &config.common,
                        &config.camera,
                        &config.preview,
                        config.full_res_preview,
                    )?,
                };
                self.camera = Some(camera);
            }
            // Video sessions run without a preview.
            StartupPhase::CreatePreview => {
                if let Blueprint::Still(config) = blueprint {
                    self.preview = Some(create_preview(&mut self.graph, &config.preview)?);
                }
            }
            StartupPhase::CreateEncoder => {
                let encoder = match blueprint {
                    Blueprint::Video(config) => {
                        let framerate = self.camera()?.frame_rate();
                        create_video_encoder(&mut self.graph, config, framerate)?
                    }
                    Blueprint::Still(config) => create_still_encoder(&mut self.graph, config)?,
                };
                self.encoder = Some(encoder);
            }
            StartupPhase::ConnectPreview => {
                if let Some(preview) = self.preview {
                    let output = self.camera()?.preview_port();
                    self.preview_connection = Some(
                        self.graph
                            .connect(output, PortRef::input(preview, 0))
                            .stage("Failed to connect camera to preview")?,
                    );
                }
            }
            StartupPhase::ConnectEncoder => {
                let camera = self.camera()?;
                let output = match self.kind {
                    PipelineKind::Video => camera.video_port(),
                    PipelineKind::Still => camera.capture_port(),
                };
                let input = self.encoder()?.input_port();
                self.encoder_connection = Some(
                    self.graph
                        .connect(output, input)
                        .stage("Failed to connect camera to encoder")?,
                );
            }
        }
        Ok(())
    }

    /// Release every phase from the current one backwards.
    #[instrument(name = "rollback_pipeline", skip(self))]
    fn rollback(&mut self) {
        if let Some(mut phase) = self.current_phase.take() {
            loop {
                info!("Rolling back phase: {:?}", phase);
                self.rollback_phase(phase);

                match phase.previous() {
                    Some(prev) => phase = prev,
                    None => break,
                }
            }
        }
        self.released = true;
    }

    fn rollback_phase(&mut self, phase: StartupPhase) {
        let result = match phase {
            StartupPhase::ConnectEncoder => self.graph.disconnect(self.encoder_connection.take()),
            StartupPhase::ConnectPreview => self.graph.disconnect(self.preview_connection.take()),
            StartupPhase::CreateEncoder => match self.encoder.take() {
                Some(encoder) => self.graph.destroy_component(encoder.id()),
                None => Ok(()),
            },
            StartupPhase::CreatePreview => match self.preview.take() {
                Some(preview) => self.graph.destroy_component(preview),
                None => Ok(()),
            },
            StartupPhase::CreateCamera => match self.camera.take() {
                Some(mut camera) => {
                    let result = self.graph.destroy_component(camera.id());
                    camera.join_logger();
                    result
                }
                None => Ok(()),
            },
            StartupPhase::DetectSensor => Ok(()),
        };

        if let Err(e) = result {
            warn!("Rollback of {:?} failed: {}", phase, e);
        }
    }

    /// Disable ports, destroy connections, disable components, release
    /// pools and destroy components, in that order.
    ///
    /// Calling this more than once is a no-op.
    #[instrument(name = "teardown_pipeline", skip(self))]
    pub fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let reason = self.stop_reason.clone();
        info!("Tearing down pipeline: {}", reason.message());

        let mut phase = ShutdownPhase::FIRST;
        loop {
            self.events.transition_to(SessionState::Stopping {
                reason: reason.clone(),
                phase,
            });
            debug!("{}", phase.name());
            self.shutdown_phase(phase);

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        if let Some(mut camera) = self.camera.take() {
            camera.join_logger();
        }
        self.preview = None;
        self.encoder = None;
        self.preview_connection = None;
        self.encoder_connection = None;

        if !self.graph.is_empty() {
            warn!("Pipeline resources remain after teardown");
        }
        self.events.transition_to(SessionState::Idle);
    }

    fn shutdown_phase(&mut self, phase: ShutdownPhase) {
        match phase {
            ShutdownPhase::DisablePorts => self.graph.disable_unconnected_ports(),
            ShutdownPhase::DestroyConnections => self.graph.destroy_connections(),
            ShutdownPhase::DisableComponents => self.graph.disable_components(),
            ShutdownPhase::DestroyPools => self.graph.destroy_pools(),
            ShutdownPhase::DestroyComponents => self.graph.destroy_components(),
        }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn camera(&self) -> PipelineResult<&CameraHandle> {
        self.camera.as_ref().ok_or_else(|| missing("Camera not created"))
    }

    pub fn encoder(&self) -> PipelineResult<&EncoderHandle> {
        self.encoder.as_ref().ok_or_else(|| missing("Encoder not created"))
    }

    pub fn preview(&self) -> Option<ComponentId> {
        self.preview
    }

    pub(crate) fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = reason;
    }

    /// Returns true once the pipeline has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

fn missing(stage: &'static str) -> PipelineError {
    PipelineError::Hal {
        stage,
        source: HalError::status("pipeline lookup", Status::NotReady),
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use picam_mmal::sim::{SimConfig, SimOp, SimulatedHardware};
    use picam_mmal::{ComponentKind, Host};

    use crate::error::ErrorKind;

    fn setup(config: SimConfig) -> (Arc<SimulatedHardware>, Graph) {
        let hw = Arc::new(SimulatedHardware::new(config));
        let host = Host::new(hw.clone());
        host.bring_up().unwrap();
        let graph = host.graph().unwrap();
        (hw, graph)
    }

    #[test]
    fn test_video_pipeline_builds_and_tears_down() {
        let (hw, graph) = setup(SimConfig::default());
        let mut config = VideoConfig::default();
        let mut state =
            PipelineState::initialize(graph, Blueprint::Video(&mut config), EventSink::disabled())
                .unwrap();

        assert!(state.preview().is_none());
        assert_eq!(state.graph().connection_ids().len(), 1);
        assert!(state.events().state().is_starting());

        state.teardown();
        assert!(state.graph().is_empty());
        assert_eq!(hw.component_count(), 0);
        assert!(state.events().state().is_idle());
        assert!(state.camera().is_err());
    }

    #[test]
    fn test_still_pipeline_connects_preview() {
        let (hw, graph) = setup(SimConfig::default());
        let mut config = StillConfig::default();
        let state =
            PipelineState::initialize(graph, Blueprint::Still(&mut config), EventSink::disabled())
                .unwrap();

        assert!(state.preview().is_some());
        assert_eq!(hw.connection_count(), 2);
        assert_eq!(config.common.width, 3280);
        drop(state);
        assert_eq!(hw.component_count(), 0);
    }

    #[test]
    fn test_failed_phase_rolls_back() {
        let (hw, graph) = setup(SimConfig {
            fail_create: Some(ComponentKind::VideoEncoder),
            ..SimConfig::default()
        });
        let mut config = VideoConfig::default();
        let events = EventSink::disabled();
        let err = PipelineState::initialize(graph, Blueprint::Video(&mut config), events.clone())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            PipelineError::Startup {
                phase: StartupPhase::CreateEncoder,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(hw.component_count(), 0);
        assert!(events.state().is_error());
    }

    #[test]
    fn test_connection_failure_rolls_back() {
        let (hw, graph) = setup(SimConfig {
            fail_connection_enable: true,
            ..SimConfig::default()
        });
        let mut config = VideoConfig::default();
        let result =
            PipelineState::initialize(graph, Blueprint::Video(&mut config), EventSink::disabled());

        assert!(result.is_err());
        assert_eq!(hw.component_count(), 0);
        assert_eq!(hw.connection_count(), 0);
        assert!(hw
            .ops()
            .iter()
            .any(|op| matches!(op, SimOp::DestroyConnection(_))));
    }
}
