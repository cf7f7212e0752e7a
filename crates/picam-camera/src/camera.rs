//! Camera component construction for video and still sessions.

use std::thread::JoinHandle;

use picam_mmal::{
    align_up, CameraConfig, ComponentId, ComponentKind, Encoding, Graph, Parameter, PortRef,
    Rational, Rect, VideoFormat,
};
use picam_types::{CameraParameters, CommonSettings, PreviewConfig};
use tracing::{debug, info, instrument, warn};

use crate::error::HalContext;
use crate::events::spawn_control_logger;
use crate::params::apply_all;
use crate::{
    CameraResult, CAMERA_CAPTURE_PORT, CAMERA_OUTPUTS, CAMERA_PREVIEW_PORT, CAMERA_VIDEO_PORT,
    MIN_STREAMING_BUFFERS,
};

/// Shutter speeds above these (in microseconds) need a reduced frame rate range.
const LONG_SHUTTER_US: u32 = 1_000_000;
const VERY_LONG_SHUTTER_US: u32 = 6_000_000;

/// A camera component and the thread logging its control events.
#[derive(Debug)]
pub struct CameraHandle {
    id: ComponentId,
    frame_rate: u32,
    control_logger: Option<JoinHandle<()>>,
}

impl CameraHandle {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Frame rate committed on the streaming outputs; 0 means variable.
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn preview_port(&self) -> PortRef {
        PortRef::output(self.id, CAMERA_PREVIEW_PORT)
    }

    pub fn video_port(&self) -> PortRef {
        PortRef::output(self.id, CAMERA_VIDEO_PORT)
    }

    pub fn capture_port(&self) -> PortRef {
        PortRef::output(self.id, CAMERA_CAPTURE_PORT)
    }

    pub fn control_port(&self) -> PortRef {
        PortRef::control(self.id)
    }

    /// Wait for the control event logger. It exits once the control port
    /// has been disabled.
    pub fn join_logger(&mut self) {
        if let Some(handle) = self.control_logger.take() {
            if handle.join().is_err() {
                warn!("Camera control logger panicked");
            }
        }
    }

    fn discard(mut self, graph: &mut Graph) {
        if let Err(e) = graph.destroy_component(self.id) {
            warn!("Failed to destroy camera after error: {}", e);
        }
        self.join_logger();
    }
}

/// Frame rate to commit for a requested rate and shutter speed.
///
/// A shutter longer than the frame period forces a variable frame rate.
pub(crate) fn effective_frame_rate(framerate: u32, shutter_speed: u32) -> u32 {
    if shutter_speed > 0 && f64::from(framerate) > 1_000_000.0 / f64::from(shutter_speed) {
        return 0;
    }
    framerate
}

/// Frame rate limits for long exposures, per port role.
fn fps_range(shutter_speed: u32, capture: bool) -> Option<(Rational, Rational)> {
    if shutter_speed > VERY_LONG_SHUTTER_US {
        Some((Rational::new(50, 1000), Rational::new(166, 1000)))
    } else if shutter_speed > LONG_SHUTTER_US {
        let low = if capture { 167 } else { 166 };
        Some((Rational::new(low, 1000), Rational::new(999, 1000)))
    } else {
        None
    }
}

/// Select the sensor and mode, and set the stereo layout on every output.
fn select_sensor(graph: &Graph, id: ComponentId, common: &CommonSettings, params: &CameraParameters) -> CameraResult<()> {
    for index in 0..CAMERA_OUTPUTS {
        graph
            .set_parameter(PortRef::output(id, index), &Parameter::StereoscopicMode(params.stereo))
            .stage("Could not set stereo mode")?;
    }
    graph
        .set_parameter(PortRef::control(id), &Parameter::CameraNum(common.camera_num))
        .stage("Could not select camera")?;
    graph
        .set_parameter(PortRef::control(id), &Parameter::CustomSensorConfig(common.sensor_mode))
        .stage("Could not set sensor mode")
}

fn start_control_events(graph: &mut Graph, handle: &mut CameraHandle) -> CameraResult<()> {
    let events = graph
        .enable_control(handle.control_port())
        .stage("Unable to enable control port")?;
    handle.control_logger = Some(spawn_control_logger(events));
    Ok(())
}

/// Commit an opaque output format of `width`x`height`, aligned as the
/// camera requires, and raise the buffer count to the streaming minimum.
fn commit_output(
    graph: &mut Graph,
    port: PortRef,
    width: u32,
    height: u32,
    frame_rate: Rational,
    stage: &'static str,
) -> CameraResult<()> {
    let mut format = graph.format(port).stage(stage)?;
    format.encoding = Encoding::Opaque;
    format.encoding_variant = Some(Encoding::I420);
    format.video = VideoFormat {
        width: align_up(width, 32),
        height: align_up(height, 16),
        crop: Rect::new(0, 0, width, height),
        frame_rate,
    };
    let negotiated = graph.commit_format(port, format).stage(stage)?;
    raise_buffer_count(graph, port, negotiated.buffer_num, negotiated.buffer_size)
}

fn raise_buffer_count(graph: &mut Graph, port: PortRef, num: u32, size: u32) -> CameraResult<()> {
    if num < MIN_STREAMING_BUFFERS {
        graph
            .set_buffer_requirements(port, MIN_STREAMING_BUFFERS, size)
            .stage("Unable to set camera buffer count")?;
    }
    Ok(())
}

/// Build and enable the camera for a video session.
///
/// The preview and video outputs run at the requested frame rate and the
/// capture output is left variable. Camera control values that fail to
/// apply are logged; everything else rolls the camera back on failure.
#[instrument(name = "create_video_camera", skip(graph, common, params), fields(width = common.width, height = common.height))]
pub fn create_video_camera(
    graph: &mut Graph,
    common: &CommonSettings,
    params: &CameraParameters,
    framerate: u32,
) -> CameraResult<CameraHandle> {
    let id = graph
        .create_component(ComponentKind::Camera)
        .stage("Failed to create camera component")?;
    let mut handle = CameraHandle {
        id,
        frame_rate: effective_frame_rate(framerate, params.shutter_speed),
        control_logger: None,
    };

    match configure_video(graph, &mut handle, common, params, framerate) {
        Ok(()) => {
            info!(?id, frame_rate = handle.frame_rate, "Video camera ready");
            Ok(handle)
        }
        Err(e) => {
            handle.discard(graph);
            Err(e)
        }
    }
}

fn configure_video(
    graph: &mut Graph,
    handle: &mut CameraHandle,
    common: &CommonSettings,
    params: &CameraParameters,
    framerate: u32,
) -> CameraResult<()> {
    let id = handle.id;
    select_sensor(graph, id, common, params)?;
    start_control_events(graph, handle)?;

    let config = CameraConfig {
        max_stills_w: common.width,
        max_stills_h: common.height,
        stills_yuv422: false,
        one_shot_stills: false,
        max_preview_video_w: common.width,
        max_preview_video_h: common.height,
        num_preview_video_frames: 3 + framerate.saturating_sub(30) / 10,
        stills_capture_circular_buffer_height: 0,
        fast_preview_resume: false,
        use_stc_timestamp: true,
    };
    graph
        .set_parameter(PortRef::control(id), &Parameter::CameraConfig(config))
        .stage("Unable to set camera configuration")?;

    if handle.frame_rate != framerate {
        debug!(
            shutter_speed = params.shutter_speed,
            "Enable dynamic frame rate to fulfil shutter speed requirement"
        );
    }
    let rate = Rational::new(handle.frame_rate as i32, 1);
    commit_output(graph, handle.preview_port(), common.width, common.height, rate, "Camera preview format couldn't be set")?;
    commit_output(graph, handle.video_port(), common.width, common.height, rate, "Camera video format couldn't be set")?;
    commit_output(
        graph,
        handle.capture_port(),
        common.width,
        common.height,
        Rational::new(0, 1),
        "Camera still format couldn't be set",
    )?;

    graph
        .enable_component(id)
        .stage("Camera component couldn't be enabled")?;

    let failed = apply_all(graph, id, params);
    if failed > 0 {
        warn!(failed, "Camera started with some settings not applied");
    }
    Ok(())
}

/// Build and enable the camera for a still session.
///
/// The preview output runs at the preview window size unless
/// `full_res_preview` is set; the capture output always runs at the full
/// requested resolution.
#[instrument(name = "create_still_camera", skip(graph, common, params, preview), fields(width = common.width, height = common.height))]
pub fn create_still_camera(
    graph: &mut Graph,
    common: &CommonSettings,
    params: &CameraParameters,
    preview: &PreviewConfig,
    full_res_preview: bool,
) -> CameraResult<CameraHandle> {
    let id = graph
        .create_component(ComponentKind::Camera)
        .stage("Failed to create camera component")?;
    let mut handle = CameraHandle {
        id,
        frame_rate: 0,
        control_logger: None,
    };

    match configure_still(graph, &mut handle, common, params, preview, full_res_preview) {
        Ok(()) => {
            info!(?id, "Still camera ready");
            Ok(handle)
        }
        Err(e) => {
            handle.discard(graph);
            Err(e)
        }
    }
}

fn configure_still(
    graph: &mut Graph,
    handle: &mut CameraHandle,
    common: &CommonSettings,
    params: &CameraParameters,
    preview: &PreviewConfig,
    full_res_preview: bool,
) -> CameraResult<()> {
    let id = handle.id;
    select_sensor(graph, id, common, params)?;
    start_control_events(graph, handle)?;

    let (preview_w, preview_h) = if full_res_preview {
        (common.width, common.height)
    } else {
        (preview.window.width, preview.window.height)
    };

    let config = CameraConfig {
        max_stills_w: common.width,
        max_stills_h: common.height,
        stills_yuv422: false,
        one_shot_stills: true,
        max_preview_video_w: preview_w,
        max_preview_video_h: preview_h,
        num_preview_video_frames: 3,
        stills_capture_circular_buffer_height: 0,
        fast_preview_resume: false,
        use_stc_timestamp: false,
    };
    graph
        .set_parameter(PortRef::control(id), &Parameter::CameraConfig(config))
        .stage("Unable to set camera configuration")?;

    let failed = apply_all(graph, id, params);
    if failed > 0 {
        warn!(failed, "Camera started with some settings not applied");
    }

    set_fps_range(graph, handle.preview_port(), params.shutter_speed, false);
    commit_output(
        graph,
        handle.preview_port(),
        preview_w,
        preview_h,
        Rational::new(0, 1),
        "Camera viewfinder format couldn't be set",
    )?;

    // The video output is unused but must carry a valid format.
    graph
        .copy_format(handle.preview_port(), handle.video_port())
        .stage("Camera video format couldn't be set")?;
    let video = graph.format(handle.video_port()).stage("Camera video format couldn't be set")?;
    let negotiated = graph
        .commit_format(handle.video_port(), video)
        .stage("Camera video format couldn't be set")?;
    raise_buffer_count(graph, handle.video_port(), negotiated.buffer_num, negotiated.buffer_size)?;

    set_fps_range(graph, handle.capture_port(), params.shutter_speed, true);
    commit_output(
        graph,
        handle.capture_port(),
        common.width,
        common.height,
        Rational::new(0, 1),
        "Camera still format couldn't be set",
    )?;

    graph
        .enable_component(id)
        .stage("Camera component couldn't be enabled")
}

fn set_fps_range(graph: &Graph, port: PortRef, shutter_speed: u32, capture: bool) {
    if let Some((low, high)) = fps_range(shutter_speed, capture) {
        if let Err(e) = graph.set_parameter(port, &Parameter::FpsRange { low, high }) {
            warn!(%port, "Unable to set frame rate range: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::sim::{SimConfig, SimulatedHardware};
    use picam_mmal::{Host, ParameterId, Status};
    use std::sync::Arc;

    fn setup(config: SimConfig) -> (Arc<SimulatedHardware>, Graph) {
        let sim = Arc::new(SimulatedHardware::new(config));
        let host = Host::new(sim.clone());
        host.bring_up().unwrap();
        (sim, host.graph().unwrap())
    }

    fn common(width: u32, height: u32) -> CommonSettings {
        CommonSettings {
            width,
            height,
            ..CommonSettings::default()
        }
    }

    #[test]
    fn test_effective_frame_rate() {
        assert_eq!(effective_frame_rate(30, 0), 30);
        assert_eq!(effective_frame_rate(30, 20_000), 30);
        assert_eq!(effective_frame_rate(30, 100_000), 0);
    }

    #[test]
    fn test_fps_range_for_long_shutters() {
        assert_eq!(fps_range(500_000, false), None);
        assert_eq!(
            fps_range(2_000_000, true),
            Some((Rational::new(167, 1000), Rational::new(999, 1000)))
        );
        assert_eq!(
            fps_range(8_000_000, false),
            Some((Rational::new(50, 1000), Rational::new(166, 1000)))
        );
    }

    #[test]
    fn test_video_camera_formats() {
        let (sim, mut graph) = setup(SimConfig::default());
        let mut camera =
            create_video_camera(&mut graph, &common(1920, 1080), &CameraParameters::default(), 30)
                .unwrap();

        let format = graph.format(camera.video_port()).unwrap();
        assert_eq!(format.video.width, 1920);
        assert_eq!(format.video.height, 1088);
        assert_eq!(format.video.crop, Rect::new(0, 0, 1920, 1080));
        assert_eq!(format.video.frame_rate, Rational::new(30, 1));
        assert!(format.buffer_num >= MIN_STREAMING_BUFFERS);

        let capture = graph.format(camera.capture_port()).unwrap();
        assert_eq!(capture.video.frame_rate, Rational::new(0, 1));
        assert!(graph.component(camera.id()).unwrap().is_enabled());

        let Some(Parameter::CameraConfig(config)) =
            sim.parameter(camera.control_port(), ParameterId::CameraConfig)
        else {
            panic!("camera config not set");
        };
        assert!(!config.one_shot_stills);
        assert_eq!(config.num_preview_video_frames, 3);

        graph.destroy_component(camera.id()).unwrap();
        camera.join_logger();
    }

    #[test]
    fn test_video_camera_dynamic_frame_rate() {
        let (_sim, mut graph) = setup(SimConfig::default());
        let params = CameraParameters {
            shutter_speed: 100_000,
            ..CameraParameters::default()
        };
        let camera = create_video_camera(&mut graph, &common(1280, 720), &params, 30).unwrap();
        assert_eq!(camera.frame_rate(), 0);
        assert_eq!(
            graph.format(camera.video_port()).unwrap().video.frame_rate,
            Rational::new(0, 1)
        );
    }

    #[test]
    fn test_camera_rolls_back_on_failure() {
        let (sim, mut graph) = setup(SimConfig {
            reject_parameters: vec![(ParameterId::CameraNum, Status::NoDevice)],
            ..SimConfig::default()
        });
        let err = create_video_camera(&mut graph, &common(1280, 720), &CameraParameters::default(), 30)
            .unwrap_err();
        assert_eq!(
            err.hal().and_then(|e| e.status_code()),
            Some(Status::NoDevice)
        );
        assert_eq!(sim.component_count(), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_bad_format_rolls_back() {
        let (sim, mut graph) = setup(SimConfig::default());
        // Zero width cannot be committed.
        let result = create_video_camera(&mut graph, &common(0, 480), &CameraParameters::default(), 30);
        assert!(result.is_err());
        assert_eq!(sim.component_count(), 0);
    }

    #[test]
    fn test_still_camera_formats() {
        let (sim, mut graph) = setup(SimConfig::default());
        let params = CameraParameters {
            shutter_speed: 2_000_000,
            ..CameraParameters::default()
        };
        let camera = create_still_camera(
            &mut graph,
            &common(3280, 2464),
            &params,
            &PreviewConfig::default(),
            false,
        )
        .unwrap();

        let preview = graph.format(camera.preview_port()).unwrap();
        assert_eq!(preview.video.crop, Rect::new(0, 0, 1024, 768));
        let video = graph.format(camera.video_port()).unwrap();
        assert_eq!(video.video.crop, preview.video.crop);

        let capture = graph.format(camera.capture_port()).unwrap();
        assert_eq!(capture.video.width, 3296);
        assert_eq!(capture.video.crop, Rect::new(0, 0, 3280, 2464));

        assert_eq!(
            sim.parameter(camera.capture_port(), ParameterId::FpsRange),
            Some(Parameter::FpsRange {
                low: Rational::new(167, 1000),
                high: Rational::new(999, 1000),
            })
        );
        let Some(Parameter::CameraConfig(config)) =
            sim.parameter(camera.control_port(), ParameterId::CameraConfig)
        else {
            panic!("camera config not set");
        };
        assert!(config.one_shot_stills);
        assert_eq!(config.max_preview_video_w, 1024);
    }

    #[test]
    fn test_still_camera_full_res_preview() {
        let (_sim, mut graph) = setup(SimConfig::default());
        let camera = create_still_camera(
            &mut graph,
            &common(2592, 1944),
            &CameraParameters::default(),
            &PreviewConfig::default(),
            true,
        )
        .unwrap();
        let preview = graph.format(camera.preview_port()).unwrap();
        assert_eq!(preview.video.crop, Rect::new(0, 0, 2592, 1944));
    }
}
