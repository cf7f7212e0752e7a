//! H264 and MJPEG video encoder.

use picam_mmal::{
    ComponentId, ComponentKind, Encoding, Graph, IntraRefresh, Parameter, ParameterId, PortRef,
    Rational,
};
use picam_types::{VideoConfig, VideoEncoding};
use tracing::{debug, info, instrument, warn};

use crate::error::HalContext;
use crate::policy::{clamp_bitrate, resolve_level, slice_rows};
use crate::{EncoderHandle, EncoderResult};

/// Output buffer size used for MJPEG, whose recommended size is too small
/// for a full frame.
const MJPEG_BUFFER_SIZE: u32 = 256 << 10;

/// Slicing is only supported up to this width.
const MAX_SLICED_WIDTH: u32 = 1280;

/// Build and enable the video encoder and its output pool.
///
/// `framerate` is the rate committed on the camera, which may be 0 when a
/// long shutter forced a variable rate. The component is destroyed again
/// if any required setting fails; optional stream flags are only logged.
#[instrument(name = "create_video_encoder", skip(graph, config), fields(encoding = ?config.encoding))]
pub fn create_video_encoder(graph: &mut Graph, config: &VideoConfig, framerate: u32) -> EncoderResult<EncoderHandle> {
    let id = graph
        .create_component(ComponentKind::VideoEncoder)
        .stage("Unable to create video encoder component")?;

    match configure(graph, id, config, framerate) {
        Ok(handle) => {
            info!(?id, bitrate = handle.bitrate, buffers = handle.pool.capacity(), "Video encoder ready");
            Ok(handle)
        }
        Err(e) => {
            if let Err(destroy) = graph.destroy_component(id) {
                warn!("Failed to destroy video encoder after error: {}", destroy);
            }
            Err(e)
        }
    }
}

fn configure(graph: &mut Graph, id: ComponentId, config: &VideoConfig, framerate: u32) -> EncoderResult<EncoderHandle> {
    let input = PortRef::input(id, 0);
    let output = PortRef::output(id, 0);
    let h264 = config.encoding == VideoEncoding::H264;

    graph
        .copy_format(input, output)
        .stage("Unable to set format on video encoder output port")?;
    let mut format = graph
        .format(output)
        .stage("Unable to set format on video encoder output port")?;
    format.encoding = if h264 { Encoding::H264 } else { Encoding::Mjpeg };
    format.encoding_variant = None;
    format.bitrate = clamp_bitrate(config.encoding, config.level, config.bitrate);
    // Picked up from the input once the camera is connected.
    format.video.frame_rate = Rational::new(0, 1);
    format.buffer_size = 0;
    format.buffer_num = 0;
    let negotiated = graph
        .commit_format(output, format)
        .stage("Unable to set format on video encoder output port")?;

    let size = if h264 {
        negotiated.buffer_size_recommended
    } else {
        MJPEG_BUFFER_SIZE
    }
    .max(negotiated.buffer_size_min);
    let num = negotiated
        .buffer_num_recommended
        .max(negotiated.buffer_num_min);
    graph
        .set_buffer_requirements(output, num, size)
        .stage("Unable to set video encoder buffers")?;

    if h264 {
        configure_h264(graph, output, config, framerate)?;
    }

    if let Err(e) = graph.set_parameter(input, &Parameter::ImmutableInput(config.immutable_input)) {
        warn!("Unable to set immutable input flag: {}", e);
    }

    graph
        .enable_component(id)
        .stage("Unable to enable video encoder component")?;
    let pool = graph
        .create_pool(output)
        .stage("Failed to create buffer header pool for video encoder output port")?;

    Ok(EncoderHandle {
        id,
        encoding: negotiated.encoding,
        bitrate: negotiated.bitrate,
        pool,
    })
}

fn configure_h264(graph: &Graph, output: PortRef, config: &VideoConfig, framerate: u32) -> EncoderResult<()> {
    let (width, height) = (config.common.width, config.common.height);

    if let Some(period) = config.intraperiod {
        graph
            .set_parameter(output, &Parameter::IntraPeriod(period))
            .stage("Unable to set intraperiod")?;
    }

    if config.slices > 1 && width <= MAX_SLICED_WIDTH {
        let rows = slice_rows(height, config.slices);
        graph
            .set_parameter(output, &Parameter::MbRowsPerSlice(rows))
            .stage("Unable to set number of slices")?;
    }

    if config.quantisation > 0 {
        let qp = config.quantisation;
        graph
            .set_parameter(output, &Parameter::InitialQuant(qp))
            .stage("Unable to set initial QP")?;
        graph
            .set_parameter(output, &Parameter::MinQuant(qp))
            .stage("Unable to set min QP")?;
        graph
            .set_parameter(output, &Parameter::MaxQuant(qp))
            .stage("Unable to set max QP")?;
    }

    let level = resolve_level(config.level, width, height, framerate)?;
    graph
        .set_parameter(
            output,
            &Parameter::Profile {
                profile: config.profile,
                level,
            },
        )
        .stage("Unable to set H264 profile")?;
    debug!(profile = ?config.profile, level = level.name(), "H264 profile set");

    let flags = [
        (Parameter::InlineHeader(config.inline_headers), "inline header"),
        (Parameter::SpsTiming(config.add_sps_timing), "SPS timing"),
        (Parameter::InlineVectors(config.inline_motion_vectors), "inline vectors"),
    ];
    for (param, name) in flags {
        if let Err(e) = graph.set_parameter(output, &param) {
            warn!(flag = name, "Failed to set encoder flag: {}", e);
        }
    }

    if let Some(mode) = config.intra_refresh {
        // Read first so values we do not manage are preserved.
        let mut refresh = match graph.get_parameter(output, ParameterId::IntraRefresh) {
            Ok(Parameter::IntraRefresh(existing)) => existing,
            Ok(_) | Err(_) => {
                warn!("Unable to get existing H264 intra-refresh values, using defaults");
                IntraRefresh {
                    mode,
                    air_mbs: 0,
                    air_ref: 0,
                    cir_mbs: 0,
                    pir_mbs: 0,
                }
            }
        };
        refresh.mode = mode;
        graph
            .set_parameter(output, &Parameter::IntraRefresh(refresh))
            .stage("Unable to set H264 intra-refresh values")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::sim::{SimConfig, SimulatedHardware};
    use picam_mmal::{Host, Status};
    use picam_types::{CommonSettings, H264Level, IntraRefreshType};
    use std::sync::Arc;

    use crate::error::EncoderError;

    fn setup(config: SimConfig) -> (Arc<SimulatedHardware>, Graph) {
        let sim = Arc::new(SimulatedHardware::new(config));
        let host = Host::new(sim.clone());
        host.bring_up().unwrap();
        (sim, host.graph().unwrap())
    }

    fn video(width: u32, height: u32) -> VideoConfig {
        VideoConfig {
            common: CommonSettings {
                width,
                height,
                ..CommonSettings::default()
            },
            ..VideoConfig::default()
        }
    }

    #[test]
    fn test_h264_encoder_defaults() {
        let (sim, mut graph) = setup(SimConfig::default());
        let encoder = create_video_encoder(&mut graph, &video(1920, 1080), 30).unwrap();

        let format = graph.format(encoder.output_port()).unwrap();
        assert_eq!(format.encoding, Encoding::H264);
        assert_eq!(format.bitrate, 17_000_000);
        assert_eq!(format.buffer_size, format.buffer_size_recommended);
        assert_eq!(encoder.pool().capacity(), format.buffer_num as usize);
        assert!(graph.component(encoder.id()).unwrap().is_enabled());

        assert_eq!(
            sim.parameter(encoder.output_port(), ParameterId::Profile),
            Some(Parameter::Profile {
                profile: picam_types::H264Profile::Baseline,
                level: H264Level::L4,
            })
        );
        assert_eq!(
            sim.parameter(encoder.input_port(), ParameterId::ImmutableInput),
            Some(Parameter::ImmutableInput(true))
        );
        assert!(sim
            .parameter(encoder.output_port(), ParameterId::IntraPeriod)
            .is_none());
    }

    #[test]
    fn test_mjpeg_buffer_size_and_bitrate_clamp() {
        let (_sim, mut graph) = setup(SimConfig::default());
        let config = VideoConfig {
            encoding: VideoEncoding::Mjpeg,
            bitrate: 90_000_000,
            ..video(1280, 720)
        };
        let encoder = create_video_encoder(&mut graph, &config, 30).unwrap();
        let format = graph.format(encoder.output_port()).unwrap();
        assert_eq!(format.buffer_size, MJPEG_BUFFER_SIZE);
        assert_eq!(encoder.bitrate(), 25_000_000);
    }

    #[test]
    fn test_level_upgrade_and_slices() {
        let (sim, mut graph) = setup(SimConfig::default());
        let config = VideoConfig {
            slices: 4,
            intraperiod: Some(15),
            quantisation: 20,
            ..video(1280, 720)
        };
        let encoder = create_video_encoder(&mut graph, &config, 120).unwrap();
        let output = encoder.output_port();
        assert_eq!(
            sim.parameter(output, ParameterId::MbRowsPerSlice),
            Some(Parameter::MbRowsPerSlice(12))
        );
        assert_eq!(
            sim.parameter(output, ParameterId::IntraPeriod),
            Some(Parameter::IntraPeriod(15))
        );
        assert_eq!(
            sim.parameter(output, ParameterId::MaxQuant),
            Some(Parameter::MaxQuant(20))
        );
        let Some(Parameter::Profile { level, .. }) = sim.parameter(output, ParameterId::Profile)
        else {
            panic!("profile not set");
        };
        assert_eq!(level, H264Level::L42);
    }

    #[test]
    fn test_too_many_macroblocks_rolls_back() {
        let (sim, mut graph) = setup(SimConfig::default());
        let err = create_video_encoder(&mut graph, &video(1920, 1080), 120).unwrap_err();
        assert!(matches!(err, EncoderError::TooManyMacroblocks { .. }));
        assert_eq!(sim.component_count(), 0);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_optional_flags_are_soft() {
        let (_sim, mut graph) = setup(SimConfig {
            reject_parameters: vec![
                (ParameterId::InlineHeader, Status::NotSupported),
                (ParameterId::ImmutableInput, Status::Invalid),
            ],
            ..SimConfig::default()
        });
        assert!(create_video_encoder(&mut graph, &video(1280, 720), 30).is_ok());
    }

    #[test]
    fn test_required_setting_failure_rolls_back() {
        let (sim, mut graph) = setup(SimConfig {
            reject_parameters: vec![(ParameterId::Profile, Status::Invalid)],
            ..SimConfig::default()
        });
        let err = create_video_encoder(&mut graph, &video(1280, 720), 30).unwrap_err();
        assert_eq!(err.hal().and_then(|e| e.status_code()), Some(Status::Invalid));
        assert_eq!(sim.component_count(), 0);
    }

    #[test]
    fn test_intra_refresh_defaults_when_unreadable() {
        let (sim, mut graph) = setup(SimConfig::default());
        let config = VideoConfig {
            intra_refresh: Some(IntraRefreshType::Cyclic),
            ..video(1280, 720)
        };
        let encoder = create_video_encoder(&mut graph, &config, 30).unwrap();
        assert_eq!(
            sim.parameter(encoder.output_port(), ParameterId::IntraRefresh),
            Some(Parameter::IntraRefresh(IntraRefresh {
                mode: IntraRefreshType::Cyclic,
                air_mbs: 0,
                air_ref: 0,
                cir_mbs: 0,
                pir_mbs: 0,
            }))
        );
    }
}
