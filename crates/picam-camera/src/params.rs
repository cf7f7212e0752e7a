//! Applying camera control values to a running camera.

use chrono::Local;
use picam_mmal::{ComponentId, Graph, Mirror, Parameter, ParameterId, PortRef, Rational, Rect};
use picam_types::{CameraParameters, Roi};
use tracing::{debug, error, instrument, warn};

use crate::annotate::build_annotation;
use crate::error::{CameraError, HalContext};
use crate::{CameraResult, CAMERA_OUTPUTS};

/// Map a rotation in degrees onto 0, 90, 180 or 270.
///
/// Negative angles wrap, so -10 becomes 270 and 370 becomes 0.
pub fn normalize_rotation(degrees: i32) -> i32 {
    (degrees.rem_euclid(360) / 90) * 90
}

/// Scale a -100..=100 control onto the -1..=1 range the camera takes.
fn signed_percent(name: &'static str, value: i32) -> CameraResult<Rational> {
    if !(-100..=100).contains(&value) {
        return Err(CameraError::OutOfRange {
            name,
            value: i64::from(value),
        });
    }
    Ok(Rational::new(value, 100))
}

/// Sets one parameter on the camera control port.
fn set(graph: &Graph, camera: ComponentId, param: Parameter, stage: &'static str) -> CameraResult<()> {
    graph.set_parameter(PortRef::control(camera), &param).stage(stage)
}

/// Sets one parameter on every camera output.
fn set_outputs(graph: &Graph, camera: ComponentId, param: Parameter, stage: &'static str) -> CameraResult<()> {
    for index in 0..CAMERA_OUTPUTS {
        graph
            .set_parameter(PortRef::output(camera, index), &param)
            .stage(stage)?;
    }
    Ok(())
}

pub fn set_saturation(graph: &Graph, camera: ComponentId, value: i32) -> CameraResult<()> {
    let value = signed_percent("saturation", value)?;
    set(graph, camera, Parameter::Saturation(value), "Unable to set saturation")
}

pub fn set_sharpness(graph: &Graph, camera: ComponentId, value: i32) -> CameraResult<()> {
    let value = signed_percent("sharpness", value)?;
    set(graph, camera, Parameter::Sharpness(value), "Unable to set sharpness")
}

pub fn set_contrast(graph: &Graph, camera: ComponentId, value: i32) -> CameraResult<()> {
    let value = signed_percent("contrast", value)?;
    set(graph, camera, Parameter::Contrast(value), "Unable to set contrast")
}

pub fn set_brightness(graph: &Graph, camera: ComponentId, value: i32) -> CameraResult<()> {
    if !(0..=100).contains(&value) {
        return Err(CameraError::OutOfRange {
            name: "brightness",
            value: i64::from(value),
        });
    }
    set(graph, camera, Parameter::Brightness(Rational::new(value, 100)), "Unable to set brightness")
}

pub fn set_exposure_compensation(graph: &Graph, camera: ComponentId, value: i32) -> CameraResult<()> {
    if !(-10..=10).contains(&value) {
        return Err(CameraError::OutOfRange {
            name: "exposure compensation",
            value: i64::from(value),
        });
    }
    set(graph, camera, Parameter::ExposureCompensation(value), "Unable to set exposure compensation")
}

/// Manual white balance gains; skipped unless both are non-zero.
pub fn set_awb_gains(graph: &Graph, camera: ComponentId, red: f32, blue: f32) -> CameraResult<()> {
    if red == 0.0 || blue == 0.0 {
        return Ok(());
    }
    let param = Parameter::AwbGains {
        red: Rational::from_fixed(red),
        blue: Rational::from_fixed(blue),
    };
    set(graph, camera, param, "Unable to set AWB gains")
}

pub fn set_rotation(graph: &Graph, camera: ComponentId, degrees: i32) -> CameraResult<()> {
    let rotation = normalize_rotation(degrees);
    set_outputs(graph, camera, Parameter::Rotation(rotation), "Unable to set rotation")
}

pub fn set_flips(graph: &Graph, camera: ComponentId, hflip: bool, vflip: bool) -> CameraResult<()> {
    let mirror = Mirror::from_flips(hflip, vflip);
    set_outputs(graph, camera, Parameter::Mirror(mirror), "Unable to set flips")
}

/// Convert a normalised region of interest to a 16.16 fixed-point crop.
pub fn roi_to_crop(roi: &Roi) -> Rect {
    let fixed = |v: f64| (v * 65536.0) as i64;
    Rect::new(
        fixed(roi.x) as i32,
        fixed(roi.y) as i32,
        fixed(roi.w).max(0) as u32,
        fixed(roi.h).max(0) as u32,
    )
}

pub fn set_roi(graph: &Graph, camera: ComponentId, roi: &Roi) -> CameraResult<()> {
    if !roi.is_valid() {
        return Err(CameraError::OutOfRange {
            name: "region of interest",
            value: 0,
        });
    }
    set(graph, camera, Parameter::InputCrop(roi_to_crop(roi)), "Unable to set region of interest")
}

fn set_gain(graph: &Graph, camera: ComponentId, gain: f32, analog: bool) -> CameraResult<()> {
    if gain == 0.0 {
        return Ok(());
    }
    let value = Rational::from_fixed(gain);
    if analog {
        set(graph, camera, Parameter::AnalogGain(value), "Unable to set analog gain")
    } else {
        set(graph, camera, Parameter::DigitalGain(value), "Unable to set digital gain")
    }
}

/// Apply a full parameter set.
///
/// Every setting is attempted; the number that failed is returned.
#[instrument(name = "apply_camera_parameters", skip(graph, params))]
pub fn apply_all(graph: &Graph, camera: ComponentId, params: &CameraParameters) -> u32 {
    let annotation = build_annotation(&params.annotate, Local::now());

    let results: Vec<(&str, CameraResult<()>)> = vec![
        ("saturation", set_saturation(graph, camera, params.saturation)),
        ("sharpness", set_sharpness(graph, camera, params.sharpness)),
        ("contrast", set_contrast(graph, camera, params.contrast)),
        ("brightness", set_brightness(graph, camera, params.brightness)),
        ("iso", set(graph, camera, Parameter::Iso(params.iso), "Unable to set ISO")),
        (
            "video stabilisation",
            set(
                graph,
                camera,
                Parameter::VideoStabilisation(params.video_stabilisation),
                "Unable to set video stabilisation",
            ),
        ),
        (
            "exposure compensation",
            set_exposure_compensation(graph, camera, params.exposure_compensation),
        ),
        (
            "exposure mode",
            set(graph, camera, Parameter::ExposureMode(params.exposure_mode), "Unable to set exposure mode"),
        ),
        (
            "flicker avoid",
            set(graph, camera, Parameter::FlickerAvoid(params.flicker_avoid), "Unable to set flicker avoidance"),
        ),
        (
            "metering mode",
            set(graph, camera, Parameter::MeteringMode(params.metering_mode), "Unable to set metering mode"),
        ),
        (
            "awb mode",
            set(graph, camera, Parameter::AwbMode(params.awb_mode), "Unable to set AWB mode"),
        ),
        (
            "awb gains",
            set_awb_gains(graph, camera, params.awb_gains.red, params.awb_gains.blue),
        ),
        (
            "image effect",
            set(graph, camera, Parameter::ImageEffect(params.image_effect), "Unable to set image effect"),
        ),
        (
            "colour effect",
            set(graph, camera, Parameter::ColourEffect(params.colour_effects), "Unable to set colour effect"),
        ),
        ("rotation", set_rotation(graph, camera, params.rotation)),
        ("flips", set_flips(graph, camera, params.hflip, params.vflip)),
        ("roi", set_roi(graph, camera, &params.roi)),
        (
            "shutter speed",
            set(graph, camera, Parameter::ShutterSpeed(params.shutter_speed), "Unable to set shutter speed"),
        ),
        ("drc", set(graph, camera, Parameter::Drc(params.drc), "Unable to set DRC")),
        (
            "stats pass",
            set(graph, camera, Parameter::CaptureStatsPass(params.stats_pass), "Unable to set stats pass"),
        ),
        (
            "annotate",
            set(graph, camera, Parameter::Annotate(annotation), "Unable to set annotation"),
        ),
        ("analog gain", set_gain(graph, camera, params.analog_gain, true)),
        ("digital gain", set_gain(graph, camera, params.digital_gain, false)),
        ("settings", request_settings_events(graph, camera, params.settings)),
    ];

    let mut failed = 0;
    for (name, result) in results {
        if let Err(e) = result {
            error!(setting = name, "Failed to apply camera setting: {}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        warn!(failed, "Some camera settings were not applied");
    } else {
        debug!("All camera settings applied");
    }
    failed
}

/// Ask the camera to report setting changes on its control port.
fn request_settings_events(graph: &Graph, camera: ComponentId, enable: bool) -> CameraResult<()> {
    if !enable {
        return Ok(());
    }
    let param = Parameter::ChangeEventRequest {
        id: ParameterId::CameraSettings,
        enable: true,
    };
    set(graph, camera, param, "No camera settings events")
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::sim::{SimConfig, SimulatedHardware};
    use picam_mmal::{ComponentKind, Host, Status};
    use std::sync::Arc;

    fn camera_graph(config: SimConfig) -> (Arc<SimulatedHardware>, Graph, ComponentId) {
        let sim = Arc::new(SimulatedHardware::new(config));
        let host = Host::new(sim.clone());
        host.bring_up().unwrap();
        let mut graph = host.graph().unwrap();
        let camera = graph.create_component(ComponentKind::Camera).unwrap();
        (sim, graph, camera)
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0), 0);
        assert_eq!(normalize_rotation(90), 90);
        assert_eq!(normalize_rotation(100), 90);
        assert_eq!(normalize_rotation(370), 0);
        assert_eq!(normalize_rotation(-10), 270);
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(-360), 0);
    }

    #[test]
    fn test_roi_to_crop() {
        let crop = roi_to_crop(&Roi {
            x: 0.25,
            y: 0.5,
            w: 0.5,
            h: 0.25,
        });
        assert_eq!(crop, Rect::new(16384, 32768, 32768, 16384));
        assert_eq!(roi_to_crop(&Roi::FULL), Rect::new(0, 0, 65536, 65536));
    }

    #[test]
    fn test_apply_defaults_succeeds() {
        let (sim, graph, camera) = camera_graph(SimConfig::default());
        let failed = apply_all(&graph, camera, &CameraParameters::default());
        assert_eq!(failed, 0);
        assert_eq!(
            sim.parameter(PortRef::control(camera), ParameterId::Brightness),
            Some(Parameter::Brightness(Rational::new(50, 100)))
        );
        // Zero gains are left to the camera.
        assert!(sim
            .parameter(PortRef::control(camera), ParameterId::AwbGains)
            .is_none());
    }

    #[test]
    fn test_apply_counts_each_failure() {
        let (sim, graph, camera) = camera_graph(SimConfig {
            reject_parameters: vec![
                (ParameterId::Iso, Status::Invalid),
                (ParameterId::Drc, Status::NotSupported),
            ],
            ..SimConfig::default()
        });
        let params = CameraParameters {
            saturation: 150,
            brightness: -1,
            ..CameraParameters::default()
        };
        assert_eq!(apply_all(&graph, camera, &params), 4);

        // Later settings still went through.
        assert!(sim
            .parameter(PortRef::control(camera), ParameterId::ShutterSpeed)
            .is_some());
    }

    #[test]
    fn test_rotation_and_flips_on_every_output() {
        let (sim, graph, camera) = camera_graph(SimConfig::default());
        let params = CameraParameters {
            rotation: -10,
            hflip: true,
            ..CameraParameters::default()
        };
        assert_eq!(apply_all(&graph, camera, &params), 0);
        for index in 0..CAMERA_OUTPUTS {
            let port = PortRef::output(camera, index);
            assert_eq!(
                sim.parameter(port, ParameterId::Rotation),
                Some(Parameter::Rotation(270))
            );
            assert_eq!(
                sim.parameter(port, ParameterId::Mirror),
                Some(Parameter::Mirror(Mirror::Horizontal))
            );
        }
    }

    #[test]
    fn test_awb_gains_fixed_point() {
        let (sim, graph, camera) = camera_graph(SimConfig::default());
        set_awb_gains(&graph, camera, 1.5, 1.25).unwrap();
        assert_eq!(
            sim.parameter(PortRef::control(camera), ParameterId::AwbGains),
            Some(Parameter::AwbGains {
                red: Rational::new(98304, 65536),
                blue: Rational::new(81920, 65536),
            })
        );
    }
}
