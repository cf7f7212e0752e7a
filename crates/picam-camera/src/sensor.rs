//! Sensor discovery.

use picam_mmal::{ComponentKind, Graph, Parameter, ParameterId, PortRef};
use picam_types::CommonSettings;
use tracing::{debug, info, warn};

use crate::error::CameraError;
use crate::CameraResult;

/// Sensor assumed when discovery fails.
pub const FALLBACK_SENSOR: &str = "OV5647";
pub const FALLBACK_WIDTH: u32 = 2592;
pub const FALLBACK_HEIGHT: u32 = 1944;

/// HDMI to CSI-2 bridge that cannot be driven as a camera.
const UNSUPPORTED_BRIDGE: &str = "toshh2c";

/// Name and maximum resolution of the attached sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub name: String,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for SensorInfo {
    fn default() -> Self {
        Self {
            name: FALLBACK_SENSOR.to_string(),
            max_width: FALLBACK_WIDTH,
            max_height: FALLBACK_HEIGHT,
        }
    }
}

/// Query the camera-info component, falling back to the default sensor.
pub fn detect_sensor(graph: &mut Graph) -> SensorInfo {
    let info = match graph.create_component(ComponentKind::CameraInfo) {
        Ok(id) => {
            let result = graph.get_parameter(PortRef::control(id), ParameterId::CameraInfo);
            if let Err(e) = graph.destroy_component(id) {
                warn!("Failed to destroy camera info component: {}", e);
            }
            match result {
                Ok(Parameter::CameraInfo(info)) => Some(SensorInfo {
                    name: info.name,
                    max_width: info.max_width,
                    max_height: info.max_height,
                }),
                Ok(other) => {
                    warn!(?other, "Unexpected camera info reply");
                    None
                }
                Err(e) => {
                    warn!("Failed to read camera info: {}", e);
                    None
                }
            }
        }
        Err(e) => {
            warn!("Failed to create camera info component: {}", e);
            None
        }
    };

    match info {
        Some(info) => {
            info!(sensor = %info.name, width = info.max_width, height = info.max_height, "Sensor detected");
            info
        }
        None => {
            let info = SensorInfo::default();
            debug!(sensor = %info.name, "Using default sensor");
            info
        }
    }
}

/// Fail if the sensor cannot be used as a camera.
pub fn check_camera_model(name: &str) -> CameraResult<()> {
    if name.starts_with(UNSUPPORTED_BRIDGE) {
        return Err(CameraError::UnsupportedSensor(name.to_string()));
    }
    Ok(())
}

/// Fill in the sensor name, and the resolution where none was requested.
pub fn apply_sensor_defaults(common: &mut CommonSettings, sensor: &SensorInfo) {
    common.camera_name = sensor.name.clone();
    if common.width == 0 {
        common.width = sensor.max_width;
    }
    if common.height == 0 {
        common.height = sensor.max_height;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::sim::{SimConfig, SimulatedHardware};
    use picam_mmal::Host;
    use std::sync::Arc;

    fn setup(config: SimConfig) -> (Arc<SimulatedHardware>, Graph) {
        let sim = Arc::new(SimulatedHardware::new(config));
        let host = Host::new(sim.clone());
        host.bring_up().unwrap();
        (sim, host.graph().unwrap())
    }

    #[test]
    fn test_detect_sensor() {
        let (sim, mut graph) = setup(SimConfig::default());
        let info = detect_sensor(&mut graph);
        assert_eq!(info.name, "imx219");
        assert_eq!((info.max_width, info.max_height), (3280, 2464));
        assert_eq!(sim.component_count(), 0);
    }

    #[test]
    fn test_detect_sensor_fallback() {
        let (_sim, mut graph) = setup(SimConfig {
            sensor: None,
            ..SimConfig::default()
        });
        assert_eq!(detect_sensor(&mut graph), SensorInfo::default());

        let (_sim, mut graph) = setup(SimConfig {
            fail_create: Some(ComponentKind::CameraInfo),
            ..SimConfig::default()
        });
        assert_eq!(detect_sensor(&mut graph).name, FALLBACK_SENSOR);
    }

    #[test]
    fn test_check_camera_model() {
        assert!(check_camera_model("imx219").is_ok());
        assert!(matches!(
            check_camera_model("toshh2c"),
            Err(CameraError::UnsupportedSensor(_))
        ));
    }

    #[test]
    fn test_apply_sensor_defaults() {
        let sensor = SensorInfo::default();
        let mut common = CommonSettings::default();
        apply_sensor_defaults(&mut common, &sensor);
        assert_eq!((common.width, common.height), (FALLBACK_WIDTH, FALLBACK_HEIGHT));

        let mut common = CommonSettings {
            width: 640,
            height: 480,
            ..CommonSettings::default()
        };
        apply_sensor_defaults(&mut common, &sensor);
        assert_eq!((common.width, common.height), (640, 480));
        assert_eq!(common.camera_name, FALLBACK_SENSOR);
    }
}
