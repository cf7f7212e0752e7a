//! Digital zoom through the camera input crop.

use picam_mmal::{ComponentId, Graph, Parameter, ParameterId, PortRef, Rect};
use picam_types::Roi;
use tracing::{debug, instrument};

use crate::error::HalContext;
use crate::CameraResult;

/// Full frame in 16.16 fixed point.
const FRAME: u32 = 65536;

/// Tightest crop, 15% of the frame.
pub const ZOOM_FULL: u32 = 9830;

/// Crop change per zoom step, a tenth of the frame.
pub const ZOOM_STEP: u32 = FRAME / 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomCommand {
    In,
    Out,
    Reset,
}

/// Next crop for a zoom step. The result is always centred.
pub fn zoom_crop(current: Rect, command: ZoomCommand) -> Rect {
    let (width, height) = match command {
        ZoomCommand::In if current.width <= ZOOM_FULL + ZOOM_STEP => (ZOOM_FULL, ZOOM_FULL),
        ZoomCommand::In => (current.width - ZOOM_STEP, current.height.saturating_sub(ZOOM_STEP)),
        ZoomCommand::Out if current.width <= FRAME - ZOOM_STEP => {
            (current.width + ZOOM_STEP, (current.height + ZOOM_STEP).min(FRAME))
        }
        ZoomCommand::Out | ZoomCommand::Reset => (FRAME, FRAME),
    };
    Rect::new(
        ((FRAME - width) / 2) as i32,
        ((FRAME - height) / 2) as i32,
        width,
        height,
    )
}

fn crop_to_roi(crop: Rect) -> Roi {
    let unit = |v: f64| v / f64::from(FRAME);
    Roi {
        x: unit(f64::from(crop.x)),
        y: unit(f64::from(crop.y)),
        w: unit(f64::from(crop.width)),
        h: unit(f64::from(crop.height)),
    }
}

/// Apply one zoom step to a running camera and update `roi` to match.
#[instrument(name = "zoom", skip(graph, roi))]
pub fn zoom(graph: &Graph, camera: ComponentId, command: ZoomCommand, roi: &mut Roi) -> CameraResult<Rect> {
    let control = PortRef::control(camera);
    let current = match graph
        .get_parameter(control, ParameterId::InputCrop)
        .stage("Unable to read input crop")?
    {
        Parameter::InputCrop(rect) => rect,
        _ => Rect::new(0, 0, FRAME, FRAME),
    };

    let crop = zoom_crop(current, command);
    graph
        .set_parameter(control, &Parameter::InputCrop(crop))
        .stage("Unable to set input crop")?;
    *roi = crop_to_roi(crop);
    debug!(x = roi.x, y = roi.y, w = roi.w, h = roi.h, "Zoom applied");
    Ok(crop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::sim::{SimConfig, SimulatedHardware};
    use picam_mmal::{ComponentKind, Host};
    use std::sync::Arc;

    fn full() -> Rect {
        Rect::new(0, 0, FRAME, FRAME)
    }

    #[test]
    fn test_zoom_in_steps_and_centres() {
        let crop = zoom_crop(full(), ZoomCommand::In);
        assert_eq!(crop.width, FRAME - ZOOM_STEP);
        assert_eq!(crop.x, (ZOOM_STEP / 2) as i32);
        assert_eq!(crop.x, crop.y);
    }

    #[test]
    fn test_zoom_in_stops_at_limit() {
        let mut crop = full();
        for _ in 0..20 {
            crop = zoom_crop(crop, ZoomCommand::In);
        }
        assert_eq!((crop.width, crop.height), (ZOOM_FULL, ZOOM_FULL));
        assert_eq!(crop.x, ((FRAME - ZOOM_FULL) / 2) as i32);
    }

    #[test]
    fn test_zoom_out_and_reset() {
        assert_eq!(zoom_crop(full(), ZoomCommand::Out), full());
        let zoomed = zoom_crop(zoom_crop(full(), ZoomCommand::In), ZoomCommand::In);
        assert_eq!(zoom_crop(zoomed, ZoomCommand::Out).width, FRAME - ZOOM_STEP);
        assert_eq!(zoom_crop(zoomed, ZoomCommand::Reset), full());
    }

    #[test]
    fn test_zoom_updates_camera_and_roi() {
        let sim = Arc::new(SimulatedHardware::new(SimConfig::default()));
        let host = Host::new(sim.clone());
        host.bring_up().unwrap();
        let mut graph = host.graph().unwrap();
        let camera = graph.create_component(ComponentKind::Camera).unwrap();

        let mut roi = Roi::FULL;
        let crop = zoom(&graph, camera, ZoomCommand::In, &mut roi).unwrap();
        assert_eq!(
            sim.parameter(PortRef::control(camera), ParameterId::InputCrop),
            Some(Parameter::InputCrop(crop))
        );
        assert!((roi.w - 0.9).abs() < 1e-3);
        assert!((roi.x - 0.05).abs() < 1e-3);

        zoom(&graph, camera, ZoomCommand::Reset, &mut roi).unwrap();
        assert_eq!(roi, Roi::FULL);
    }
}
