//! Preview renderer or null sink.

use picam_mmal::{ComponentId, ComponentKind, DisplayRegion, Graph, Parameter, PortRef, Rect};
use picam_types::PreviewConfig;
use tracing::{debug, instrument, warn};

use crate::error::HalContext;
use crate::CameraResult;

/// Build the component that consumes the camera preview output.
///
/// Without a preview a null sink keeps the camera's exposure loop running.
#[instrument(name = "create_preview", skip(graph, config), fields(want_preview = config.want_preview))]
pub fn create_preview(graph: &mut Graph, config: &PreviewConfig) -> CameraResult<ComponentId> {
    let kind = if config.want_preview {
        ComponentKind::VideoRenderer
    } else {
        ComponentKind::NullSink
    };
    let id = graph
        .create_component(kind)
        .stage("Unable to create preview component")?;

    if let Err(e) = configure(graph, id, config) {
        if let Err(destroy) = graph.destroy_component(id) {
            warn!("Failed to destroy preview after error: {}", destroy);
        }
        return Err(e);
    }
    debug!(?id, "Preview created");
    Ok(id)
}

fn configure(graph: &mut Graph, id: ComponentId, config: &PreviewConfig) -> CameraResult<()> {
    if config.want_preview {
        let region = DisplayRegion {
            layer: config.layer,
            alpha: config.opacity,
            fullscreen: config.fullscreen,
            dest_rect: (!config.fullscreen).then(|| {
                Rect::new(
                    config.window.x,
                    config.window.y,
                    config.window.width,
                    config.window.height,
                )
            }),
            display: config.display,
        };
        match graph.set_parameter(PortRef::input(id, 0), &Parameter::DisplayRegion(region)) {
            Ok(()) => {}
            Err(e) if e.is_not_supported() => {
                warn!("Display region not supported by renderer, using defaults");
            }
            Err(e) => {
                return Err(e).stage("Unable to set preview port parameters");
            }
        }
    }

    graph
        .enable_component(id)
        .stage("Unable to enable preview component")
}

#[cfg(test)]
mod tests {
    use super::*;
    use picam_mmal::sim::{SimConfig, SimulatedHardware};
    use picam_mmal::{Host, ParameterId, Status};
    use picam_types::Window;
    use std::sync::Arc;

    fn setup(config: SimConfig) -> (Arc<SimulatedHardware>, Graph) {
        let sim = Arc::new(SimulatedHardware::new(config));
        let host = Host::new(sim.clone());
        host.bring_up().unwrap();
        (sim, host.graph().unwrap())
    }

    #[test]
    fn test_null_sink_without_preview() {
        let (sim, mut graph) = setup(SimConfig::default());
        let config = PreviewConfig {
            want_preview: false,
            ..PreviewConfig::default()
        };
        let id = create_preview(&mut graph, &config).unwrap();
        assert_eq!(sim.components_of_kind(ComponentKind::NullSink), vec![id]);
        assert!(graph.component(id).unwrap().is_enabled());
    }

    #[test]
    fn test_windowed_renderer() {
        let (sim, mut graph) = setup(SimConfig::default());
        let config = PreviewConfig {
            fullscreen: false,
            opacity: 128,
            window: Window {
                x: 10,
                y: 20,
                width: 640,
                height: 480,
            },
            ..PreviewConfig::default()
        };
        let id = create_preview(&mut graph, &config).unwrap();
        let Some(Parameter::DisplayRegion(region)) =
            sim.parameter(PortRef::input(id, 0), ParameterId::DisplayRegion)
        else {
            panic!("display region not set");
        };
        assert_eq!(region.alpha, 128);
        assert_eq!(region.layer, 2);
        assert_eq!(region.dest_rect, Some(Rect::new(10, 20, 640, 480)));
    }

    #[test]
    fn test_unsupported_display_region_tolerated() {
        let (_sim, mut graph) = setup(SimConfig {
            reject_parameters: vec![(ParameterId::DisplayRegion, Status::NotSupported)],
            ..SimConfig::default()
        });
        assert!(create_preview(&mut graph, &PreviewConfig::default()).is_ok());
    }

    #[test]
    fn test_rejected_display_region_rolls_back() {
        let (sim, mut graph) = setup(SimConfig {
            reject_parameters: vec![(ParameterId::DisplayRegion, Status::Invalid)],
            ..SimConfig::default()
        });
        assert!(create_preview(&mut graph, &PreviewConfig::default()).is_err());
        assert_eq!(sim.component_count(), 0);
    }
}
