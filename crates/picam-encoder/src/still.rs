//! JPEG still encoder.

use picam_mmal::{ComponentId, ComponentKind, Encoding, Graph, Parameter, PortRef, Thumbnail};
use picam_types::StillConfig;
use tracing::{info, instrument, warn};

use crate::error::HalContext;
use crate::{EncoderHandle, EncoderResult};

fn thumbnail(config: &StillConfig) -> Thumbnail {
    let thumb = &config.thumbnail;
    if thumb.enable && thumb.width > 0 && thumb.height > 0 {
        Thumbnail {
            enable: true,
            width: thumb.width,
            height: thumb.height,
            quality: thumb.quality,
        }
    } else {
        Thumbnail::default()
    }
}

/// Build and enable the JPEG encoder and its output pool.
#[instrument(name = "create_still_encoder", skip(graph, config), fields(quality = config.quality))]
pub fn create_still_encoder(graph: &mut Graph, config: &StillConfig) -> EncoderResult<EncoderHandle> {
    let id = graph
        .create_component(ComponentKind::ImageEncoder)
        .stage("Unable to create JPEG encoder component")?;

    match configure(graph, id, config) {
        Ok(handle) => {
            info!(?id, buffers = handle.pool.capacity(), "Still encoder ready");
            Ok(handle)
        }
        Err(e) => {
            if let Err(destroy) = graph.destroy_component(id) {
                warn!("Failed to destroy JPEG encoder after error: {}", destroy);
            }
            Err(e)
        }
    }
}

fn configure(graph: &mut Graph, id: ComponentId, config: &StillConfig) -> EncoderResult<EncoderHandle> {
    let input = PortRef::input(id, 0);
    let output = PortRef::output(id, 0);

    graph
        .copy_format(input, output)
        .stage("Unable to set format on JPEG encoder output port")?;
    let mut format = graph
        .format(output)
        .stage("Unable to set format on JPEG encoder output port")?;
    format.encoding = Encoding::Jpeg;
    format.encoding_variant = None;
    format.buffer_size = 0;
    format.buffer_num = 0;
    let negotiated = graph
        .commit_format(output, format)
        .stage("Unable to set format on JPEG encoder output port")?;
    graph
        .set_buffer_requirements(
            output,
            negotiated.buffer_num_recommended.max(negotiated.buffer_num_min),
            negotiated
                .buffer_size_recommended
                .max(negotiated.buffer_size_min),
        )
        .stage("Unable to set JPEG encoder buffers")?;

    graph
        .set_parameter(output, &Parameter::JpegQuality(config.quality))
        .stage("Unable to set JPEG quality")?;

    // Only a non-zero interval has to be honoured.
    if let Err(e) = graph.set_parameter(output, &Parameter::JpegRestartInterval(config.restart_interval)) {
        if config.restart_interval > 0 {
            return Err(e).stage("Unable to set JPEG restart interval");
        }
        warn!("Unable to clear JPEG restart interval: {}", e);
    }

    if let Err(e) = graph.set_parameter(PortRef::control(id), &Parameter::Thumbnail(thumbnail(config))) {
        warn!("Unable to configure thumbnail: {}", e);
    }

    graph
        .enable_component(id)
        .stage("Unable to enable JPEG encoder component")?;
    let pool = graph
        .create_pool(output)
        .stage("Failed to create buffer header pool for JPEG encoder output port")?;

    Ok(EncoderHandle {
        id,
        encoding: Encoding::Jpeg,
        bitrate: 0,
        pool,
    })
}
