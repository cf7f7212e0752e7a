//! Camera and preview components for the picam pipeline.
//!
//! This crate builds the camera component for video or still sessions,
//! the preview sink that consumes its preview output, and applies the
//! camera control values (exposure, white balance, effects, crop, annotation).

mod annotate;
mod camera;
mod error;
mod events;
mod params;
mod preview;
mod sensor;
mod zoom;

pub use annotate::{build_annotation, MAX_ANNOTATION_TEXT};
pub use camera::{create_still_camera, create_video_camera, CameraHandle};
pub use error::CameraError;
pub use events::spawn_control_logger;
pub use params::{
    apply_all, normalize_rotation, roi_to_crop, set_awb_gains, set_brightness, set_contrast,
    set_exposure_compensation, set_flips, set_roi, set_rotation, set_saturation, set_sharpness,
};
pub use preview::create_preview;
pub use sensor::{
    apply_sensor_defaults, check_camera_model, detect_sensor, SensorInfo, FALLBACK_HEIGHT,
    FALLBACK_SENSOR, FALLBACK_WIDTH,
};
pub use zoom::{zoom, zoom_crop, ZoomCommand, ZOOM_FULL, ZOOM_STEP};

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Camera output feeding the preview.
pub const CAMERA_PREVIEW_PORT: u8 = 0;

/// Camera output feeding the video encoder.
pub const CAMERA_VIDEO_PORT: u8 = 1;

/// Camera output feeding the image encoder.
pub const CAMERA_CAPTURE_PORT: u8 = 2;

/// Number of camera outputs.
pub const CAMERA_OUTPUTS: u8 = 3;

/// Fewest buffers a streaming camera output may use without dropping frames.
pub const MIN_STREAMING_BUFFERS: u32 = 3;
