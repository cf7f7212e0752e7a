//! Typed port parameters.

use picam_types::{
    AwbMode, ColourEffects, DrcStrength, ExposureMode, FlickerAvoid, H264Level, H264Profile,
    ImageEffect, IntraRefreshType, MeteringMode, StereoMode,
};

use crate::format::Rect;

/// A signed rational number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Converts to floating point; a zero denominator yields 0.
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            f64::from(self.num) / f64::from(self.den)
        }
    }

    /// 16.16 fixed-point representation of a float.
    pub fn from_fixed(value: f32) -> Self {
        Self::new((value * 65536.0) as i32, 65536)
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

/// Image mirroring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mirror {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

impl Mirror {
    pub fn from_flips(hflip: bool, vflip: bool) -> Self {
        match (hflip, vflip) {
            (false, false) => Self::None,
            (true, false) => Self::Horizontal,
            (false, true) => Self::Vertical,
            (true, true) => Self::Both,
        }
    }
}

/// Camera-wide configuration committed before the component is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraConfig {
    pub max_stills_w: u32,
    pub max_stills_h: u32,
    pub stills_yuv422: bool,
    pub one_shot_stills: bool,
    pub max_preview_video_w: u32,
    pub max_preview_video_h: u32,
    pub num_preview_video_frames: u32,
    pub stills_capture_circular_buffer_height: u32,
    pub fast_preview_resume: bool,
    /// Timestamp frames with the system time clock.
    pub use_stc_timestamp: bool,
}

/// Sensor information reported by the camera-info component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub name: String,
    pub max_width: u32,
    pub max_height: u32,
}

/// Values reported by a camera settings change event.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraSettings {
    /// Exposure in microseconds.
    pub exposure: u32,
    pub analog_gain: Rational,
    pub digital_gain: Rational,
    pub awb_red_gain: Rational,
    pub awb_blue_gain: Rational,
    pub focus_position: u32,
}

/// Text annotation as sent to the camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextAnnotation {
    pub enable: bool,
    pub text: String,
    pub show_shutter: bool,
    pub show_analog_gain: bool,
    pub show_lens: bool,
    pub show_caf: bool,
    pub show_motion: bool,
    pub show_frame_num: bool,
    pub enable_text_background: bool,
    pub custom_background_colour: bool,
    pub custom_background_y: u8,
    pub custom_background_u: u8,
    pub custom_background_v: u8,
    pub custom_text_colour: bool,
    pub custom_text_y: u8,
    pub custom_text_u: u8,
    pub custom_text_v: u8,
    pub text_size: u32,
    pub justify: u32,
    pub x_offset: u32,
    pub y_offset: u32,
}

/// Intra refresh configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntraRefresh {
    pub mode: IntraRefreshType,
    pub air_mbs: u32,
    pub air_ref: u32,
    pub cir_mbs: u32,
    pub pir_mbs: u32,
}

/// JPEG thumbnail configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thumbnail {
    pub enable: bool,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
}

/// Renderer display region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayRegion {
    pub layer: i32,
    pub alpha: u8,
    pub fullscreen: bool,
    pub dest_rect: Option<Rect>,
    pub display: u32,
}

/// Identifies a parameter for reads and change-event requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterId {
    CameraNum,
    CustomSensorConfig,
    CameraConfig,
    CameraInfo,
    StereoscopicMode,
    Saturation,
    Sharpness,
    Contrast,
    Brightness,
    Iso,
    VideoStabilisation,
    ExposureCompensation,
    ExposureMode,
    FlickerAvoid,
    MeteringMode,
    AwbMode,
    AwbGains,
    ImageEffect,
    ColourEffect,
    Rotation,
    Mirror,
    InputCrop,
    ShutterSpeed,
    Drc,
    CaptureStatsPass,
    Annotate,
    AnalogGain,
    DigitalGain,
    CameraSettings,
    ChangeEventRequest,
    FpsRange,
    Capture,
    ExifDisable,
    EnableRawCapture,
    Burst,
    IntraPeriod,
    InitialQuant,
    MinQuant,
    MaxQuant,
    Profile,
    ImmutableInput,
    InlineHeader,
    SpsTiming,
    InlineVectors,
    IntraRefresh,
    MbRowsPerSlice,
    RequestIFrame,
    JpegQuality,
    JpegRestartInterval,
    Thumbnail,
    DisplayRegion,
}

/// A parameter and its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    CameraNum(u32),
    CustomSensorConfig(u32),
    CameraConfig(CameraConfig),
    CameraInfo(CameraInfo),
    StereoscopicMode(StereoMode),
    Saturation(Rational),
    Sharpness(Rational),
    Contrast(Rational),
    Brightness(Rational),
    Iso(u32),
    VideoStabilisation(bool),
    ExposureCompensation(i32),
    ExposureMode(ExposureMode),
    FlickerAvoid(FlickerAvoid),
    MeteringMode(MeteringMode),
    AwbMode(AwbMode),
    AwbGains { red: Rational, blue: Rational },
    ImageEffect(ImageEffect),
    ColourEffect(ColourEffects),
    Rotation(i32),
    Mirror(Mirror),
    /// 16.16 fixed-point crop of the sensor.
    InputCrop(Rect),
    ShutterSpeed(u32),
    Drc(DrcStrength),
    CaptureStatsPass(bool),
    Annotate(TextAnnotation),
    AnalogGain(Rational),
    DigitalGain(Rational),
    CameraSettings(CameraSettings),
    ChangeEventRequest { id: ParameterId, enable: bool },
    FpsRange { low: Rational, high: Rational },
    Capture(bool),
    ExifDisable(bool),
    EnableRawCapture(bool),
    Burst(bool),
    IntraPeriod(u32),
    InitialQuant(u32),
    MinQuant(u32),
    MaxQuant(u32),
    Profile { profile: H264Profile, level: H264Level },
    ImmutableInput(bool),
    InlineHeader(bool),
    SpsTiming(bool),
    InlineVectors(bool),
    IntraRefresh(IntraRefresh),
    MbRowsPerSlice(u32),
    RequestIFrame(bool),
    JpegQuality(u32),
    JpegRestartInterval(u32),
    Thumbnail(Thumbnail),
    DisplayRegion(DisplayRegion),
}

impl Parameter {
    /// Returns the identifier of this parameter.
    pub fn id(&self) -> ParameterId {
        match self {
            Self::CameraNum(_) => ParameterId::CameraNum,
            Self::CustomSensorConfig(_) => ParameterId::CustomSensorConfig,
            Self::CameraConfig(_) => ParameterId::CameraConfig,
            Self::CameraInfo(_) => ParameterId::CameraInfo,
            Self::StereoscopicMode(_) => ParameterId::StereoscopicMode,
            Self::Saturation(_) => ParameterId::Saturation,
            Self::Sharpness(_) => ParameterId::Sharpness,
            Self::Contrast(_) => ParameterId::Contrast,
            Self::Brightness(_) => ParameterId::Brightness,
            Self::Iso(_) => ParameterId::Iso,
            Self::VideoStabilisation(_) => ParameterId::VideoStabilisation,
            Self::ExposureCompensation(_) => ParameterId::ExposureCompensation,
            Self::ExposureMode(_) => ParameterId::ExposureMode,
            Self::FlickerAvoid(_) => ParameterId::FlickerAvoid,
            Self::MeteringMode(_) => ParameterId::MeteringMode,
            Self::AwbMode(_) => ParameterId::AwbMode,
            Self::AwbGains { .. } => ParameterId::AwbGains,
            Self::ImageEffect(_) => ParameterId::ImageEffect,
            Self::ColourEffect(_) => ParameterId::ColourEffect,
            Self::Rotation(_) => ParameterId::Rotation,
            Self::Mirror(_) => ParameterId::Mirror,
            Self::InputCrop(_) => ParameterId::InputCrop,
            Self::ShutterSpeed(_) => ParameterId::ShutterSpeed,
            Self::Drc(_) => ParameterId::Drc,
            Self::CaptureStatsPass(_) => ParameterId::CaptureStatsPass,
            Self::Annotate(_) => ParameterId::Annotate,
            Self::AnalogGain(_) => ParameterId::AnalogGain,
            Self::DigitalGain(_) => ParameterId::DigitalGain,
            Self::CameraSettings(_) => ParameterId::CameraSettings,
            Self::ChangeEventRequest { .. } => ParameterId::ChangeEventRequest,
            Self::FpsRange { .. } => ParameterId::FpsRange,
            Self::Capture(_) => ParameterId::Capture,
            Self::ExifDisable(_) => ParameterId::ExifDisable,
            Self::EnableRawCapture(_) => ParameterId::EnableRawCapture,
            Self::Burst(_) => ParameterId::Burst,
            Self::IntraPeriod(_) => ParameterId::IntraPeriod,
            Self::InitialQuant(_) => ParameterId::InitialQuant,
            Self::MinQuant(_) => ParameterId::MinQuant,
            Self::MaxQuant(_) => ParameterId::MaxQuant,
            Self::Profile { .. } => ParameterId::Profile,
            Self::ImmutableInput(_) => ParameterId::ImmutableInput,
            Self::InlineHeader(_) => ParameterId::InlineHeader,
            Self::SpsTiming(_) => ParameterId::SpsTiming,
            Self::InlineVectors(_) => ParameterId::InlineVectors,
            Self::IntraRefresh(_) => ParameterId::IntraRefresh,
            Self::MbRowsPerSlice(_) => ParameterId::MbRowsPerSlice,
            Self::RequestIFrame(_) => ParameterId::RequestIFrame,
            Self::JpegQuality(_) => ParameterId::JpegQuality,
            Self::JpegRestartInterval(_) => ParameterId::JpegRestartInterval,
            Self::Thumbnail(_) => ParameterId::Thumbnail,
            Self::DisplayRegion(_) => ParameterId::DisplayRegion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_fixed_point() {
        let r = Rational::from_fixed(1.5);
        assert_eq!(r, Rational::new(98304, 65536));
        assert!((r.as_f64() - 1.5).abs() < f64::EPSILON);
        assert_eq!(Rational::new(1, 0).as_f64(), 0.0);
    }

    #[test]
    fn test_mirror_from_flips() {
        assert_eq!(Mirror::from_flips(false, false), Mirror::None);
        assert_eq!(Mirror::from_flips(true, true), Mirror::Both);
        assert_eq!(Mirror::from_flips(false, true), Mirror::Vertical);
    }

    #[test]
    fn test_parameter_id() {
        assert_eq!(Parameter::Capture(true).id(), ParameterId::Capture);
        assert_eq!(
            Parameter::AwbGains {
                red: Rational::default(),
                blue: Rational::default()
            }
            .id(),
            ParameterId::AwbGains
        );
    }
}
