//! Camera control values.

use serde::{Deserialize, Serialize};

/// Exposure mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    Off,
    #[default]
    Auto,
    Night,
    NightPreview,
    Backlight,
    Spotlight,
    Sports,
    Snow,
    Beach,
    VeryLong,
    FixedFps,
    Antishake,
    Fireworks,
}

/// Exposure metering mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeteringMode {
    #[default]
    Average,
    Spot,
    Backlit,
    Matrix,
}

/// Automatic white balance mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AwbMode {
    Off,
    #[default]
    Auto,
    Sun,
    Cloud,
    Shade,
    Tungsten,
    Fluorescent,
    Incandescent,
    Flash,
    Horizon,
    GreyWorld,
}

/// Image effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEffect {
    #[default]
    None,
    Negative,
    Solarize,
    Posterize,
    Whiteboard,
    Blackboard,
    Sketch,
    Denoise,
    Emboss,
    OilPaint,
    Hatch,
    Gpen,
    Pastel,
    Watercolour,
    Film,
    Blur,
    Saturation,
    ColourSwap,
    WashedOut,
    ColourPoint,
    ColourBalance,
    Cartoon,
}

/// Flicker avoidance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlickerAvoid {
    #[default]
    Off,
    Auto,
    #[serde(rename = "50hz")]
    Hz50,
    #[serde(rename = "60hz")]
    Hz60,
}

/// Dynamic range compression strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrcStrength {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

/// Stereoscopic frame layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StereoLayout {
    #[default]
    None,
    SideBySide,
    TopBottom,
}

/// Stereoscopic mode applied to every camera output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoMode {
    pub layout: StereoLayout,
    pub decimate: bool,
    pub swap_eyes: bool,
}

/// Fixed U/V colour effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColourEffects {
    pub enable: bool,
    pub u: u8,
    pub v: u8,
}

impl Default for ColourEffects {
    fn default() -> Self {
        Self {
            enable: false,
            u: 128,
            v: 128,
        }
    }
}

/// Manual white balance gains (0 disables).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwbGains {
    pub red: f32,
    pub blue: f32,
}

/// Normalised region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Roi {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Default for Roi {
    fn default() -> Self {
        Self::FULL
    }
}

impl Roi {
    /// The whole sensor.
    pub const FULL: Roi = Roi {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    /// Returns true if the rectangle lies within the unit square.
    pub fn is_valid(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        in_unit(self.x)
            && in_unit(self.y)
            && self.w > 0.0
            && self.h > 0.0
            && self.x + self.w <= 1.0 + f64::EPSILON
            && self.y + self.h <= 1.0 + f64::EPSILON
    }
}

/// Annotation feature bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotateFlags(pub u32);

impl AnnotateFlags {
    pub const USER_TEXT: Self = Self(1);
    pub const TIME_TEXT: Self = Self(2);
    pub const DATE_TEXT: Self = Self(4);
    pub const SHUTTER_SETTINGS: Self = Self(8);
    pub const CAF_SETTINGS: Self = Self(16);
    pub const GAIN_SETTINGS: Self = Self(32);
    pub const LENS_SETTINGS: Self = Self(64);
    pub const MOTION_SETTINGS: Self = Self(128);
    pub const FRAME_NUMBER: Self = Self(256);
    pub const BLACK_BACKGROUND: Self = Self(512);
    pub const APP_TEXT: Self = Self(1024);

    /// No annotation.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if no bits are set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AnnotateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for AnnotateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// On-frame annotation configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    pub flags: AnnotateFlags,

    /// Free text; `%` tokens are expanded as a time format.
    pub text: String,

    /// Text size (0 = default).
    pub text_size: u32,

    /// Text colour as 0xYYUUVV (None = default).
    pub text_colour: Option<u32>,

    /// Background colour as 0xYYUUVV (None = default).
    pub bg_colour: Option<u32>,

    pub justify: u32,
    pub x: u32,
    pub y: u32,
}

/// Full set of camera control values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParameters {
    /// -100 to 100.
    pub sharpness: i32,
    /// -100 to 100.
    pub contrast: i32,
    /// 0 to 100.
    pub brightness: i32,
    /// -100 to 100.
    pub saturation: i32,
    /// 0 = auto.
    pub iso: u32,
    pub video_stabilisation: bool,
    /// -10 to 10.
    pub exposure_compensation: i32,
    pub exposure_mode: ExposureMode,
    pub flicker_avoid: FlickerAvoid,
    pub metering_mode: MeteringMode,
    pub awb_mode: AwbMode,
    pub awb_gains: AwbGains,
    pub image_effect: ImageEffect,
    pub colour_effects: ColourEffects,
    /// Degrees; normalised to a multiple of 90.
    pub rotation: i32,
    pub hflip: bool,
    pub vflip: bool,
    pub roi: Roi,
    /// Microseconds (0 = auto).
    pub shutter_speed: u32,
    pub drc: DrcStrength,
    pub stats_pass: bool,
    pub annotate: AnnotateConfig,
    pub stereo: StereoMode,
    /// 0 = auto.
    pub analog_gain: f32,
    /// 0 = auto.
    pub digital_gain: f32,
    /// Request and log camera setting change events.
    pub settings: bool,
}

impl Default for CameraParameters {
    fn default() -> Self {
        Self {
            sharpness: 0,
            contrast: 0,
            brightness: 50,
            saturation: 0,
            iso: 0,
            video_stabilisation: false,
            exposure_compensation: 0,
            exposure_mode: ExposureMode::Auto,
            flicker_avoid: FlickerAvoid::Off,
            metering_mode: MeteringMode::Average,
            awb_mode: AwbMode::Auto,
            awb_gains: AwbGains::default(),
            image_effect: ImageEffect::None,
            colour_effects: ColourEffects::default(),
            rotation: 0,
            hflip: false,
            vflip: false,
            roi: Roi::FULL,
            shutter_speed: 0,
            drc: DrcStrength::Off,
            stats_pass: false,
            annotate: AnnotateConfig::default(),
            stereo: StereoMode::default(),
            analog_gain: 0.0,
            digital_gain: 0.0,
            settings: false,
        }
    }
}
