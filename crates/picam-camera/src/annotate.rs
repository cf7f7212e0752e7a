//! On-frame text annotation.

use std::fmt::Write;

use chrono::{DateTime, TimeZone};
use picam_mmal::TextAnnotation;
use picam_types::{AnnotateConfig, AnnotateFlags};

/// Longest annotation text the camera accepts, in bytes.
pub const MAX_ANNOTATION_TEXT: usize = 255;

/// Expand a time format, or `None` if the pattern is not valid.
fn format_time<Tz: TimeZone>(now: &DateTime<Tz>, pattern: &str) -> Option<String>
where
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    write!(out, "{}", now.format(pattern)).ok()?;
    Some(out)
}

fn truncate_to_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

fn append_word(text: &mut String, word: &str) {
    if !text.is_empty() {
        text.push(' ');
    }
    text.push_str(word);
}

/// Split a packed 0xVVUUYY colour into its Y, U and V bytes.
fn unpack_yuv(colour: u32) -> (u8, u8, u8) {
    (
        (colour & 0xff) as u8,
        ((colour >> 8) & 0xff) as u8,
        ((colour >> 16) & 0xff) as u8,
    )
}

/// Build the camera annotation for `config` at time `now`.
pub fn build_annotation<Tz: TimeZone>(config: &AnnotateConfig, now: DateTime<Tz>) -> TextAnnotation
where
    Tz::Offset: std::fmt::Display,
{
    let flags = config.flags;
    if flags.is_empty() {
        return TextAnnotation::default();
    }

    let mut text = String::new();
    let mut formatted = false;
    let wants_text = flags.contains(AnnotateFlags::APP_TEXT) || flags.contains(AnnotateFlags::USER_TEXT);
    let wants_time = flags.contains(AnnotateFlags::TIME_TEXT);
    let wants_date = flags.contains(AnnotateFlags::DATE_TEXT);

    if wants_text {
        if (wants_time || wants_date) && config.text.contains('%') {
            if let Some(expanded) = format_time(&now, &config.text) {
                text = expanded;
                formatted = true;
            }
        }
        if !formatted {
            text = config.text.clone();
        }
    }
    if wants_time && !formatted {
        if let Some(time) = format_time(&now, "%X") {
            append_word(&mut text, &time);
        }
    }
    if wants_date && !formatted {
        if let Some(date) = format_time(&now, "%x") {
            append_word(&mut text, &date);
        }
    }
    truncate_to_boundary(&mut text, MAX_ANNOTATION_TEXT);

    let mut annotation = TextAnnotation {
        enable: true,
        text,
        show_shutter: flags.contains(AnnotateFlags::SHUTTER_SETTINGS),
        show_analog_gain: flags.contains(AnnotateFlags::GAIN_SETTINGS),
        show_lens: flags.contains(AnnotateFlags::LENS_SETTINGS),
        show_caf: flags.contains(AnnotateFlags::CAF_SETTINGS),
        show_motion: flags.contains(AnnotateFlags::MOTION_SETTINGS),
        show_frame_num: flags.contains(AnnotateFlags::FRAME_NUMBER),
        enable_text_background: flags.contains(AnnotateFlags::BLACK_BACKGROUND),
        text_size: config.text_size,
        justify: config.justify,
        x_offset: config.x,
        y_offset: config.y,
        ..TextAnnotation::default()
    };

    if let Some(colour) = config.bg_colour {
        let (y, u, v) = unpack_yuv(colour);
        annotation.custom_background_colour = true;
        annotation.custom_background_y = y;
        annotation.custom_background_u = u;
        annotation.custom_background_v = v;
    }
    if let Some(colour) = config.text_colour {
        let (y, u, v) = unpack_yuv(colour);
        annotation.custom_text_colour = true;
        annotation.custom_text_y = y;
        annotation.custom_text_u = u;
        annotation.custom_text_v = v;
    }

    annotation
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 15).unwrap()
    }

    #[test]
    fn test_disabled_annotation() {
        let annotation = build_annotation(&AnnotateConfig::default(), at_noon());
        assert!(!annotation.enable);
        assert!(annotation.text.is_empty());
    }

    #[test]
    fn test_user_text_with_time_pattern() {
        let config = AnnotateConfig {
            flags: AnnotateFlags::USER_TEXT | AnnotateFlags::TIME_TEXT,
            text: "cam1 %H:%M".to_string(),
            ..AnnotateConfig::default()
        };
        let annotation = build_annotation(&config, at_noon());
        assert!(annotation.enable);
        assert_eq!(annotation.text, "cam1 12:30");
    }

    #[test]
    fn test_time_and_date_appended() {
        let config = AnnotateConfig {
            flags: AnnotateFlags::USER_TEXT | AnnotateFlags::TIME_TEXT | AnnotateFlags::DATE_TEXT,
            text: "cam1".to_string(),
            ..AnnotateConfig::default()
        };
        let annotation = build_annotation(&config, at_noon());
        assert_eq!(annotation.text, "cam1 12:30:15 03/09/24");
    }

    #[test]
    fn test_flags_and_colours() {
        let config = AnnotateConfig {
            flags: AnnotateFlags::FRAME_NUMBER | AnnotateFlags::BLACK_BACKGROUND,
            text_colour: Some(0x80_80_ff),
            ..AnnotateConfig::default()
        };
        let annotation = build_annotation(&config, at_noon());
        assert!(annotation.show_frame_num);
        assert!(annotation.enable_text_background);
        assert!(annotation.custom_text_colour);
        assert_eq!(
            (annotation.custom_text_y, annotation.custom_text_u, annotation.custom_text_v),
            (0xff, 0x80, 0x80)
        );
        assert!(!annotation.custom_background_colour);
    }

    #[test]
    fn test_text_truncated() {
        let config = AnnotateConfig {
            flags: AnnotateFlags::APP_TEXT,
            text: "é".repeat(200),
            ..AnnotateConfig::default()
        };
        let annotation = build_annotation(&config, at_noon());
        assert!(annotation.text.len() <= MAX_ANNOTATION_TEXT);
        assert_eq!(annotation.text.len(), 254);
    }
}
