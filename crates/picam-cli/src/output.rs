//! Writing captured frames to disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use picam_engine::EncodedFrame;
use tracing::{debug, info};

/// Substitute `n` into the first `%d` or `%0Nd` of `pattern`.
///
/// Patterns without a placeholder are returned unchanged.
pub fn expand_pattern(pattern: &str, n: u64) -> String {
    let Some(start) = pattern.find('%') else {
        return pattern.to_string();
    };
    let rest = &pattern[start + 1..];
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if !rest[digits..].starts_with('d') {
        return pattern.to_string();
    }

    let width: usize = rest[..digits].parse().unwrap_or(0);
    format!(
        "{}{:0width$}{}",
        &pattern[..start],
        n,
        &rest[digits + 1..],
        width = width
    )
}

/// Appends encoded video to one file per segment.
pub struct SegmentWriter {
    pattern: String,
    segment: Option<u32>,
    file: Option<BufWriter<File>>,
    bytes: u64,
}

impl SegmentWriter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            segment: None,
            file: None,
            bytes: 0,
        }
    }

    pub fn write(&mut self, frame: &EncodedFrame) -> Result<()> {
        if self.segment != Some(frame.segment) {
            self.open(frame.segment)?;
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(&frame.data)
                .context("Failed to write video frame")?;
            self.bytes += frame.data.len() as u64;
        }
        Ok(())
    }

    fn open(&mut self, segment: u32) -> Result<()> {
        self.finish()?;
        let path = PathBuf::from(expand_pattern(&self.pattern, u64::from(segment)));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        info!(segment, path = %path.display(), "Writing segment");
        self.file = Some(BufWriter::new(file));
        self.segment = Some(segment);
        Ok(())
    }

    /// Flush and close the current segment.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().context("Failed to flush video segment")?;
            debug!(bytes = self.bytes, "Segment closed");
        }
        self.bytes = 0;
        Ok(())
    }
}

/// Write one still image, naming it from `pattern` and its frame number.
pub fn write_still(pattern: &str, frame: u64, data: &[u8]) -> Result<PathBuf> {
    let path = PathBuf::from(expand_pattern(pattern, frame));
    write_file(&path, data)?;
    Ok(path)
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(segment: u32, data: &'static [u8]) -> EncodedFrame {
        EncodedFrame {
            timestamp: 0,
            data: data.into(),
            offset: 0,
            keyframe: false,
            segment,
        }
    }

    #[test]
    fn test_expand_pattern() {
        assert_eq!(expand_pattern("image%04d.jpg", 7), "image0007.jpg");
        assert_eq!(expand_pattern("seg%d.h264", 12), "seg12.h264");
        assert_eq!(expand_pattern("plain.h264", 3), "plain.h264");
        assert_eq!(expand_pattern("100%.jpg", 3), "100%.jpg");
    }

    #[test]
    fn test_segment_writer_splits_files() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("video%02d.h264");
        let mut writer = SegmentWriter::new(pattern.to_string_lossy());

        writer.write(&frame(1, b"ab")).unwrap();
        writer.write(&frame(1, b"cd")).unwrap();
        writer.write(&frame(2, b"ef")).unwrap();
        writer.finish().unwrap();

        assert_eq!(std::fs::read(dir.path().join("video01.h264")).unwrap(), b"abcd");
        assert_eq!(std::fs::read(dir.path().join("video02.h264")).unwrap(), b"ef");
    }

    #[test]
    fn test_write_still() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("still%d.jpg");
        let path = write_still(&pattern.to_string_lossy(), 5, b"\xff\xd8").unwrap();
        assert!(path.ends_with("still5.jpg"));
    }
}
