//! Buffer headers exchanged with output ports.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Flags carried by a buffer header.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    pub const FRAME_START: Self = Self(1 << 1);
    pub const FRAME_END: Self = Self(1 << 2);
    pub const KEYFRAME: Self = Self(1 << 3);
    pub const CONFIG: Self = Self(1 << 5);
    pub const CODECSIDEINFO: Self = Self(1 << 7);
    pub const TRANSMISSION_FAILED: Self = Self(1 << 10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any bit of `other` is set.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for BufferFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(BufferFlags, &str); 6] = [
            (BufferFlags::FRAME_START, "FRAME_START"),
            (BufferFlags::FRAME_END, "FRAME_END"),
            (BufferFlags::KEYFRAME, "KEYFRAME"),
            (BufferFlags::CONFIG, "CONFIG"),
            (BufferFlags::CODECSIDEINFO, "CODECSIDEINFO"),
            (BufferFlags::TRANSMISSION_FAILED, "TRANSMISSION_FAILED"),
        ];

        let mut first = true;
        f.write_str("BufferFlags(")?;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str(")")
    }
}

/// A reusable buffer owned by a [`BufferPool`](crate::BufferPool).
#[derive(Debug)]
pub struct BufferHeader {
    index: usize,
    data: Vec<u8>,
    alloc_size: usize,
    /// Start of valid payload within the data.
    pub offset: usize,
    pub flags: BufferFlags,
    /// Presentation timestamp in microseconds, if known.
    pub pts: Option<i64>,
}

impl BufferHeader {
    pub(crate) fn new(index: usize, alloc_size: usize) -> Self {
        Self {
            index,
            data: Vec::with_capacity(alloc_size),
            alloc_size,
            offset: 0,
            flags: BufferFlags::empty(),
            pts: None,
        }
    }

    /// Position of this buffer within its pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Allocated capacity in bytes.
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    /// Number of valid bytes after `offset`.
    pub fn length(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &[u8] {
        self.data.get(self.offset..).unwrap_or(&[])
    }

    /// Replace the payload, truncating to the allocated size.
    ///
    /// Returns the number of bytes stored.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.alloc_size);
        self.data.clear();
        self.data.extend_from_slice(&bytes[..n]);
        self.offset = 0;
        n
    }

    /// Clear payload and metadata.
    pub fn reset(&mut self) {
        self.data.clear();
        self.offset = 0;
        self.flags = BufferFlags::empty();
        self.pts = None;
    }
}
