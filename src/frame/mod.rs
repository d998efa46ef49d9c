//! Decoded image frames handed from pipeline chains to the display
//!
//! Frames use a fixed 4 bytes per pixel BGRA layout. A [`Frame`] always owns
//! exactly `width * height * 4` bytes; the only way to build one from
//! runtime memory is a full copy, so partially filled frames never escape.

mod buffer;
mod pool;

pub use buffer::{FrameBuffer, FrameStats};

use thiserror::Error;

/// Bytes per pixel of every delivered frame (BGRA).
pub const BYTES_PER_PIXEL: usize = 4;

/// Dimensions reported by the runtime alongside raw pixel memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub width: u32,
    pub height: u32,
}

impl FrameMetadata {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of bytes a frame of these dimensions occupies, `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(BYTES_PER_PIXEL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("frame {width}x{height} needs {expected} bytes, got {actual}")]
    ShortBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// One decoded image with an owned pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an owned buffer, which must match the dimensions exactly.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = Self::expected_len(FrameMetadata::new(width, height))?;
        if data.len() != expected {
            return Err(FrameError::ShortBuffer {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Copy runtime-owned memory into a new frame.
    ///
    /// `raw` may be longer than required (trailing padding is ignored) but
    /// never shorter.
    pub fn copy_from(raw: &[u8], meta: FrameMetadata) -> Result<Self, FrameError> {
        Self::copy_into(raw, meta, Vec::new())
    }

    /// Same as [`Frame::copy_from`], reusing `storage` for the pixels.
    pub(crate) fn copy_into(
        raw: &[u8],
        meta: FrameMetadata,
        mut storage: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let expected = Self::expected_len(meta)?;
        if raw.len() < expected {
            return Err(FrameError::ShortBuffer {
                width: meta.width,
                height: meta.height,
                expected,
                actual: raw.len(),
            });
        }
        storage.clear();
        storage.extend_from_slice(&raw[..expected]);
        Ok(Self {
            width: meta.width,
            height: meta.height,
            data: storage,
        })
    }

    fn expected_len(meta: FrameMetadata) -> Result<usize, FrameError> {
        match meta.byte_len() {
            Some(len) if len > 0 => Ok(len),
            _ => Err(FrameError::InvalidSize {
                width: meta.width,
                height: meta.height,
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn metadata(&self) -> FrameMetadata {
        FrameMetadata::new(self.width, self.height)
    }

    /// Raw BGRA pixels, row after row without padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("size", &self.size())
            .finish()
    }
}
