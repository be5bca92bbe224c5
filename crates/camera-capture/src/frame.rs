//! Video frame types and processing

use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};

use crate::CameraError;

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Mjpeg,
    Yuyv,
}

/// Decoded RGB video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since the source was opened)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_ns: u64,
        sequence: u32,
    ) -> Result<Self, CameraError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CameraError::Format(format!(
                "expected {} bytes for {}x{} RGB, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        })
    }

    /// Raw RGB bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let idx = ((y * self.width + x) * 3) as usize;
            // Luminance formula: 0.299*R + 0.587*G + 0.114*B
            let luma = self.data[idx] as f32 * 0.299
                + self.data[idx + 1] as f32 * 0.587
                + self.data[idx + 2] as f32 * 0.114;
            Luma([luma as u8])
        })
    }

    /// Hand the pixel buffer over as an `RgbImage` for drawing
    pub fn into_rgb_image(self) -> RgbImage {
        let (width, height) = (self.width, self.height);
        // Length is checked in `new`, so this only falls back on a logic error.
        RgbImage::from_raw(width, height, self.data).unwrap_or_else(|| RgbImage::new(width, height))
    }
}
