//! Camera Capture Library
//!
//! Frame sources for the proximity guard:
//! - `FrameSource` / `FrameSourceFactory` traits implemented by every backend
//! - Synthetic `MockCamera` for running without hardware
//! - Native device capture through nokhwa (feature `native`)

pub mod frame;
pub mod mock;
#[cfg(feature = "native")]
pub mod native;

pub use frame::{PixelFormat, VideoFrame};
pub use mock::{MockBehavior, MockCamera, MockCameraFactory};
#[cfg(feature = "native")]
pub use native::{NativeCamera, NativeCameraFactory};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("Camera not initialized")]
    NotInitialized,

    #[error("Camera disconnected")]
    Disconnected,
}

impl CameraError {
    /// Whether the error only affects the current frame.
    ///
    /// Transient errors are absorbed by the capture loop (skip the frame and
    /// back off); everything else ends the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CameraError::Timeout | CameraError::Stream(_) | CameraError::Format(_)
        )
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index (0 = first camera)
    pub device_index: u32,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Requested pixel format from the device
    pub format: PixelFormat,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 15,
            format: PixelFormat::Mjpeg,
        }
    }
}

/// An opened camera handle yielding consecutive frames.
///
/// Handles are created and used on the capture thread only, so they need not
/// be `Send`.
pub trait FrameSource {
    /// Human readable device name
    fn name(&self) -> &str;

    /// Block until the next frame is available
    fn capture(&mut self) -> Result<VideoFrame, CameraError>;

    /// Stop streaming and release the device. Also performed on drop.
    fn close(&mut self) {}
}

/// Opens frame sources. Shared across activations, so it must be `Send + Sync`.
pub trait FrameSourceFactory: Send + Sync {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError>;
}
