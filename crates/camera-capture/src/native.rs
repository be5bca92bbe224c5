//! Device capture through nokhwa

use std::time::Instant;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tracing::{info, warn};

use crate::{CameraConfig, CameraError, FrameSource, FrameSourceFactory, PixelFormat, VideoFrame};

fn frame_format(format: PixelFormat) -> FrameFormat {
    match format {
        PixelFormat::Rgb24 => FrameFormat::RAWRGB,
        PixelFormat::Mjpeg => FrameFormat::MJPEG,
        PixelFormat::Yuyv => FrameFormat::YUYV,
    }
}

/// An opened, streaming camera device
pub struct NativeCamera {
    camera: Camera,
    name: String,
    opened_at: Instant,
    sequence: u32,
    streaming: bool,
}

impl NativeCamera {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let format = CameraFormat::new(
            Resolution::new(config.width, config.height),
            frame_format(config.format),
            config.fps,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(CameraIndex::Index(config.device_index), requested)
            .map_err(|e| CameraError::Open(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CameraError::Open(e.to_string()))?;

        let name = camera.info().human_name();
        info!("Opened camera {} ({})", config.device_index, name);

        Ok(Self {
            camera,
            name,
            opened_at: Instant::now(),
            sequence: 0,
            streaming: true,
        })
    }
}

impl FrameSource for NativeCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> Result<VideoFrame, CameraError> {
        if !self.streaming {
            return Err(CameraError::NotInitialized);
        }
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CameraError::Stream(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::Format(e.to_string()))?;

        let (width, height) = decoded.dimensions();
        let frame = VideoFrame::new(
            decoded.into_raw(),
            width,
            height,
            self.opened_at.elapsed().as_nanos() as u64,
            self.sequence,
        )?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn close(&mut self) {
        if self.streaming {
            if let Err(e) = self.camera.stop_stream() {
                warn!("Failed to stop camera stream: {}", e);
            }
            self.streaming = false;
        }
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens real camera devices
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCameraFactory;

impl FrameSourceFactory for NativeCameraFactory {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(NativeCamera::open(config)?))
    }
}
