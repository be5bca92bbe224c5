//! Synthetic camera for development without hardware

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::{CameraConfig, CameraError, FrameSource, FrameSourceFactory, VideoFrame};

/// Behaviour knobs for the mock camera
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Refuse to open, as if the device were missing or busy
    pub fail_open: bool,
    /// Every n-th capture returns a transient timeout
    pub timeout_every: Option<u32>,
    /// Report `Disconnected` after this many frames
    pub frame_limit: Option<u32>,
    /// Pace captures at the configured fps
    pub paced: bool,
}

/// Mock camera producing a moving gradient test pattern
pub struct MockCamera {
    width: u32,
    height: u32,
    interval: Option<Duration>,
    behavior: MockBehavior,
    opened_at: Instant,
    captures: u32,
    sequence: u32,
    closed: bool,
}

impl MockCamera {
    pub fn new(config: &CameraConfig, behavior: MockBehavior) -> Result<Self, CameraError> {
        if behavior.fail_open {
            return Err(CameraError::Open(format!(
                "mock device {} unavailable",
                config.device_index
            )));
        }
        let interval = if behavior.paced && config.fps > 0 {
            Some(Duration::from_millis(1000 / config.fps as u64))
        } else {
            None
        };
        Ok(Self {
            width: config.width,
            height: config.height,
            interval,
            behavior,
            opened_at: Instant::now(),
            captures: 0,
            sequence: 0,
            closed: false,
        })
    }

    fn pattern(&self) -> Vec<u8> {
        let shift = self.sequence;
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let v = ((x + y + shift) % 256) as u8;
                data.extend_from_slice(&[v, v / 2, 255 - v]);
            }
        }
        data
    }
}

impl FrameSource for MockCamera {
    fn name(&self) -> &str {
        "mock camera"
    }

    fn capture(&mut self) -> Result<VideoFrame, CameraError> {
        if self.closed {
            return Err(CameraError::NotInitialized);
        }
        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }

        self.captures += 1;
        if let Some(n) = self.behavior.timeout_every {
            if n > 0 && self.captures % n == 0 {
                return Err(CameraError::Timeout);
            }
        }
        if let Some(limit) = self.behavior.frame_limit {
            if self.sequence >= limit {
                return Err(CameraError::Disconnected);
            }
        }

        let frame = VideoFrame::new(
            self.pattern(),
            self.width,
            self.height,
            self.opened_at.elapsed().as_nanos() as u64,
            self.sequence,
        )?;
        self.sequence += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        if !self.closed {
            debug!("Mock camera closed after {} frames", self.sequence);
            self.closed = true;
        }
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Factory for mock cameras; counts how many times a device was acquired
#[derive(Debug, Clone, Default)]
pub struct MockCameraFactory {
    behavior: MockBehavior,
    opens: Arc<AtomicUsize>,
}

impl MockCameraFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of successful or attempted opens so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl FrameSourceFactory for MockCameraFactory {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn FrameSource>, CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let camera = MockCamera::new(config, self.behavior.clone())?;
        info!(
            "Opened mock camera {}x{} @ {}fps",
            config.width, config.height, config.fps
        );
        Ok(Box::new(camera))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> CameraConfig {
        CameraConfig {
            width: 8,
            height: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_mock_frames_have_configured_size() {
        let mut camera = MockCamera::new(&small_config(), MockBehavior::default()).unwrap();
        let first = camera.capture().unwrap();
        let second = camera.capture().unwrap();
        assert_eq!((first.width, first.height), (8, 4));
        assert_eq!(first.data().len(), 8 * 4 * 3);
        assert_eq!(second.sequence, first.sequence + 1);
    }

    #[test]
    fn test_mock_open_failure() {
        let factory = MockCameraFactory::new(MockBehavior {
            fail_open: true,
            ..Default::default()
        });
        let result = factory.open(&small_config());
        assert!(matches!(result, Err(CameraError::Open(_))));
        assert_eq!(factory.open_count(), 1);
    }

    #[test]
    fn test_mock_periodic_timeouts_and_disconnect() {
        let behavior = MockBehavior {
            timeout_every: Some(2),
            frame_limit: Some(2),
            ..Default::default()
        };
        let mut camera = MockCamera::new(&small_config(), behavior).unwrap();
        assert!(camera.capture().is_ok());
        assert!(matches!(camera.capture(), Err(CameraError::Timeout)));
        assert!(camera.capture().is_ok());
        assert!(matches!(camera.capture(), Err(CameraError::Timeout)));
        assert!(matches!(camera.capture(), Err(CameraError::Disconnected)));
    }

    #[test]
    fn test_capture_after_close_fails() {
        let mut camera = MockCamera::new(&small_config(), MockBehavior::default()).unwrap();
        camera.close();
        assert!(matches!(camera.capture(), Err(CameraError::NotInitialized)));
    }
}
