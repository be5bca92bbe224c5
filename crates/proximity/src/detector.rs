//! Face location on grayscale frames

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::GrayImage;
use rustface::{Detector, ImageData};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ProximityError;

/// Axis-aligned face bounding box in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Detection {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Detections with a non-positive size cannot be measured
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Multi-scale search parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorParams {
    /// Image pyramid step between scales (> 1.0)
    pub scale_factor: f64,
    /// Neighbouring hits required to keep a candidate (cascade backends)
    pub min_neighbors: u32,
    /// Smallest face searched for (pixels)
    pub min_size: u32,
    /// Largest face searched for (pixels, 0 = unbounded)
    pub max_size: u32,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.3,
            min_neighbors: 5,
            min_size: 30,
            max_size: 0,
        }
    }
}

/// Finds faces in a grayscale image
pub trait FaceLocator {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &LocatorParams,
    ) -> Result<Vec<Detection>, ProximityError>;
}

/// Builds a locator on the capture thread
pub trait LocatorFactory: Send + Sync {
    fn build(&self) -> Result<Box<dyn FaceLocator>, ProximityError>;
}

// SeetaFace refuses windows smaller than its 20px model size.
const SEETA_MIN_FACE: u32 = 20;

/// Funnel-structured cascade detector (SeetaFace) via rustface
pub struct SeetaFaceLocator {
    detector: Box<dyn Detector>,
}

impl SeetaFaceLocator {
    pub fn from_file(model_path: &str, score_threshold: f64) -> Result<Self, ProximityError> {
        info!("Loading face detection model from {}", model_path);
        let model = rustface::load_model(model_path)
            .map_err(|e| ProximityError::ModelLoad(format!("{}: {}", model_path, e)))?;
        let mut detector = rustface::create_detector_with_model(model);
        detector.set_score_thresh(score_threshold);
        detector.set_slide_window_step(4, 4);
        Ok(Self { detector })
    }

    fn configure(&mut self, params: &LocatorParams) {
        self.detector
            .set_min_face_size(params.min_size.max(SEETA_MIN_FACE));
        if params.max_size > 0 {
            self.detector.set_max_face_size(params.max_size);
        }
        // rustface shrinks the image by this factor per pyramid level
        let pyramid = if params.scale_factor > 1.0 {
            (1.0 / params.scale_factor) as f32
        } else {
            0.8
        };
        self.detector.set_pyramid_scale_factor(pyramid.clamp(0.1, 0.99));
    }
}

impl FaceLocator for SeetaFaceLocator {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &LocatorParams,
    ) -> Result<Vec<Detection>, ProximityError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(ProximityError::Detection("empty image".to_string()));
        }
        self.configure(params);

        let faces = self
            .detector
            .detect(&ImageData::new(gray.as_raw(), width, height));

        let detections: Vec<Detection> = faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                Detection::new(bbox.x(), bbox.y(), bbox.width() as i32, bbox.height() as i32)
            })
            .collect();
        debug!("SeetaFace found {} faces", detections.len());
        Ok(detections)
    }
}

/// Loads the SeetaFace model for each activation
#[derive(Debug, Clone)]
pub struct SeetaFaceFactory {
    model_path: String,
    score_threshold: f64,
}

impl SeetaFaceFactory {
    pub fn new(model_path: impl Into<String>, score_threshold: f64) -> Self {
        Self {
            model_path: model_path.into(),
            score_threshold,
        }
    }
}

impl LocatorFactory for SeetaFaceFactory {
    fn build(&self) -> Result<Box<dyn FaceLocator>, ProximityError> {
        let locator = SeetaFaceLocator::from_file(&self.model_path, self.score_threshold)?;
        Ok(Box::new(locator))
    }
}

/// Mock locator replaying a fixed script of per-frame detections
#[derive(Debug, Clone)]
pub struct ScriptedLocator {
    script: Arc<Vec<Vec<Detection>>>,
    cursor: usize,
    repeat: bool,
}

impl ScriptedLocator {
    pub fn new(script: Vec<Vec<Detection>>, repeat: bool) -> Self {
        Self {
            script: Arc::new(script),
            cursor: 0,
            repeat,
        }
    }

    /// A face walking up to the camera and back, centered in the frame.
    ///
    /// Widths sweep from 60px to 320px, so with the default calibration the
    /// face crosses the 1m threshold on the way in.
    pub fn approaching(frame_width: u32, frame_height: u32, steps: u32) -> Self {
        let steps = steps.max(2);
        let step = 260 / (steps - 1) as i32;
        let inbound = (0..steps).map(|i| 60 + step * i as i32);
        let outbound = inbound.clone().rev();
        let script = inbound
            .chain(outbound)
            .map(|w| {
                let h = w * 4 / 3;
                let x = frame_width as i32 / 2 - w / 2;
                let y = frame_height as i32 / 2 - h / 2;
                vec![Detection::new(x, y, w, h)]
            })
            .collect();
        Self::new(script, true)
    }
}

impl FaceLocator for ScriptedLocator {
    fn detect(
        &mut self,
        _gray: &GrayImage,
        _params: &LocatorParams,
    ) -> Result<Vec<Detection>, ProximityError> {
        if self.cursor >= self.script.len() {
            if !self.repeat || self.script.is_empty() {
                return Ok(Vec::new());
            }
            self.cursor = 0;
        }
        let detections = self.script[self.cursor].clone();
        self.cursor += 1;
        Ok(detections)
    }
}

/// Hands out fresh copies of a scripted locator and counts builds
#[derive(Debug, Clone)]
pub struct ScriptedLocatorFactory {
    template: ScriptedLocator,
    builds: Arc<AtomicUsize>,
}

impl ScriptedLocatorFactory {
    pub fn new(template: ScriptedLocator) -> Self {
        Self {
            template,
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl LocatorFactory for ScriptedLocatorFactory {
    fn build(&self) -> Result<Box<dyn FaceLocator>, ProximityError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.template.script.is_empty() {
            warn!("Scripted locator has an empty script; no faces will be reported");
        }
        Ok(Box::new(self.template.clone()))
    }
}
