//! Frame overlays: face boxes, distance labels, threat banner

use std::path::Path;
use std::time::Duration;

use ab_glyph::{FontVec, PxScale};
use camera_capture::VideoFrame;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use proximity::Detection;
use tracing::{info, warn};

use crate::config::DisplayConfig;

const FACE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const THREAT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const BORDER_THICKNESS: i32 = 6;

/// A valid detection with its estimated distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub detection: Detection,
    pub distance_m: f64,
}

impl Measurement {
    pub fn label(&self) -> String {
        format!("Distance: {:.2}m", self.distance_m)
    }
}

/// A frame ready for display
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub sequence: u32,
    pub measurements: Vec<Measurement>,
    pub threat_active: bool,
    /// Overlay text, also available to sinks that render their own labels
    pub labels: Vec<String>,
}

/// Draws overlays onto captured frames
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Annotator {
    /// Annotator without label rendering
    pub fn new() -> Self {
        Self {
            font: None,
            scale: PxScale::from(24.0),
        }
    }

    /// Load the configured font. A missing or unreadable font only disables labels.
    pub fn from_config(config: &DisplayConfig) -> Self {
        let font = config.font_path.as_deref().and_then(|path| match load_font(path) {
            Ok(font) => {
                info!("Overlay font loaded from {}", path.display());
                Some(font)
            }
            Err(e) => {
                warn!("Overlay labels disabled: {}", e);
                None
            }
        });
        Self {
            font,
            scale: PxScale::from(config.label_scale.max(6.0)),
        }
    }

    pub fn draws_labels(&self) -> bool {
        self.font.is_some()
    }

    /// Draw boxes and labels; adds the threat banner while `threat_remaining` is set.
    pub fn annotate(
        &self,
        frame: VideoFrame,
        measurements: Vec<Measurement>,
        threat_remaining: Option<Duration>,
    ) -> AnnotatedFrame {
        let sequence = frame.sequence;
        let mut image = frame.into_rgb_image();
        let mut labels = Vec::with_capacity(measurements.len() + 1);

        for m in &measurements {
            let d = m.detection;
            for inset in 0..BOX_THICKNESS {
                let w = d.width - 2 * inset;
                let h = d.height - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let rect = Rect::at(d.x + inset, d.y + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(&mut image, rect, FACE_COLOR);
            }

            let label = m.label();
            self.text(&mut image, FACE_COLOR, d.x, d.y - self.scale.y as i32 - 4, &label);
            labels.push(label);
        }

        if let Some(remaining) = threat_remaining {
            let (width, height) = image.dimensions();
            for inset in 0..BORDER_THICKNESS {
                let w = width as i32 - 2 * inset;
                let h = height as i32 - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let rect = Rect::at(inset, inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(&mut image, rect, THREAT_COLOR);
            }

            let banner = format!("THREAT DETECTED - cooldown {}s", remaining.as_secs());
            self.text(&mut image, THREAT_COLOR, 12, 12, &banner);
            labels.push(banner);
        }

        AnnotatedFrame {
            image,
            sequence,
            measurements,
            threat_active: threat_remaining.is_some(),
            labels,
        }
    }

    fn text(&self, image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y.max(0), self.scale, font, text);
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

fn load_font(path: &Path) -> Result<FontVec, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    FontVec::try_from_vec(bytes).map_err(|e| format!("{}: {}", path.display(), e))
}
