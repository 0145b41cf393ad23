use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Frames with an edge below this cannot be sampled and are treated as absent.
const MIN_FRAME_EDGE: u32 = 10;

/// Raw frame data as reported by the capture script.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameCapture {
    pub width: u32,
    pub height: u32,
    /// Base64 RGBA of the top-left tenth of the frame.
    #[serde(default)]
    pub pixels: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct FrameSample {
    pub width: u32,
    pub height: u32,
    pub luma: f64,
}

impl FrameSample {
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Reduce a capture to size plus accumulated luma. Missing or undecodable
    /// frames yield [`FrameSample::zeroed`] rather than an error.
    pub fn measure(capture: &FrameCapture) -> Self {
        if capture.width < MIN_FRAME_EDGE || capture.height < MIN_FRAME_EDGE {
            return Self::zeroed();
        }

        let pixels = match STANDARD.decode(capture.pixels.as_bytes()) {
            Ok(pixels) => pixels,
            Err(err) => {
                warn!(error = %err, "frame pixels are not valid base64");
                return Self::zeroed();
            }
        };

        Self {
            width: capture.width,
            height: capture.height,
            luma: accumulated_luma(&pixels),
        }
    }
}

/// Sum of `0.21 R + 0.72 G + 0.07 B` over RGBA pixels; alpha is ignored.
pub fn accumulated_luma(rgba: &[u8]) -> f64 {
    rgba.chunks_exact(4)
        .map(|px| 0.21 * f64::from(px[0]) + 0.72 * f64::from(px[1]) + 0.07 * f64::from(px[2]))
        .sum()
}

/// A sample passes when every field is strictly above its threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LivenessThresholds {
    pub min_width: u32,
    pub min_height: u32,
    pub min_luma: f64,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            min_width: 0,
            min_height: 0,
            min_luma: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LivenessCheck {
    Width,
    Height,
    Luma,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LivenessVerdict {
    pub sample: FrameSample,
    pub failed: Vec<LivenessCheck>,
}

impl LivenessVerdict {
    pub fn is_live(&self) -> bool {
        self.failed.is_empty()
    }
}

impl LivenessThresholds {
    pub fn verify(&self, sample: FrameSample) -> LivenessVerdict {
        let mut failed = Vec::new();
        if sample.width <= self.min_width {
            failed.push(LivenessCheck::Width);
        }
        if sample.height <= self.min_height {
            failed.push(LivenessCheck::Height);
        }
        if sample.luma <= self.min_luma {
            failed.push(LivenessCheck::Luma);
        }
        LivenessVerdict { sample, failed }
    }
}
