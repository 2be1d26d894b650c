//! Captured content eligible for classification.
//!
//! A sample is owned by exactly one pipeline stage at a time and is consumed
//! (moved) when it is turned into classifier input, so its pixel buffer is
//! released as soon as the encoded payload exists.

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// One screen frame in RGBA8.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub pixels: RgbaImage,
    pub captured_at: DateTime<Utc>,
}

impl FrameSample {
    pub fn new(pixels: RgbaImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            pixels,
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// One posted notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSample {
    /// Package / app identifier of the posting app.
    pub source_app: String,
    pub sender: String,
    pub body: String,
    #[serde(default = "Utc::now")]
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Frame,
    Text,
}

#[derive(Debug, Clone)]
pub enum Sample {
    Frame(FrameSample),
    Text(TextSample),
}

impl Sample {
    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::Frame(_) => SampleKind::Frame,
            Sample::Text(_) => SampleKind::Text,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Sample::Frame(frame) => frame.captured_at,
            Sample::Text(text) => text.posted_at,
        }
    }
}
