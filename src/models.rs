use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::image_source::ImageSource;

/// Pixel dimensions of an image or render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height; `None` for degenerate sizes.
    pub fn aspect_ratio(&self) -> Option<f32> {
        if self.height == 0 {
            None
        } else {
            Some(self.width as f32 / self.height as f32)
        }
    }
}

/// Fractional size used by crop viewport geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f64,
    pub height: f64,
}

impl SizeF {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Fractional point used by crop viewport geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// EXIF orientation tag values (1 through 8).
///
/// Crop parameters record the orientation of their origin image so a crop
/// can be re-derived losslessly from the raw pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExifOrientation {
    Up,
    UpMirrored,
    Down,
    DownMirrored,
    LeftMirrored,
    Left,
    RightMirrored,
    Right,
}

impl ExifOrientation {
    pub fn tag_value(&self) -> u8 {
        match self {
            ExifOrientation::Up => 1,
            ExifOrientation::UpMirrored => 2,
            ExifOrientation::Down => 3,
            ExifOrientation::DownMirrored => 4,
            ExifOrientation::LeftMirrored => 5,
            ExifOrientation::Left => 6,
            ExifOrientation::RightMirrored => 7,
            ExifOrientation::Right => 8,
        }
    }

    /// True when displaying the image upright swaps its width and height.
    pub fn dimensions_swapped(&self) -> bool {
        matches!(
            self,
            ExifOrientation::LeftMirrored
                | ExifOrientation::Left
                | ExifOrientation::RightMirrored
                | ExifOrientation::Right
        )
    }
}

impl Default for ExifOrientation {
    fn default() -> Self {
        ExifOrientation::Up
    }
}

/// Where a picker item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaItemSource {
    Camera,
    PhotoLibrary,
}

/// An item in the picker's ordered collection.
///
/// Identity is the generated `identifier`, never the image contents:
/// two items wrapping the same pixels are still distinct, and a cropped
/// replacement for an item is a *new* identity. Equality compares
/// identifiers only.
#[derive(Clone)]
pub struct MediaItem {
    pub identifier: Uuid,
    pub image: Arc<dyn ImageSource>,
    pub source: MediaItemSource,
}

impl MediaItem {
    pub fn new(image: Arc<dyn ImageSource>, source: MediaItemSource) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            image,
            source,
        }
    }
}

impl PartialEq for MediaItem {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for MediaItem {}

impl std::fmt::Debug for MediaItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaItem")
            .field("identifier", &self.identifier)
            .field("source", &self.source)
            .field("image", &self.image.identifier())
            .finish()
    }
}
