//! Crop/rotate parameter model.
//!
//! The editor mutates a [`CroppingParameterStore`] continuously while the
//! user drags the viewport; nothing is resampled until confirm, when the
//! parameters are frozen into a [`CroppedImageSource`]. Parameters are
//! always expressed relative to the *origin* image's native pixel space,
//! so re-editing a crop result edits the original, not the derivative.

use std::sync::{Arc, Mutex};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::image_source::{CroppedImageSource, ImageProcessingPool, ImageSource};
use crate::models::{ExifOrientation, PixelSize, PointF, SizeF};

/// Width/height ratio used when neither committed parameters nor the
/// original image yield one (portrait 3:4).
pub const DEFAULT_ASPECT_RATIO: f32 = 0.75;

/// 2D affine transform stored as six components:
/// `(x, y) -> (a*x + c*y + tx, b*x + d*y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::identity()
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::identity()
        }
    }

    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Transform equal to applying `self` first and `next` second.
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            tx: self.tx * next.a + self.ty * next.c + next.tx,
            ty: self.tx * next.b + self.ty * next.d + next.ty,
        }
    }

    pub fn apply(&self, point: PointF) -> PointF {
        PointF::new(
            self.a * point.x + self.c * point.y + self.tx,
            self.b * point.x + self.d * point.y + self.ty,
        )
    }

    /// `None` for singular (non-invertible) transforms.
    pub fn inverted(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f64::EPSILON {
            return None;
        }
        Some(Self {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            tx: (self.c * self.ty - self.d * self.tx) / det,
            ty: (self.b * self.tx - self.a * self.ty) / det,
        })
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Everything needed to redo a crop losslessly against its original image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CroppingParameters {
    /// User transform (pan/zoom/rotate) in viewport space.
    pub transform: AffineTransform,
    /// Native pixel size of the origin image, upright.
    pub source_size: PixelSize,
    pub source_orientation: ExifOrientation,
    /// Width of the rendered output in pixels; height follows from the
    /// crop rectangle's aspect.
    pub output_width: f64,
    /// Crop rectangle in viewport points.
    pub crop_size: SizeF,
    /// Size at which the image was laid out in the viewport.
    pub image_view_size: SizeF,
    pub content_offset_center: PointF,
    pub turn_angle: f64,
    pub tilt_angle: f64,
    pub zoom_scale: f64,
    pub manually_zoomed: bool,
}

impl CroppingParameters {
    /// Identity parameters: full image, no transform. The seed used when
    /// the editor opens on an image without a prior crop.
    pub fn identity(source_size: PixelSize, source_orientation: ExifOrientation) -> Self {
        let size = SizeF::new(source_size.width as f64, source_size.height as f64);
        Self {
            transform: AffineTransform::identity(),
            source_size,
            source_orientation,
            output_width: size.width,
            crop_size: size,
            image_view_size: size,
            content_offset_center: PointF::new(0.0, 0.0),
            turn_angle: 0.0,
            tilt_angle: 0.0,
            zoom_scale: 1.0,
            manually_zoomed: false,
        }
    }

    /// Pixel size of the rendered output, or `None` for degenerate
    /// crop rectangles.
    pub fn output_size(&self) -> Option<PixelSize> {
        if self.crop_size.width <= 0.0 || self.crop_size.height <= 0.0 || self.output_width <= 0.0 {
            return None;
        }
        let height = self.output_width * self.crop_size.height / self.crop_size.width;
        Some(PixelSize::new(
            self.output_width.round() as u32,
            height.round().max(1.0) as u32,
        ))
    }
}

/// Snapshot handed to the crop editor when it opens.
pub struct CroppingData {
    /// The innermost original image; never a crop derivative.
    pub original_image: Arc<dyn ImageSource>,
    /// The image as it looked when editing started (possibly already
    /// cropped), for fast display while the original loads.
    pub preview_image: Arc<dyn ImageSource>,
    pub parameters: Option<CroppingParameters>,
}

/// Holds the live crop state for one editing session.
///
/// Opening the editor on an existing crop result unwraps it to its
/// origin plus prior parameters, so transforms never compound.
pub struct CroppingParameterStore {
    original: Arc<dyn ImageSource>,
    preview: Arc<dyn ImageSource>,
    parameters: Mutex<Option<CroppingParameters>>,
    canvas_size: Option<PixelSize>,
    pool: Arc<ImageProcessingPool>,
}

impl CroppingParameterStore {
    pub fn new(
        image: Arc<dyn ImageSource>,
        canvas_size: Option<PixelSize>,
        pool: Arc<ImageProcessingPool>,
    ) -> Self {
        let (original, parameters) = match image.as_cropped() {
            Some(cropped) => (
                cropped.origin().clone(),
                cropped.parameters().cloned(),
            ),
            None => (image.clone(), None),
        };

        Self {
            original,
            preview: image,
            parameters: Mutex::new(parameters),
            canvas_size,
            pool,
        }
    }

    pub fn canvas_size(&self) -> Option<PixelSize> {
        self.canvas_size
    }

    pub fn image_with_parameters(&self) -> CroppingData {
        CroppingData {
            original_image: self.original.clone(),
            preview_image: self.preview.clone(),
            parameters: self.parameters.lock().ok().and_then(|guard| guard.clone()),
        }
    }

    /// Live update while the user manipulates the viewport. Storage only;
    /// no resampling happens until [`cropped_image`](Self::cropped_image).
    pub fn set_cropping_parameters(&self, parameters: CroppingParameters) {
        if let Ok(mut guard) = self.parameters.lock() {
            *guard = Some(parameters);
        }
    }

    /// Freezes the current parameters into a derived source composing
    /// against the original. `preview_pixels` is the editor's rendered
    /// viewport, used as the fast-path preview of the new source.
    pub fn cropped_image(&self, preview_pixels: Option<DynamicImage>) -> Arc<CroppedImageSource> {
        let parameters = self.parameters.lock().ok().and_then(|guard| guard.clone());
        log::debug!(
            "Freezing crop of {} (parameters: {})",
            self.original.identifier(),
            if parameters.is_some() { "set" } else { "none" },
        );
        Arc::new(CroppedImageSource::new(
            self.original.clone(),
            self.canvas_size,
            parameters,
            preview_pixels,
            self.pool.clone(),
        ))
    }

    /// Width/height ratio of the committed crop rectangle; falls back to
    /// the original image's natural ratio, then to [`DEFAULT_ASPECT_RATIO`].
    pub async fn cropped_image_aspect_ratio(&self) -> f32 {
        let parameters = self.parameters.lock().ok().and_then(|guard| guard.clone());

        if let Some(parameters) = parameters {
            if parameters.crop_size.height > 0.0 && parameters.crop_size.width > 0.0 {
                return (parameters.crop_size.width / parameters.crop_size.height) as f32;
            }
        }

        match self.original.image_size().await.and_then(|size| size.aspect_ratio()) {
            Some(ratio) => ratio,
            None => DEFAULT_ASPECT_RATIO,
        }
    }
}
