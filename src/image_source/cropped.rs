use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tokio::sync::{mpsc, Mutex};

use crate::cropping::{AffineTransform, CroppingParameters};
use crate::image_source::{
    request_best, resize_for, DeliveryMode, ImageProcessingPool, ImageRequestOptions,
    ImageRequestResult, ImageSource, SizeOption,
};
use crate::models::{ExifOrientation, PixelSize, PointF};

/// Derived image source: an origin image plus frozen crop parameters.
///
/// Rendering is lazy and cached; until the first pixel request, a crop
/// result is only metadata. The origin is always the innermost original —
/// the constructor rebases if handed another crop derivative, so nested
/// crops flatten instead of compounding resampling loss.
pub struct CroppedImageSource {
    origin: Arc<dyn ImageSource>,
    canvas_size: Option<PixelSize>,
    parameters: Option<CroppingParameters>,
    preview: Option<DynamicImage>,
    pool: Arc<ImageProcessingPool>,
    rendered: Mutex<Option<Arc<DynamicImage>>>,
}

impl CroppedImageSource {
    pub fn new(
        origin: Arc<dyn ImageSource>,
        canvas_size: Option<PixelSize>,
        parameters: Option<CroppingParameters>,
        preview: Option<DynamicImage>,
        pool: Arc<ImageProcessingPool>,
    ) -> Self {
        // Flattening invariant: rebase onto the innermost original.
        let mut origin = origin;
        while let Some(inner) = origin.as_cropped().map(|cropped| cropped.origin().clone()) {
            origin = inner;
        }

        Self {
            origin,
            canvas_size,
            parameters,
            preview,
            pool,
            rendered: Mutex::new(None),
        }
    }

    pub fn origin(&self) -> &Arc<dyn ImageSource> {
        &self.origin
    }

    pub fn parameters(&self) -> Option<&CroppingParameters> {
        self.parameters.as_ref()
    }

    /// Renders the crop (or returns the cached render). `None` only when
    /// the origin cannot produce pixels or the parameters are degenerate.
    async fn rendered(&self) -> Option<Arc<DynamicImage>> {
        let mut cache = self.rendered.lock().await;
        if let Some(rendered) = cache.as_ref() {
            return Some(rendered.clone());
        }

        let size = match self.canvas_size {
            Some(canvas) => SizeOption::Fit(canvas),
            None => SizeOption::FullResolution,
        };
        let source = request_best(self.origin.as_ref(), size).await?;

        let rendered = match self.parameters.clone() {
            Some(parameters) => self
                .pool
                .run(move || render_crop(&source, &parameters))
                .await
                .flatten()?,
            None => source,
        };

        let rendered = Arc::new(rendered);
        *cache = Some(rendered.clone());
        Some(rendered)
    }
}

#[async_trait]
impl ImageSource for CroppedImageSource {
    fn identifier(&self) -> String {
        let parameters = self
            .parameters
            .as_ref()
            .and_then(|parameters| serde_json::to_string(parameters).ok())
            .unwrap_or_else(|| "passthrough".to_string());
        format!("cropped({};{})", self.origin.identifier(), parameters)
    }

    fn as_cropped(&self) -> Option<&CroppedImageSource> {
        Some(self)
    }

    async fn request_image(
        &self,
        options: ImageRequestOptions,
        results: mpsc::Sender<ImageRequestResult>,
    ) {
        if options.delivery == DeliveryMode::Progressive {
            if let Some(preview) = &self.preview {
                let _ = results.send(ImageRequestResult::preview(preview.clone())).await;
            }
        }

        let image = match self.rendered().await {
            Some(rendered) => Some(resize_for((*rendered).clone(), &options.size)),
            None => None,
        };
        let _ = results.send(ImageRequestResult::final_image(image)).await;
    }

    async fn image_size(&self) -> Option<PixelSize> {
        match &self.parameters {
            Some(parameters) => parameters.output_size(),
            None => self.origin.image_size().await,
        }
    }

    async fn full_resolution_data(&self) -> Option<Vec<u8>> {
        let rendered = self.rendered().await?;
        self.pool
            .run(move || {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(rendered.to_rgb8());
                let mut buffer = Cursor::new(Vec::new());
                match rgb.write_to(&mut buffer, ImageFormat::Jpeg) {
                    Ok(()) => Some(buffer.into_inner()),
                    Err(e) => {
                        log::warn!("Failed to encode cropped image: {}", e);
                        None
                    }
                }
            })
            .await
            .flatten()
    }
}

/// Rotates/mirrors pixels so the image displays upright.
fn apply_exif_orientation(image: DynamicImage, orientation: ExifOrientation) -> DynamicImage {
    match orientation {
        ExifOrientation::Up => image,
        ExifOrientation::UpMirrored => image.fliph(),
        ExifOrientation::Down => image.rotate180(),
        ExifOrientation::DownMirrored => image.flipv(),
        ExifOrientation::LeftMirrored => image.rotate90().fliph(),
        ExifOrientation::Left => image.rotate90(),
        ExifOrientation::RightMirrored => image.rotate270().fliph(),
        ExifOrientation::Right => image.rotate270(),
    }
}

/// Renders crop parameters against the origin pixels.
///
/// Geometry follows the editor's drawing model: the upright image is laid
/// out at `image_view_size` centered on the viewport origin, the user
/// transform is applied around that center, and the crop rectangle
/// (also centered) is scaled to the output size. Coordinates are y-up in
/// transform space and y-down in the pixel buffers.
pub(crate) fn render_crop(
    source: &DynamicImage,
    parameters: &CroppingParameters,
) -> Option<DynamicImage> {
    let output = parameters.output_size()?;
    let crop = parameters.crop_size;
    let view = parameters.image_view_size;
    if view.width <= 0.0 || view.height <= 0.0 {
        return None;
    }

    let upright = apply_exif_orientation(source.clone(), parameters.source_orientation);
    let source_pixels = upright.to_rgba8();
    let (source_width, source_height) = (source_pixels.width() as f64, source_pixels.height() as f64);

    let flip_y = AffineTransform::scale(1.0, -1.0);
    let forward = flip_y
        .then(&parameters.transform)
        .then(&flip_y)
        .then(&AffineTransform::translation(crop.width / 2.0, crop.height / 2.0))
        .then(&AffineTransform::scale(
            output.width as f64 / crop.width,
            output.height as f64 / crop.height,
        ));
    let inverse = forward.inverted()?;

    let mut rendered = RgbaImage::new(output.width, output.height);
    for (x, y, pixel) in rendered.enumerate_pixels_mut() {
        // Output buffer is y-down; transform space is y-up.
        let device = PointF::new(x as f64 + 0.5, output.height as f64 - (y as f64 + 0.5));
        let q = inverse.apply(device);

        // Map from layout space into source pixels (top-down rows).
        let u = (q.x + view.width / 2.0) / view.width * source_width;
        let v = (1.0 - (q.y + view.height / 2.0) / view.height) * source_height;

        if u >= 0.0 && v >= 0.0 && u < source_width && v < source_height {
            *pixel = *source_pixels.get_pixel(u as u32, v as u32);
        } else {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    Some(DynamicImage::ImageRgba8(rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::testing::StubImageSource;
    use crate::models::SizeF;

    fn pool() -> Arc<ImageProcessingPool> {
        Arc::new(ImageProcessingPool::default())
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let mut image = RgbaImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([x as u8, y as u8, 0, 255]);
        }
        DynamicImage::ImageRgba8(image)
    }

    #[test]
    fn identity_parameters_render_the_source_unchanged() {
        let source = gradient(16, 12);
        let parameters =
            CroppingParameters::identity(PixelSize::new(16, 12), ExifOrientation::Up);

        let rendered = render_crop(&source, &parameters).unwrap();
        assert_eq!((rendered.width(), rendered.height()), (16, 12));
        assert_eq!(rendered.to_rgba8(), source.to_rgba8());
    }

    #[test]
    fn centered_half_crop_samples_the_middle() {
        let source = gradient(16, 16);
        let mut parameters =
            CroppingParameters::identity(PixelSize::new(16, 16), ExifOrientation::Up);
        parameters.crop_size = SizeF::new(8.0, 8.0);
        parameters.output_width = 8.0;

        let rendered = render_crop(&source, &parameters).unwrap().to_rgba8();
        assert_eq!((rendered.width(), rendered.height()), (8, 8));
        // Center crop of a 16x16 gradient starts at source pixel (4, 4).
        assert_eq!(rendered.get_pixel(0, 0), source.to_rgba8().get_pixel(4, 4));
        assert_eq!(rendered.get_pixel(7, 7), source.to_rgba8().get_pixel(11, 11));
    }

    #[test]
    fn degenerate_crop_rectangle_renders_nothing() {
        let source = gradient(8, 8);
        let mut parameters =
            CroppingParameters::identity(PixelSize::new(8, 8), ExifOrientation::Up);
        parameters.crop_size = SizeF::new(0.0, 8.0);
        assert!(render_crop(&source, &parameters).is_none());
    }

    #[test]
    fn exif_left_swaps_dimensions_before_cropping() {
        let source = gradient(16, 8);
        let oriented = apply_exif_orientation(source, ExifOrientation::Left);
        assert_eq!((oriented.width(), oriented.height()), (8, 16));
    }

    #[tokio::test]
    async fn nested_crop_rebases_onto_innermost_original() {
        let original: Arc<dyn ImageSource> = Arc::new(StubImageSource::sized(64, 64));
        let parameters =
            CroppingParameters::identity(PixelSize::new(64, 64), ExifOrientation::Up);

        let first = Arc::new(CroppedImageSource::new(
            original.clone(),
            None,
            Some(parameters.clone()),
            None,
            pool(),
        ));
        let second = CroppedImageSource::new(first, None, Some(parameters), None, pool());

        assert_eq!(second.origin().identifier(), original.identifier());
    }

    #[tokio::test]
    async fn broken_origin_yields_no_pixels() {
        let cropped = CroppedImageSource::new(
            Arc::new(StubImageSource::broken("deleted-asset")),
            None,
            Some(CroppingParameters::identity(
                PixelSize::new(32, 32),
                ExifOrientation::Up,
            )),
            None,
            pool(),
        );

        assert!(request_best(&cropped, SizeOption::FullResolution).await.is_none());
        assert!(cropped.full_resolution_data().await.is_none());
    }

    #[tokio::test]
    async fn progressive_request_delivers_preview_first() {
        let cropped = CroppedImageSource::new(
            Arc::new(StubImageSource::sized(32, 32)),
            None,
            None,
            Some(gradient(4, 4)),
            pool(),
        );

        let (tx, mut rx) = mpsc::channel(2);
        cropped
            .request_image(ImageRequestOptions::progressive(SizeOption::FullResolution), tx)
            .await;

        let first = rx.recv().await.unwrap();
        assert!(first.degraded);
        let second = rx.recv().await.unwrap();
        assert!(!second.degraded);
        assert!(second.image.is_some());
    }
}
