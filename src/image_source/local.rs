use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::mpsc;

use crate::image_source::{
    resize_for, DeliveryMode, ImageProcessingPool, ImageRequestOptions, ImageRequestResult,
    ImageSource,
};
use crate::models::PixelSize;

/// File-backed image source. Camera captures land here: the engine writes
/// a JPEG to temporary storage and wraps the path, optionally attaching a
/// pre-rendered preview so the ribbon can show the shot before the full
/// decode finishes.
pub struct LocalImageSource {
    path: PathBuf,
    preview: Option<DynamicImage>,
    pool: Arc<ImageProcessingPool>,
    // Probed once, then served from memory.
    cached_size: Mutex<Option<PixelSize>>,
}

impl LocalImageSource {
    pub fn new(path: impl Into<PathBuf>, pool: Arc<ImageProcessingPool>) -> Self {
        Self {
            path: path.into(),
            preview: None,
            pool,
            cached_size: Mutex::new(None),
        }
    }

    pub fn with_preview(
        path: impl Into<PathBuf>,
        preview: Option<DynamicImage>,
        pool: Arc<ImageProcessingPool>,
    ) -> Self {
        Self {
            path: path.into(),
            preview,
            pool,
            cached_size: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ImageSource for LocalImageSource {
    fn identifier(&self) -> String {
        format!("file:{}", self.path.display())
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

        let path = self.path.clone();
        let size = options.size;
        let image = self
            .pool
            .run(move || match image::open(&path) {
                Ok(image) => Some(resize_for(image, &size)),
                Err(e) => {
                    log::warn!("Failed to decode {}: {}", path.display(), e);
                    None
                }
            })
            .await
            .flatten();

        let _ = results.send(ImageRequestResult::final_image(image)).await;
    }

    async fn image_size(&self) -> Option<PixelSize> {
        if let Some(size) = self.cached_size.lock().ok().and_then(|cached| *cached) {
            return Some(size);
        }

        let path = self.path.clone();
        let size = self
            .pool
            .run(move || {
                image::image_dimensions(&path)
                    .map(|(width, height)| PixelSize::new(width, height))
                    .ok()
            })
            .await
            .flatten();

        if let (Some(size), Ok(mut cached)) = (size, self.cached_size.lock()) {
            *cached = Some(size);
        }
        size
    }

    async fn full_resolution_data(&self) -> Option<Vec<u8>> {
        let path = self.path.clone();
        self.pool
            .run(move || std::fs::read(&path).ok())
            .await
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::{request_best, SizeOption};

    async fn write_test_jpeg(width: u32, height: u32) -> PathBuf {
        let path = std::env::temp_dir().join(format!("local-source-{}.jpg", uuid::Uuid::new_v4()));
        let mut buffer = std::io::Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buffer, image::ImageFormat::Jpeg)
            .unwrap();
        tokio::fs::write(&path, buffer.into_inner()).await.unwrap();
        path
    }

    #[tokio::test]
    async fn decodes_and_caches_native_size() {
        let path = write_test_jpeg(20, 10).await;
        let source = LocalImageSource::new(&path, Arc::new(ImageProcessingPool::default()));

        assert_eq!(source.image_size().await, Some(PixelSize::new(20, 10)));
        // Second probe is served from the cache even if the file vanishes.
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(source.image_size().await, Some(PixelSize::new(20, 10)));
    }

    #[tokio::test]
    async fn progressive_request_sends_preview_then_final() {
        let path = write_test_jpeg(16, 16).await;
        let source = LocalImageSource::with_preview(
            &path,
            Some(DynamicImage::new_rgb8(4, 4)),
            Arc::new(ImageProcessingPool::default()),
        );

        let (tx, mut rx) = mpsc::channel(2);
        source
            .request_image(
                ImageRequestOptions::progressive(SizeOption::Fit(PixelSize::new(8, 8))),
                tx,
            )
            .await;

        let preview = rx.recv().await.unwrap();
        assert!(preview.degraded);
        let final_result = rx.recv().await.unwrap();
        assert!(!final_result.degraded);
        let image = final_result.image.unwrap();
        assert!(image.width() <= 8 && image.height() <= 8);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_yields_none() {
        let source = LocalImageSource::new(
            "/nonexistent/shot.jpg",
            Arc::new(ImageProcessingPool::default()),
        );
        assert!(request_best(&source, SizeOption::FullResolution).await.is_none());
        assert!(source.image_size().await.is_none());
        assert!(source.full_resolution_data().await.is_none());
    }
}
