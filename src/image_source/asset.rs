use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use tokio::sync::mpsc;

use crate::image_source::{
    resize_for, DeliveryMode, ImageRequestOptions, ImageRequestResult, ImageSource,
};
use crate::models::PixelSize;

/// Boundary to the OS photo framework's per-asset image delivery.
///
/// The picker only ever identifies assets by their stable local identifier
/// and asks this store for pixels; it never touches asset objects directly.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Best-quality image for the asset at the requested size.
    /// `None` means the asset can no longer produce pixels (e.g. deleted).
    async fn request_image(
        &self,
        asset_id: &str,
        options: &ImageRequestOptions,
    ) -> Option<DynamicImage>;

    /// Cheap degraded preview, if the backing framework keeps one around.
    async fn request_preview(&self, asset_id: &str, options: &ImageRequestOptions) -> Option<DynamicImage> {
        let _ = (asset_id, options);
        None
    }

    async fn image_size(&self, asset_id: &str) -> Option<PixelSize>;

    async fn full_resolution_data(&self, asset_id: &str) -> Option<Vec<u8>>;
}

/// Photo-library-asset-backed image source.
pub struct AssetImageSource {
    asset_id: String,
    store: Arc<dyn AssetStore>,
}

impl AssetImageSource {
    pub fn new(asset_id: impl Into<String>, store: Arc<dyn AssetStore>) -> Self {
        Self {
            asset_id: asset_id.into(),
            store,
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }
}

#[async_trait]
impl ImageSource for AssetImageSource {
    fn identifier(&self) -> String {
        format!("asset:{}", self.asset_id)
    }

    async fn request_image(
        &self,
        options: ImageRequestOptions,
        results: mpsc::Sender<ImageRequestResult>,
    ) {
        if options.delivery == DeliveryMode::Progressive {
            if let Some(preview) = self.store.request_preview(&self.asset_id, &options).await {
                let _ = results
                    .send(ImageRequestResult::preview(resize_for(preview, &options.size)))
                    .await;
            }
        }

        let image = self.store.request_image(&self.asset_id, &options).await;
        let _ = results.send(ImageRequestResult::final_image(image)).await;
    }

    async fn image_size(&self) -> Option<PixelSize> {
        self.store.image_size(&self.asset_id).await
    }

    async fn full_resolution_data(&self) -> Option<Vec<u8>> {
        self.store.full_resolution_data(&self.asset_id).await
    }
}
