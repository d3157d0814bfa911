use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::image_source::{
    resize_for, ImageProcessingPool, ImageRequestOptions, ImageRequestResult, ImageSource,
};
use crate::models::PixelSize;

/// URL-backed image source. Downloading goes through reqwest; decoding and
/// resizing go through the shared processing pool. Caching of downloaded
/// bytes is the host's concern, not this source's.
pub struct RemoteImageSource {
    url: String,
    client: reqwest::Client,
    pool: Arc<ImageProcessingPool>,
    cached_size: Mutex<Option<PixelSize>>,
}

impl RemoteImageSource {
    pub fn new(url: impl Into<String>, client: reqwest::Client, pool: Arc<ImageProcessingPool>) -> Self {
        Self {
            url: url.into(),
            client,
            pool,
            cached_size: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn download(&self) -> Option<Vec<u8>> {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Download failed for {}: {}", self.url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            log::warn!("Download of {} returned {}", self.url, response.status());
            return None;
        }

        response.bytes().await.ok().map(|bytes| bytes.to_vec())
    }
}

#[async_trait]
impl ImageSource for RemoteImageSource {
    fn identifier(&self) -> String {
        format!("url:{}", self.url)
    }

    async fn request_image(
        &self,
        options: ImageRequestOptions,
        results: mpsc::Sender<ImageRequestResult>,
    ) {
        let image = match self.download().await {
            Some(bytes) => {
                let size = options.size;
                self.pool
                    .run(move || {
                        image::load_from_memory(&bytes)
                            .map(|image| resize_for(image, &size))
                            .ok()
                    })
                    .await
                    .flatten()
            }
            None => None,
        };

        if let (Some(image), Ok(mut cached)) = (&image, self.cached_size.lock()) {
            if cached.is_none() && options.size == super::SizeOption::FullResolution {
                *cached = Some(PixelSize::new(image.width(), image.height()));
            }
        }

        let _ = results.send(ImageRequestResult::final_image(image)).await;
    }

    async fn image_size(&self) -> Option<PixelSize> {
        if let Some(size) = self.cached_size.lock().ok().and_then(|cached| *cached) {
            return Some(size);
        }

        let bytes = self.download().await?;
        let size = self
            .pool
            .run(move || {
                image::load_from_memory(&bytes)
                    .map(|image| PixelSize::new(image.width(), image.height()))
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
        self.download().await
    }
}
