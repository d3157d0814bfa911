//! The "can eventually produce pixels" capability and its implementations.
//!
//! Everything in the picker that displays or exports an image goes through
//! [`ImageSource`]: camera captures are file-backed, library photos are
//! asset-backed, and crop results wrap their origin source plus the crop
//! parameters. Consumers never learn which variant they hold, with one
//! deliberate exception: the crop editor unwraps the cropped variant via
//! [`ImageSource::as_cropped`] so that re-cropping composes against the
//! innermost original instead of a prior derivative.

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::models::PixelSize;

mod asset;
mod cropped;
mod local;
#[cfg(feature = "remote")]
mod remote;

pub use asset::{AssetImageSource, AssetStore};
pub use cropped::CroppedImageSource;
pub use local::LocalImageSource;
#[cfg(feature = "remote")]
pub use remote::RemoteImageSource;

/// Requested output size for an image request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeOption {
    /// The source's native resolution.
    FullResolution,
    /// Largest image that fits inside the given size, preserving aspect.
    Fit(PixelSize),
    /// Smallest image that covers the given size, preserving aspect.
    Fill(PixelSize),
}

/// Whether a request wants fast degraded previews before the final image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Exactly one result: the best available image.
    Best,
    /// Up to two results: an optional degraded preview, then the final image.
    Progressive,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageRequestOptions {
    pub size: SizeOption,
    pub delivery: DeliveryMode,
}

impl ImageRequestOptions {
    pub fn best(size: SizeOption) -> Self {
        Self {
            size,
            delivery: DeliveryMode::Best,
        }
    }

    pub fn progressive(size: SizeOption) -> Self {
        Self {
            size,
            delivery: DeliveryMode::Progressive,
        }
    }
}

/// One delivery of an image request.
///
/// `image: None` with `degraded: false` is the terminal "this source cannot
/// produce pixels" result; it is a legitimate outcome (e.g. a library asset
/// deleted mid-session), never an error.
#[derive(Clone)]
pub struct ImageRequestResult {
    pub image: Option<DynamicImage>,
    pub degraded: bool,
}

impl ImageRequestResult {
    pub fn final_image(image: Option<DynamicImage>) -> Self {
        Self {
            image,
            degraded: false,
        }
    }

    pub fn preview(image: DynamicImage) -> Self {
        Self {
            image: Some(image),
            degraded: true,
        }
    }
}

/// A polymorphic producer of pixel data.
///
/// Delivery contract for [`request_image`](Self::request_image):
/// - at least one result is sent unless the receiver is dropped first;
/// - exactly one result for [`DeliveryMode::Best`];
/// - for [`DeliveryMode::Progressive`], an optional degraded preview may
///   precede the final result;
/// - the final result always has `degraded == false`.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Stable identity of the underlying resource (path, asset id, URL,
    /// or origin-plus-parameters for crops). Two sources with equal
    /// identifiers produce identical pixels.
    fn identifier(&self) -> String;

    /// The cropped variant returns itself here so the crop editor can
    /// rebase onto the origin. Every other variant keeps the default.
    fn as_cropped(&self) -> Option<&CroppedImageSource> {
        None
    }

    async fn request_image(
        &self,
        options: ImageRequestOptions,
        results: mpsc::Sender<ImageRequestResult>,
    );

    /// Native pixel size, upright. `None` if the source cannot be probed.
    async fn image_size(&self) -> Option<PixelSize>;

    /// Encoded full-resolution bytes, suitable for export.
    async fn full_resolution_data(&self) -> Option<Vec<u8>>;
}

/// Requests the best-quality image at the given size and waits for it.
pub async fn request_best(source: &dyn ImageSource, size: SizeOption) -> Option<DynamicImage> {
    let (tx, mut rx) = mpsc::channel(1);
    source.request_image(ImageRequestOptions::best(size), tx).await;
    rx.recv().await.and_then(|result| result.image)
}

/// Resizes a decoded image according to a [`SizeOption`].
pub(crate) fn resize_for(image: DynamicImage, size: &SizeOption) -> DynamicImage {
    match size {
        SizeOption::FullResolution => image,
        SizeOption::Fit(target) => {
            if image.width() <= target.width && image.height() <= target.height {
                image
            } else {
                image.resize(target.width, target.height, FilterType::Lanczos3)
            }
        }
        SizeOption::Fill(target) => {
            image.resize_to_fill(target.width, target.height, FilterType::Lanczos3)
        }
    }
}

/// Bounded executor for pixel work (decode, resize, crop rendering).
///
/// All image sources share one pool so that scroll-time preview storms
/// cannot saturate the blocking thread pool on low-memory devices. The
/// concurrency cap is explicit configuration, not a process-wide global.
pub struct ImageProcessingPool {
    permits: Arc<Semaphore>,
}

/// Concurrency cap used by [`ImageProcessingPool::default`].
pub const DEFAULT_IMAGE_POOL_CONCURRENCY: usize = 2;

impl ImageProcessingPool {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Runs a blocking job once a permit is available.
    ///
    /// Returns `None` if the job panicked or the runtime is shutting down.
    pub async fn run<T, F>(&self, job: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        let handle = tokio::task::spawn_blocking(move || {
            let result = job();
            drop(permit);
            result
        });
        match handle.await {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!("Image processing job failed: {}", e);
                None
            }
        }
    }
}

impl Default for ImageProcessingPool {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_POOL_CONCURRENCY)
    }
}

/// A single logical display slot for image requests.
///
/// Scrolling grids issue a new preview request for a cell that may still
/// have one in flight; replacing the request aborts the stale one so its
/// result can never overwrite the newer image.
#[derive(Default)]
pub struct ImageRequestSlot {
    current: Mutex<Option<JoinHandle<()>>>,
}

impl ImageRequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new request, aborting whichever one was previously running.
    pub fn replace<F>(&self, request: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(request);
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Aborts the in-flight request, if any. Idempotent.
    pub fn cancel(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(handle) = current.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for ImageRequestSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
