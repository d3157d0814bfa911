//! # Media Picker
//!
//! An embeddable photo capture-and-selection component: camera capture,
//! photo library browsing, selection with a shared cap, and non-destructive
//! cropping, composed behind one coordinator.
//!
//! This crate holds the platform-independent core. Platform-specific code
//! (actual camera hardware, the OS photo framework, rendering) plugs in
//! through the [`camera::CameraDevice`], [`library::PhotoLibraryGateway`]
//! and [`image_source::AssetStore`] traits.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use media_picker::{
//!     CameraCaptureEngine, ImageProcessingPool, MediaPickerConfig,
//!     MediaPickerCoordinator,
//! };
//!
//! let pool = Arc::new(ImageProcessingPool::default());
//! let camera = Arc::new(CameraCaptureEngine::new(device, pool.clone()));
//! let mut picker = MediaPickerCoordinator::new(
//!     MediaPickerConfig { max_items_count: Some(5), ..Default::default() },
//!     camera,
//!     pool,
//! )?;
//! ```

pub mod camera;
pub mod cropping;
pub mod image_source;
pub mod library;
pub mod models;
pub mod orientation;
pub mod picker;
pub mod selection;

pub use camera::{CameraCaptureEngine, CameraDevice, CameraOutputParameters, CaptureSessionHandle};
pub use cropping::{
    AffineTransform, CroppingData, CroppingParameterStore, CroppingParameters,
    DEFAULT_ASPECT_RATIO,
};
pub use image_source::{
    AssetImageSource, AssetStore, CroppedImageSource, DeliveryMode, ImageProcessingPool,
    ImageRequestOptions, ImageRequestResult, ImageRequestSlot, ImageSource, LocalImageSource,
    SizeOption,
};
#[cfg(feature = "remote")]
pub use image_source::RemoteImageSource;
pub use library::{
    AlbumSnapshot, AssetDescriptor, PhotoLibraryAuthorization, PhotoLibraryChanges,
    PhotoLibraryError, PhotoLibraryEvent, PhotoLibraryGateway, PhotoLibraryItem,
    PhotoLibraryLatestPhotoProvider, PhotoLibrarySource,
};
pub use models::{ExifOrientation, MediaItem, MediaItemSource, PixelSize, PointF, SizeF};
pub use orientation::{CameraFacing, DeviceOrientation, DeviceOrientationMonitor};
pub use picker::{
    DisplayMode, MediaPickerConfig, MediaPickerConfigError, MediaPickerCoordinator,
    MediaPickerEvent,
};
pub use selection::{PreSelectionAction, SelectionSetManager, SelectionState};
