use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use image::DynamicImage;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::camera::CameraCaptureEngine;
use crate::cropping::{CroppingData, CroppingParameterStore, CroppingParameters};
use crate::image_source::ImageProcessingPool;
use crate::library::{PhotoLibraryEvent, PhotoLibraryItem};
use crate::models::{MediaItem, MediaItemSource, PixelSize};
use crate::selection::{SelectionSetManager, SelectionState};

/// Host-supplied picker configuration.
#[derive(Debug, Clone)]
pub struct MediaPickerConfig {
    /// Picker-wide item cap shared by camera captures and library picks.
    /// `None` means unbounded.
    pub max_items_count: Option<usize>,
    pub camera_enabled: bool,
    pub photo_library_enabled: bool,
    /// Largest canvas crops are rendered against; `None` renders at the
    /// origin's full resolution.
    pub crop_canvas_size: Option<PixelSize>,
}

impl Default for MediaPickerConfig {
    fn default() -> Self {
        Self {
            max_items_count: None,
            camera_enabled: true,
            photo_library_enabled: true,
            crop_canvas_size: None,
        }
    }
}

impl MediaPickerConfig {
    fn validate(&self) -> Result<(), MediaPickerConfigError> {
        if self.max_items_count == Some(0) {
            return Err(MediaPickerConfigError::ZeroMaxItems);
        }
        if !self.camera_enabled && !self.photo_library_enabled {
            return Err(MediaPickerConfigError::NoSourcesEnabled);
        }
        Ok(())
    }
}

/// Host misuse; the picker refuses to construct rather than limping along.
#[derive(Debug, PartialEq, Eq)]
pub enum MediaPickerConfigError {
    ZeroMaxItems,
    NoSourcesEnabled,
}

impl fmt::Display for MediaPickerConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroMaxItems => write!(f, "max_items_count of 0 would disable the picker"),
            Self::NoSourcesEnabled => {
                write!(f, "At least one of camera and photo library must be enabled")
            }
        }
    }
}

impl std::error::Error for MediaPickerConfigError {}

/// Output events to the host. At most one `Finished` or `Cancelled` is
/// delivered per picker lifetime; an `ItemUpdated` always follows an
/// `ItemsAdded` that introduced the same slot.
#[derive(Debug, Clone)]
pub enum MediaPickerEvent {
    ItemsAdded { items: Vec<MediaItem>, index: usize },
    ItemUpdated { item: MediaItem, index: usize },
    ItemRemoved { item: MediaItem, index: usize },
    Finished(Vec<MediaItem>),
    Cancelled,
}

/// What the main surface is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Camera,
    Preview,
}

struct CropSession {
    item_identifier: Uuid,
    store: CroppingParameterStore,
}

/// Composes the capture engine, library stream, selection set and crop
/// store into the picker's interaction state machine, and owns the
/// host-visible ordered item list.
///
/// Single-owner model: all methods take `&mut self` and are meant to be
/// driven from one task, mirroring a UI-affine context. Hardware and
/// library work stays concurrent underneath; the item list append is the
/// only synchronization point.
pub struct MediaPickerCoordinator {
    config: MediaPickerConfig,
    camera: Arc<CameraCaptureEngine>,
    pool: Arc<ImageProcessingPool>,
    items: Vec<MediaItem>,
    selection: SelectionSetManager,
    // Asset identifier -> picker item created for it.
    library_picks: HashMap<String, MediaItem>,
    output: Option<mpsc::UnboundedSender<MediaPickerEvent>>,
    cropping: Option<CropSession>,
    display_mode: DisplayMode,
    focused_item: Option<Uuid>,
    capture_in_flight: bool,
    finished: bool,
}

impl MediaPickerCoordinator {
    pub fn new(
        config: MediaPickerConfig,
        camera: Arc<CameraCaptureEngine>,
        pool: Arc<ImageProcessingPool>,
    ) -> Result<Self, MediaPickerConfigError> {
        config.validate()?;
        let selection = SelectionSetManager::new(config.max_items_count);
        Ok(Self {
            config,
            camera,
            pool,
            items: Vec::new(),
            selection,
            library_picks: HashMap::new(),
            output: None,
            cropping: None,
            display_mode: DisplayMode::Camera,
            focused_item: None,
            capture_in_flight: false,
            finished: false,
        })
    }

    /// Attaches the host's output channel. The shell severs it explicitly
    /// on teardown via [`clear_output`](Self::clear_output).
    pub fn set_output(&mut self, output: mpsc::UnboundedSender<MediaPickerEvent>) {
        self.output = Some(output);
    }

    pub fn clear_output(&mut self) {
        self.output = None;
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub fn focused_item(&self) -> Option<Uuid> {
        self.focused_item
    }

    pub fn can_add_more_items(&self) -> bool {
        self.selection.can_select_more_items()
    }

    pub fn prepare_selection(&self) -> SelectionState {
        self.selection.prepare_selection()
    }

    fn emit(&self, event: MediaPickerEvent) {
        if let Some(output) = &self.output {
            if output.send(event).is_err() {
                log::debug!("Picker output receiver gone, dropping event");
            }
        }
    }

    /// Mirrors camera surface visibility onto the hardware session, so
    /// the camera never streams while off-screen.
    pub async fn set_camera_visible(&mut self, visible: bool) {
        if self.config.camera_enabled {
            self.camera.set_capture_session_running(visible).await;
        }
    }

    /// One shutter action. `None` when the picker is full, a capture is
    /// already outstanding, or the hardware fails; at most one item is
    /// appended per call.
    pub async fn take_photo(&mut self) -> Option<MediaItem> {
        if self.finished || !self.config.camera_enabled {
            return None;
        }
        if !self.selection.can_select_more_items() {
            log::debug!("Item cap reached, shutter ignored");
            return None;
        }
        // The trigger is disabled here, not in the engine: a second
        // shutter tap while one capture is outstanding adds nothing.
        if self.capture_in_flight {
            log::debug!("Capture already in flight, shutter ignored");
            return None;
        }

        self.capture_in_flight = true;
        let captured = self.camera.take_photo().await;
        self.capture_in_flight = false;

        let item = captured?;
        self.selection.select_item(&item);
        let index = self.items.len();
        self.items.push(item.clone());
        self.emit(MediaPickerEvent::ItemsAdded {
            items: vec![item.clone()],
            index,
        });
        Some(item)
    }

    /// Picks a library photo into the item list. Rejected (state
    /// unchanged) when the picker-wide cap is reached.
    pub fn select_library_item(&mut self, library_item: &PhotoLibraryItem) -> SelectionState {
        if self.finished
            || !self.config.photo_library_enabled
            || self.library_picks.contains_key(library_item.identifier())
            || !self.selection.can_select_more_items()
        {
            return self.selection.prepare_selection();
        }

        let item = MediaItem::new(library_item.image.clone(), MediaItemSource::PhotoLibrary);
        let state = self.selection.select_item(&item);
        self.library_picks
            .insert(library_item.identifier().to_string(), item.clone());
        let index = self.items.len();
        self.items.push(item.clone());
        self.emit(MediaPickerEvent::ItemsAdded {
            items: vec![item],
            index,
        });
        state
    }

    pub fn is_library_item_selected(&self, library_item: &PhotoLibraryItem) -> bool {
        self.library_picks.contains_key(library_item.identifier())
    }

    pub fn deselect_library_item(&mut self, library_item: &PhotoLibraryItem) -> SelectionState {
        match self.library_picks.remove(library_item.identifier()) {
            Some(item) => {
                self.remove_item(item.identifier);
                self.selection.prepare_selection()
            }
            None => self.selection.prepare_selection(),
        }
    }

    /// Reconciles the item list with a library change: picks whose asset
    /// was deleted from the library are dropped from the picker too.
    pub fn handle_library_event(&mut self, event: &PhotoLibraryEvent) {
        if self.finished {
            return;
        }
        let present = match event {
            PhotoLibraryEvent::FullReload(items) => items,
            PhotoLibraryEvent::IncrementalChanges(changes) => &changes.items_after_changes,
        };

        let stale: Vec<(String, MediaItem)> = self
            .library_picks
            .iter()
            .filter(|(asset_id, _)| {
                !present
                    .iter()
                    .any(|library_item| library_item.identifier() == asset_id.as_str())
            })
            .map(|(asset_id, item)| (asset_id.clone(), item.clone()))
            .collect();

        for (asset_id, item) in stale {
            log::info!("Library asset {} disappeared, dropping its pick", asset_id);
            self.library_picks.remove(&asset_id);
            self.remove_item(item.identifier);
        }
    }

    /// Removes an item, reporting it to the host. Returns the adjacent
    /// item the UI should focus next, if any remain.
    pub fn remove_item(&mut self, identifier: Uuid) -> Option<MediaItem> {
        if self.finished {
            return None;
        }
        let index = self
            .items
            .iter()
            .position(|item| item.identifier == identifier)?;
        let removed = self.items.remove(index);
        self.selection.deselect_item(&removed);
        self.library_picks
            .retain(|_, picked| picked.identifier != identifier);
        if self.focused_item == Some(identifier) {
            self.focused_item = None;
        }
        if self
            .cropping
            .as_ref()
            .is_some_and(|session| session.item_identifier == identifier)
        {
            self.cropping = None;
        }
        self.emit(MediaPickerEvent::ItemRemoved {
            item: removed.clone(),
            index,
        });

        // Same index now holds the right-hand neighbor.
        self.items
            .get(index)
            .or_else(|| index.checked_sub(1).and_then(|prev| self.items.get(prev)))
            .cloned()
    }

    pub fn move_item(&mut self, from: usize, to: usize) {
        if from >= self.items.len() || to >= self.items.len() || from == to {
            return;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
    }

    pub fn focus_item(&mut self, identifier: Uuid) {
        if self.items.iter().any(|item| item.identifier == identifier) {
            self.focused_item = Some(identifier);
            self.display_mode = DisplayMode::Preview;
        }
    }

    /// Pure UI-state reset after previewing a shot; no data mutation.
    pub fn return_to_camera(&mut self) {
        self.focused_item = None;
        self.display_mode = DisplayMode::Camera;
    }

    /// Opens a crop editing session on an item. Returns the editor's
    /// starting state: the innermost original plus any prior parameters.
    pub fn begin_crop(&mut self, identifier: Uuid) -> Option<CroppingData> {
        if self.finished {
            return None;
        }
        let item = self
            .items
            .iter()
            .find(|item| item.identifier == identifier)?;
        let store = CroppingParameterStore::new(
            item.image.clone(),
            self.config.crop_canvas_size,
            self.pool.clone(),
        );
        let data = store.image_with_parameters();
        self.cropping = Some(CropSession {
            item_identifier: identifier,
            store,
        });
        Some(data)
    }

    /// Live parameter update from the editor. No resampling yet.
    pub fn set_cropping_parameters(&mut self, parameters: CroppingParameters) {
        if let Some(session) = &self.cropping {
            session.store.set_cropping_parameters(parameters);
        }
    }

    pub async fn cropped_image_aspect_ratio(&self) -> f32 {
        match &self.cropping {
            Some(session) => session.store.cropped_image_aspect_ratio().await,
            None => crate::cropping::DEFAULT_ASPECT_RATIO,
        }
    }

    /// Confirms the crop: the edited item is replaced by a new identity
    /// wrapping the innermost original. `None` (and no change, exactly as
    /// if discarded) when the origin cannot produce pixels.
    pub async fn confirm_crop(&mut self, preview_pixels: Option<DynamicImage>) -> Option<MediaItem> {
        if self.finished {
            return None;
        }
        let session = self.cropping.take()?;
        let data = session.store.image_with_parameters();
        if data.original_image.image_size().await.is_none() {
            log::warn!("Crop origin cannot produce pixels, keeping item unchanged");
            return None;
        }

        let index = self
            .items
            .iter()
            .position(|item| item.identifier == session.item_identifier)?;
        let old = self.items[index].clone();
        let cropped = session.store.cropped_image(preview_pixels);
        let item = MediaItem::new(cropped, old.source);

        self.items[index] = item.clone();
        self.selection.replace_item(&old, item.clone());
        for picked in self.library_picks.values_mut() {
            if *picked == old {
                *picked = item.clone();
            }
        }
        if self.focused_item == Some(old.identifier) {
            self.focused_item = Some(item.identifier);
        }
        self.emit(MediaPickerEvent::ItemUpdated {
            item: item.clone(),
            index,
        });
        Some(item)
    }

    /// Abandons the crop session. Pure no-op on the item list.
    pub fn discard_crop(&mut self) {
        self.cropping = None;
    }

    /// Reports the ordered item list to the host. Terminal; at most one
    /// of finish/cancel fires per picker lifetime.
    pub fn finish(&mut self) -> Vec<MediaItem> {
        if !self.finished {
            self.finished = true;
            self.emit(MediaPickerEvent::Finished(self.items.clone()));
        }
        self.items.clone()
    }

    /// Terminal; reports that nothing was mutated.
    pub fn cancel(&mut self) {
        if !self.finished {
            self.finished = true;
            self.emit(MediaPickerEvent::Cancelled);
        }
    }
}
