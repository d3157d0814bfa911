use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::image_source::{AssetImageSource, AssetStore, ImageSource};

/// Access level granted by the OS photo framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoLibraryAuthorization {
    NotDetermined,
    Authorized,
    /// User granted access to a subset of the library.
    Limited,
    Denied,
}

impl PhotoLibraryAuthorization {
    pub fn allows_reading(&self) -> bool {
        matches!(self, Self::Authorized | Self::Limited)
    }
}

/// One still photo as reported by the platform library. `revision`
/// advances whenever the asset's content is edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub identifier: String,
    pub revision: u64,
    pub taken_at: DateTime<Utc>,
}

/// Platform photo framework. Fetches are newest-first and stills only.
#[async_trait]
pub trait PhotoLibraryGateway: Send + Sync {
    fn authorization(&self) -> PhotoLibraryAuthorization;

    /// Triggers the OS permission prompt when not yet determined,
    /// otherwise resolves immediately with the current status.
    async fn request_authorization(&self) -> PhotoLibraryAuthorization;

    async fn fetch_assets(&self, limit: Option<usize>) -> Vec<AssetDescriptor>;

    /// A fresh stream of change notifications. Each tick means "the
    /// library changed, re-fetch and diff".
    fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<()>;
}

/// Library asset paired with its lazily-resolving image. Identity is the
/// platform asset identifier.
#[derive(Clone)]
pub struct PhotoLibraryItem {
    pub descriptor: AssetDescriptor,
    pub image: Arc<dyn ImageSource>,
}

impl PhotoLibraryItem {
    fn from_descriptor(descriptor: AssetDescriptor, store: &Arc<dyn AssetStore>) -> Self {
        let image = Arc::new(AssetImageSource::new(
            descriptor.identifier.clone(),
            store.clone(),
        ));
        Self { descriptor, image }
    }

    pub fn identifier(&self) -> &str {
        &self.descriptor.identifier
    }
}

impl PartialEq for PhotoLibraryItem {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.identifier == other.descriptor.identifier
    }
}

impl Eq for PhotoLibraryItem {}

impl fmt::Debug for PhotoLibraryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoLibraryItem")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Immutable picture of the album at one point in its history. Each diff
/// is computed against exactly one snapshot version.
#[derive(Debug, Clone)]
pub struct AlbumSnapshot {
    pub version: u64,
    pub items: Vec<PhotoLibraryItem>,
}

#[derive(Debug)]
pub enum PhotoLibraryError {
    /// A diff was applied to a snapshot other than the one it was
    /// computed against.
    StaleDiff { expected: u64, actual: u64 },
    IndexOutOfBounds { index: usize, len: usize },
}

impl fmt::Display for PhotoLibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleDiff { expected, actual } => write!(
                f,
                "Diff is pinned to snapshot version {} but was applied to version {}",
                expected, actual
            ),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "Diff index {} out of bounds for length {}", index, len)
            }
        }
    }
}

impl std::error::Error for PhotoLibraryError {}

/// Ordered album diff. Application order is fixed: removals, then
/// insertions, then in-place updates, then moves. Removing before
/// inserting keeps index arithmetic valid without renumbering.
#[derive(Debug, Clone)]
pub struct PhotoLibraryChanges {
    pub removed_indexes: Vec<usize>,
    pub inserted_items: Vec<(usize, PhotoLibraryItem)>,
    pub updated_items: Vec<(usize, PhotoLibraryItem)>,
    pub moved_indexes: Vec<(usize, usize)>,
    /// The full post-change item list, for verification and resync.
    pub items_after_changes: Vec<PhotoLibraryItem>,
    pub base_version: u64,
    pub version: u64,
}

impl PhotoLibraryChanges {
    /// Applies the diff to the snapshot it was computed against.
    pub fn apply_to(
        &self,
        snapshot: &AlbumSnapshot,
    ) -> Result<Vec<PhotoLibraryItem>, PhotoLibraryError> {
        if snapshot.version != self.base_version {
            return Err(PhotoLibraryError::StaleDiff {
                expected: self.base_version,
                actual: snapshot.version,
            });
        }

        let mut items = snapshot.items.clone();

        let mut removed = self.removed_indexes.clone();
        removed.sort_unstable_by(|a, b| b.cmp(a));
        for index in removed {
            if index >= items.len() {
                return Err(PhotoLibraryError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.remove(index);
        }

        for (index, item) in &self.inserted_items {
            if *index > items.len() {
                return Err(PhotoLibraryError::IndexOutOfBounds {
                    index: *index,
                    len: items.len(),
                });
            }
            items.insert(*index, item.clone());
        }

        for (index, item) in &self.updated_items {
            match items.get_mut(*index) {
                Some(slot) => *slot = item.clone(),
                None => {
                    return Err(PhotoLibraryError::IndexOutOfBounds {
                        index: *index,
                        len: items.len(),
                    })
                }
            }
        }

        for (from, to) in &self.moved_indexes {
            if *from >= items.len() || *to >= items.len() {
                return Err(PhotoLibraryError::IndexOutOfBounds {
                    index: (*from).max(*to),
                    len: items.len(),
                });
            }
            let item = items.remove(*from);
            items.insert(*to, item);
        }

        Ok(items)
    }

    /// Computes the ordered diff taking `base` to `new_items`.
    pub fn between(base: &AlbumSnapshot, new_items: Vec<PhotoLibraryItem>) -> Self {
        let new_positions: HashMap<&str, usize> = new_items
            .iter()
            .enumerate()
            .map(|(index, item)| (item.identifier(), index))
            .collect();
        let old_revisions: HashMap<&str, u64> = base
            .items
            .iter()
            .map(|item| (item.identifier(), item.descriptor.revision))
            .collect();

        let removed_indexes: Vec<usize> = base
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| !new_positions.contains_key(item.identifier()))
            .map(|(index, _)| index)
            .collect();

        let mut working: Vec<PhotoLibraryItem> = base
            .items
            .iter()
            .filter(|item| new_positions.contains_key(item.identifier()))
            .cloned()
            .collect();

        let mut inserted_items = Vec::new();
        for (index, item) in new_items.iter().enumerate() {
            if !old_revisions.contains_key(item.identifier()) {
                inserted_items.push((index, item.clone()));
                working.insert(index.min(working.len()), item.clone());
            }
        }

        let mut updated_items = Vec::new();
        for (index, item) in working.iter_mut().enumerate() {
            if let Some(old_revision) = old_revisions.get(item.identifier()) {
                let fresh = &new_items[new_positions[item.identifier()]];
                if *old_revision != fresh.descriptor.revision {
                    *item = fresh.clone();
                    updated_items.push((index, item.clone()));
                }
            }
        }

        let mut moved_indexes = Vec::new();
        for to in 0..new_items.len() {
            if working[to].identifier() != new_items[to].identifier() {
                let from = working
                    .iter()
                    .position(|item| item.identifier() == new_items[to].identifier())
                    .unwrap_or(to);
                let item = working.remove(from);
                working.insert(to, item);
                moved_indexes.push((from, to));
            }
        }

        Self {
            removed_indexes,
            inserted_items,
            updated_items,
            moved_indexes,
            items_after_changes: new_items,
            base_version: base.version,
            version: base.version + 1,
        }
    }
}

/// Album events in delivery order: one baseline, then strictly-ordered
/// incremental diffs.
#[derive(Debug, Clone)]
pub enum PhotoLibraryEvent {
    FullReload(Vec<PhotoLibraryItem>),
    IncrementalChanges(PhotoLibraryChanges),
}

/// Observes the platform photo library and publishes an ordered stream of
/// album events plus the current authorization status.
///
/// One background task owns the snapshot chain; change notifications are
/// processed one at a time in arrival order, so no diff is ever computed
/// against anything but the immediately preceding snapshot.
pub struct PhotoLibrarySource {
    gateway: Arc<dyn PhotoLibraryGateway>,
    store: Arc<dyn AssetStore>,
    // Moved into the worker on start so the channel closes when the
    // worker exits.
    events_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<PhotoLibraryEvent>>>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<PhotoLibraryEvent>>>,
    authorization_tx: watch::Sender<PhotoLibraryAuthorization>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PhotoLibrarySource {
    pub fn new(gateway: Arc<dyn PhotoLibraryGateway>, store: Arc<dyn AssetStore>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (authorization_tx, _) = watch::channel(gateway.authorization());
        Self {
            gateway,
            store,
            events_tx: std::sync::Mutex::new(Some(events_tx)),
            events_rx: std::sync::Mutex::new(Some(events_rx)),
            authorization_tx,
            worker: Mutex::new(None),
        }
    }

    /// The album event stream. Single consumer; subsequent calls return
    /// `None`.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PhotoLibraryEvent>> {
        self.events_rx.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Current and future authorization status. The receiver's initial
    /// value is the status as of the last observation.
    pub fn observe_authorization(&self) -> watch::Receiver<PhotoLibraryAuthorization> {
        self.authorization_tx.subscribe()
    }

    /// Starts observing. Requests authorization when not yet determined;
    /// on grant, publishes a baseline `FullReload` followed by one
    /// `IncrementalChanges` per library change. Idempotent.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }

        let events = match self.events_tx.lock().ok().and_then(|mut slot| slot.take()) {
            Some(events) => events,
            None => {
                log::warn!("Photo library source cannot be restarted after stop");
                return;
            }
        };
        let gateway = self.gateway.clone();
        let store = self.store.clone();
        let authorization = self.authorization_tx.clone();

        *worker = Some(tokio::spawn(async move {
            let publish_status = |status: PhotoLibraryAuthorization| {
                authorization.send_if_modified(|current| {
                    if *current == status {
                        false
                    } else {
                        *current = status;
                        true
                    }
                });
            };

            let status = match gateway.authorization() {
                PhotoLibraryAuthorization::NotDetermined => gateway.request_authorization().await,
                status => status,
            };
            publish_status(status);
            if !status.allows_reading() {
                log::info!("Photo library access not granted ({:?})", status);
                return;
            }

            let mut changes = gateway.subscribe_changes();

            let items: Vec<PhotoLibraryItem> = gateway
                .fetch_assets(None)
                .await
                .into_iter()
                .map(|descriptor| PhotoLibraryItem::from_descriptor(descriptor, &store))
                .collect();
            let mut snapshot = AlbumSnapshot { version: 0, items: items.clone() };
            if events.send(PhotoLibraryEvent::FullReload(items)).is_err() {
                return;
            }

            while changes.recv().await.is_some() {
                // Permission can flip in system settings mid-session; every
                // change tick re-reads and republishes the status.
                let status = gateway.authorization();
                publish_status(status);
                if !status.allows_reading() {
                    log::info!("Photo library access revoked ({:?})", status);
                    continue;
                }

                let fresh: Vec<PhotoLibraryItem> = gateway
                    .fetch_assets(None)
                    .await
                    .into_iter()
                    .map(|descriptor| PhotoLibraryItem::from_descriptor(descriptor, &store))
                    .collect();
                let diff = PhotoLibraryChanges::between(&snapshot, fresh);
                snapshot = AlbumSnapshot {
                    version: diff.version,
                    items: diff.items_after_changes.clone(),
                };
                log::debug!(
                    "Album changed: -{} +{} ~{} moved {} (version {})",
                    diff.removed_indexes.len(),
                    diff.inserted_items.len(),
                    diff.updated_items.len(),
                    diff.moved_indexes.len(),
                    diff.version
                );
                if events.send(PhotoLibraryEvent::IncrementalChanges(diff)).is_err() {
                    return;
                }
            }
        }));
    }

    /// Stops observing. Idempotent; safe to call without a prior `start`.
    pub async fn stop(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.abort();
        }
    }
}

/// Keeps the single most recent library photo available, for the "latest
/// shot" thumbnail on the camera screen.
pub struct PhotoLibraryLatestPhotoProvider {
    gateway: Arc<dyn PhotoLibraryGateway>,
    store: Arc<dyn AssetStore>,
    latest_tx: watch::Sender<Option<PhotoLibraryItem>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PhotoLibraryLatestPhotoProvider {
    pub fn new(gateway: Arc<dyn PhotoLibraryGateway>, store: Arc<dyn AssetStore>) -> Self {
        let (latest_tx, _) = watch::channel(None);
        Self {
            gateway,
            store,
            latest_tx,
            worker: Mutex::new(None),
        }
    }

    pub fn observe(&self) -> watch::Receiver<Option<PhotoLibraryItem>> {
        self.latest_tx.subscribe()
    }

    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }

        let gateway = self.gateway.clone();
        let store = self.store.clone();
        let latest = self.latest_tx.clone();

        *worker = Some(tokio::spawn(async move {
            if !gateway.authorization().allows_reading() {
                return;
            }
            let mut changes = gateway.subscribe_changes();
            loop {
                let item = gateway
                    .fetch_assets(Some(1))
                    .await
                    .into_iter()
                    .next()
                    .map(|descriptor| PhotoLibraryItem::from_descriptor(descriptor, &store));
                latest.send_if_modified(|current| {
                    if current.as_ref() == item.as_ref() {
                        false
                    } else {
                        *current = item;
                        true
                    }
                });
                if changes.recv().await.is_none() {
                    return;
                }
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.abort();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn ids(items: &[PhotoLibraryItem]) -> Vec<&str> {
        items.iter().map(|item| item.identifier()).collect()
    }

    #[test]
    fn removals_apply_before_insertions() {
        let base = snapshot(7, &["A", "B", "C"]);
        let diff = PhotoLibraryChanges {
            removed_indexes: vec![1],
            inserted_items: vec![(1, item("X", 1))],
            updated_items: vec![],
            moved_indexes: vec![],
            items_after_changes: vec![item("A", 1), item("X", 1), item("C", 1)],
            base_version: 7,
            version: 8,
        };

        let applied = diff.apply_to(&base).unwrap();
        assert_eq!(ids(&applied), vec!["A", "X", "C"]);
    }

    #[test]
    fn stale_diff_is_rejected() {
        let diff = PhotoLibraryChanges::between(&snapshot(3, &["A"]), vec![]);
        let err = diff.apply_to(&snapshot(2, &["A"])).unwrap_err();
        assert!(matches!(
            err,
            PhotoLibraryError::StaleDiff { expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let diff = PhotoLibraryChanges {
            removed_indexes: vec![5],
            inserted_items: vec![],
            updated_items: vec![],
            moved_indexes: vec![],
            items_after_changes: vec![],
            base_version: 0,
            version: 1,
        };
        assert!(diff.apply_to(&snapshot(0, &["A"])).is_err());
    }

    #[test]
    fn computed_diff_reproduces_the_new_list() {
        let base = snapshot(0, &["A", "B", "C", "D"]);
        // B removed, X inserted, C edited, D moved ahead of A.
        let new_items = vec![
            item("D", 1),
            item("A", 1),
            item("X", 1),
            item("C", 2),
        ];

        let diff = PhotoLibraryChanges::between(&base, new_items.clone());
        assert_eq!(diff.base_version, 0);
        assert_eq!(diff.version, 1);
        assert_eq!(diff.removed_indexes, vec![1]);
        assert!(!diff.updated_items.is_empty());

        let applied = diff.apply_to(&base).unwrap();
        assert_eq!(ids(&applied), ids(&new_items));
        let c = applied.iter().find(|item| item.identifier() == "C").unwrap();
        assert_eq!(c.descriptor.revision, 2);
    }

    #[test]
    fn unchanged_list_yields_an_empty_diff()  {
        let base = snapshot(4, &["A", "B"]);
        let diff = PhotoLibraryChanges::between(&base, base.items.clone());
        assert!(diff.removed_indexes.is_empty());
        assert!(diff.inserted_items.is_empty());
        assert!(diff.updated_items.is_empty());
        assert!(diff.moved_indexes.is_empty());
    }

    #[tokio::test]
    async fn source_delivers_baseline_then_ordered_diffs() {
        let _ = env_logger::builder().is_test(true).try_init();
        let gateway = Arc::new(FakeGateway::new(PhotoLibraryAuthorization::NotDetermined));
        gateway.seed_assets(vec![descriptor("A", 1), descriptor("B", 1)]);
        let source = PhotoLibrarySource::new(gateway.clone(), Arc::new(FixedAssetStore));
        let mut events = source.take_events().unwrap();
        let mut authorization = source.observe_authorization();

        source.start().await;

        let baseline = match events.recv().await.unwrap() {
            PhotoLibraryEvent::FullReload(items) => items,
            other => panic!("Expected FullReload, got {:?}", other),
        };
        assert_eq!(ids(&baseline), vec!["A", "B"]);
        authorization.changed().await.unwrap();
        assert_eq!(*authorization.borrow(), PhotoLibraryAuthorization::Authorized);

        gateway.push_assets(vec![descriptor("B", 1), descriptor("C", 1)]);
        let diff = match events.recv().await.unwrap() {
            PhotoLibraryEvent::IncrementalChanges(diff) => diff,
            other => panic!("Expected IncrementalChanges, got {:?}", other),
        };
        assert_eq!(diff.base_version, 0);
        assert_eq!(ids(&diff.items_after_changes), vec!["B", "C"]);

        source.stop().await;
        source.stop().await;
    }

    #[tokio::test]
    async fn authorization_changes_reach_subscribers_mid_session() {
        let gateway = Arc::new(FakeGateway::new(PhotoLibraryAuthorization::Authorized));
        gateway.seed_assets(vec![descriptor("A", 1)]);
        let source = PhotoLibrarySource::new(gateway.clone(), Arc::new(FixedAssetStore));
        let mut events = source.take_events().unwrap();
        let mut authorization = source.observe_authorization();

        source.start().await;
        assert!(matches!(
            events.recv().await.unwrap(),
            PhotoLibraryEvent::FullReload(_)
        ));

        // Access revoked in system settings: the next change tick
        // republishes the status and suspends album diffing.
        gateway.set_authorization(PhotoLibraryAuthorization::Denied);
        gateway.push_assets(vec![]);
        authorization.changed().await.unwrap();
        assert_eq!(*authorization.borrow(), PhotoLibraryAuthorization::Denied);

        // Re-granting resumes diffing against the retained snapshot.
        gateway.set_authorization(PhotoLibraryAuthorization::Authorized);
        gateway.push_assets(vec![descriptor("A", 1), descriptor("B", 1)]);
        authorization.changed().await.unwrap();
        assert_eq!(
            *authorization.borrow(),
            PhotoLibraryAuthorization::Authorized
        );
        let diff = match events.recv().await.unwrap() {
            PhotoLibraryEvent::IncrementalChanges(diff) => diff,
            other => panic!("Expected IncrementalChanges, got {:?}", other),
        };
        assert_eq!(diff.base_version, 0);

        source.stop().await;
    }

    #[tokio::test]
    async fn denied_access_publishes_status_and_no_events() {
        let gateway = Arc::new(FakeGateway::new(PhotoLibraryAuthorization::Denied));
        let source = PhotoLibrarySource::new(gateway, Arc::new(FixedAssetStore));
        let mut events = source.take_events().unwrap();

        source.start().await;

        // Worker exits after publishing the status; the channel closes
        // with no album events delivered.
        assert!(events.recv().await.is_none());
        assert_eq!(
            *source.observe_authorization().borrow(),
            PhotoLibraryAuthorization::Denied
        );
    }

    #[tokio::test]
    async fn latest_photo_provider_tracks_the_newest_asset() {
        let gateway = Arc::new(FakeGateway::new(PhotoLibraryAuthorization::Authorized));
        gateway.seed_assets(vec![descriptor("old", 1)]);
        let provider = PhotoLibraryLatestPhotoProvider::new(gateway.clone(), Arc::new(FixedAssetStore));
        let mut latest = provider.observe();

        provider.start().await;
        latest.changed().await.unwrap();
        assert_eq!(latest.borrow().as_ref().unwrap().identifier(), "old");

        gateway.push_assets(vec![descriptor("new", 1), descriptor("old", 1)]);
        latest.changed().await.unwrap();
        assert_eq!(latest.borrow().as_ref().unwrap().identifier(), "new");

        provider.stop().await;
    }
}
