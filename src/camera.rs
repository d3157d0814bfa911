use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::image_source::{ImageProcessingPool, LocalImageSource, SizeOption};
use crate::models::{ExifOrientation, MediaItem, MediaItemSource, PixelSize, PointF};
use crate::orientation::CameraFacing;

/// Opaque handle to a configured capture session. The host's preview
/// surface renders from it; nothing else inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSessionHandle {
    id: Uuid,
}

impl CaptureSessionHandle {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for CaptureSessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform camera hardware. The engine drives the lifecycle; the
/// platform layer implements the actual device calls.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Configures a session for the given facing. `None` when access is
    /// denied or no suitable hardware exists.
    async fn acquire_session(&self, facing: CameraFacing) -> Option<CaptureSessionHandle>;

    /// Switches a live session to the other camera. `None` when the
    /// reconfiguration fails; the previous session stays valid.
    async fn reconfigure(
        &self,
        session: &CaptureSessionHandle,
        facing: CameraFacing,
    ) -> Option<CaptureSessionHandle>;

    fn can_toggle(&self) -> bool;

    fn is_flash_available(&self, session: &CaptureSessionHandle) -> bool;

    /// Best-effort hardware flash switch. `false` means the hardware
    /// refused and the previous setting is still in effect.
    async fn set_flash(&self, session: &CaptureSessionHandle, enabled: bool) -> bool;

    /// Best-effort tap-to-focus.
    async fn focus_on_point(&self, session: &CaptureSessionHandle, point: PointF) -> bool;

    async fn set_running(&self, session: &CaptureSessionHandle, running: bool);

    /// Captures a still and writes it to temporary storage. `None` on
    /// hardware failure.
    async fn capture_still(&self, session: &CaptureSessionHandle) -> Option<PathBuf>;
}

/// Session handle plus the rotation needed to present its frames upright.
#[derive(Debug, Clone)]
pub struct CameraOutputParameters {
    pub session: CaptureSessionHandle,
    pub orientation: ExifOrientation,
}

#[derive(Debug, Clone)]
enum SessionState {
    Uninitialized,
    Running(CaptureSessionHandle),
    Paused(CaptureSessionHandle),
    /// Access denied or no hardware; terminal until the engine is rebuilt.
    Unavailable,
}

struct EngineState {
    session: SessionState,
    facing: CameraFacing,
    flash_enabled: bool,
}

/// Owns the capture session lifecycle: configuration, pause/resume,
/// front/back toggling, flash, focus and photo taking.
///
/// All state lives behind one async mutex, so operations requested while
/// a configuration or toggle is in flight queue behind it rather than
/// interleaving with hardware reconfiguration. Only `take_photo` has an
/// extra guard: a second capture while one is in flight fails closed.
pub struct CameraCaptureEngine {
    device: Arc<dyn CameraDevice>,
    pool: Arc<ImageProcessingPool>,
    state: Mutex<EngineState>,
    capture_in_flight: AtomicBool,
    preview_size: std::sync::Mutex<Option<PixelSize>>,
}

impl CameraCaptureEngine {
    pub fn new(device: Arc<dyn CameraDevice>, pool: Arc<ImageProcessingPool>) -> Self {
        Self {
            device,
            pool,
            state: Mutex::new(EngineState {
                session: SessionState::Uninitialized,
                facing: CameraFacing::Back,
                flash_enabled: false,
            }),
            capture_in_flight: AtomicBool::new(false),
            preview_size: std::sync::Mutex::new(None),
        }
    }

    /// Sets the size previews attached to newly captured photos are
    /// rendered at. Unset means captures carry no pre-rendered preview.
    pub fn set_preview_images_size_for_new_photos(&self, size: PixelSize) {
        if let Ok(mut preview_size) = self.preview_size.lock() {
            *preview_size = Some(size);
        }
    }

    /// Configures the session on first call, then returns the live handle
    /// and output orientation. `None` when the camera is unavailable.
    pub async fn output_parameters(&self) -> Option<CameraOutputParameters> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state).await;

        let session = match &state.session {
            SessionState::Running(session) | SessionState::Paused(session) => session.clone(),
            SessionState::Uninitialized | SessionState::Unavailable => return None,
        };
        Some(CameraOutputParameters {
            session,
            orientation: state.facing.output_orientation(),
        })
    }

    async fn ensure_session(&self, state: &mut EngineState) {
        if matches!(state.session, SessionState::Uninitialized) {
            // Configuring: the lock is held across the whole acquisition,
            // so nothing can observe a half-built session.
            match self.device.acquire_session(state.facing).await {
                Some(session) => {
                    self.device.set_running(&session, true).await;
                    state.session = SessionState::Running(session);
                }
                None => {
                    log::warn!("Camera session unavailable");
                    state.session = SessionState::Unavailable;
                }
            }
        }
    }

    pub async fn is_flash_available(&self) -> bool {
        let state = self.state.lock().await;
        match &state.session {
            SessionState::Running(session) | SessionState::Paused(session) => {
                self.device.is_flash_available(session)
            }
            _ => false,
        }
    }

    pub async fn is_flash_enabled(&self) -> bool {
        self.state.lock().await.flash_enabled
    }

    /// Best-effort flash switch. On hardware refusal the previous enabled
    /// state stays authoritative and `false` is returned so the caller
    /// can roll back optimistic UI.
    pub async fn set_flash_enabled(&self, enabled: bool) -> bool {
        let mut state = self.state.lock().await;
        let session = match &state.session {
            SessionState::Running(session) | SessionState::Paused(session) => session.clone(),
            _ => return false,
        };
        if self.device.set_flash(&session, enabled).await {
            state.flash_enabled = enabled;
            true
        } else {
            log::warn!("Flash switch refused by hardware, keeping enabled={}", state.flash_enabled);
            false
        }
    }

    pub fn can_toggle_camera(&self) -> bool {
        self.device.can_toggle()
    }

    /// Switches between front and back camera. Returns the output
    /// orientation for the new facing, or the current one when the
    /// hardware cannot toggle or reconfiguration fails.
    pub async fn toggle_camera(&self) -> ExifOrientation {
        let mut state = self.state.lock().await;
        if !self.device.can_toggle() {
            return state.facing.output_orientation();
        }
        let session = match &state.session {
            SessionState::Running(session) | SessionState::Paused(session) => session.clone(),
            _ => return state.facing.output_orientation(),
        };

        // Toggling: holding the lock keeps captures and further toggles
        // queued until reconfiguration settles.
        let target = state.facing.toggled();
        match self.device.reconfigure(&session, target).await {
            Some(new_session) => {
                state.facing = target;
                let was_paused = matches!(state.session, SessionState::Paused(_));
                state.session = if was_paused {
                    SessionState::Paused(new_session)
                } else {
                    SessionState::Running(new_session)
                };
            }
            None => {
                log::warn!("Camera toggle failed, staying on {:?}", state.facing);
            }
        }
        state.facing.output_orientation()
    }

    /// Pauses or resumes frame streaming. Used when the camera surface
    /// goes off-screen so the hardware is never active while hidden.
    pub async fn set_capture_session_running(&self, running: bool) {
        let mut state = self.state.lock().await;
        match (&state.session, running) {
            (SessionState::Running(session), false) => {
                let session = session.clone();
                self.device.set_running(&session, false).await;
                state.session = SessionState::Paused(session);
            }
            (SessionState::Paused(session), true) => {
                let session = session.clone();
                self.device.set_running(&session, true).await;
                state.session = SessionState::Running(session);
            }
            _ => {}
        }
    }

    pub async fn focus_on_point(&self, point: PointF) -> bool {
        let state = self.state.lock().await;
        match &state.session {
            SessionState::Running(session) => self.device.focus_on_point(session, point).await,
            _ => false,
        }
    }

    /// Captures a photo. `None` when the session is not running, a
    /// capture is already in flight, or the hardware fails.
    ///
    /// The returned item's image delivers the pre-rendered preview first
    /// so it can appear in the UI before the full decode finishes.
    pub async fn take_photo(&self) -> Option<MediaItem> {
        let (session, orientation) = {
            let state = self.state.lock().await;
            match &state.session {
                SessionState::Running(session) => {
                    (session.clone(), state.facing.output_orientation())
                }
                _ => {
                    log::debug!("Ignoring capture request, session not running");
                    return None;
                }
            }
        };

        if self.capture_in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("Ignoring capture request, one already in flight");
            return None;
        }
        let path = self.device.capture_still(&session).await;
        self.capture_in_flight.store(false, Ordering::SeqCst);
        let path = path?;

        let preview_size = self.preview_size.lock().ok().and_then(|size| *size);
        let preview = match preview_size {
            Some(size) => {
                let decode_path = path.clone();
                self.pool
                    .run(move || match image::open(&decode_path) {
                        Ok(image) => Some(crate::image_source::resize_for(
                            image,
                            &SizeOption::Fit(size),
                        )),
                        Err(e) => {
                            log::warn!("Failed to render capture preview: {}", e);
                            None
                        }
                    })
                    .await
                    .flatten()
            }
            None => None,
        };

        log::info!(
            "Captured photo at {} (orientation {:?})",
            path.display(),
            orientation
        );
        let source = LocalImageSource::with_preview(path, preview, self.pool.clone());
        Some(MediaItem::new(Arc::new(source), MediaItemSource::Camera))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::ImageSource;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Scriptable in-memory camera.
    struct FakeDevice {
        can_toggle: bool,
        flash_accepts: bool,
        reconfigure_succeeds: bool,
        capture_delay: Duration,
        capture_count: AtomicUsize,
        running: std::sync::Mutex<Option<bool>>,
        capture_file: std::sync::Mutex<Option<PathBuf>>,
    }

    impl FakeDevice {
        fn new() -> Self {
            Self {
                can_toggle: true,
                flash_accepts: true,
                reconfigure_succeeds: true,
                capture_delay: Duration::ZERO,
                capture_count: AtomicUsize::new(0),
                running: std::sync::Mutex::new(None),
                capture_file: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CameraDevice for FakeDevice {
        async fn acquire_session(&self, _facing: CameraFacing) -> Option<CaptureSessionHandle> {
            Some(CaptureSessionHandle::new())
        }

        async fn reconfigure(
            &self,
            _session: &CaptureSessionHandle,
            _facing: CameraFacing,
        ) -> Option<CaptureSessionHandle> {
            self.reconfigure_succeeds.then(CaptureSessionHandle::new)
        }

        fn can_toggle(&self) -> bool {
            self.can_toggle
        }

        fn is_flash_available(&self, _session: &CaptureSessionHandle) -> bool {
            true
        }

        async fn set_flash(&self, _session: &CaptureSessionHandle, _enabled: bool) -> bool {
            self.flash_accepts
        }

        async fn focus_on_point(&self, _session: &CaptureSessionHandle, _point: PointF) -> bool {
            true
        }

        async fn set_running(&self, _session: &CaptureSessionHandle, running: bool) {
            *self.running.lock().unwrap() = Some(running);
        }

        async fn capture_still(&self, _session: &CaptureSessionHandle) -> Option<PathBuf> {
            tokio::time::sleep(self.capture_delay).await;
            self.capture_count.fetch_add(1, Ordering::SeqCst);
            self.capture_file.lock().unwrap().clone()
        }
    }

    fn engine(device: FakeDevice) -> CameraCaptureEngine {
        CameraCaptureEngine::new(Arc::new(device), Arc::new(ImageProcessingPool::default()))
    }

    #[tokio::test]
    async fn output_parameters_configure_lazily_and_report_orientation() {
        let engine = engine(FakeDevice::new());
        let parameters = engine.output_parameters().await.unwrap();
        assert_eq!(parameters.orientation, ExifOrientation::Left);
    }

    #[tokio::test]
    async fn unavailable_hardware_yields_no_parameters() {
        struct NoCamera;

        #[async_trait]
        impl CameraDevice for NoCamera {
            async fn acquire_session(&self, _: CameraFacing) -> Option<CaptureSessionHandle> {
                None
            }
            async fn reconfigure(
                &self,
                _: &CaptureSessionHandle,
                _: CameraFacing,
            ) -> Option<CaptureSessionHandle> {
                None
            }
            fn can_toggle(&self) -> bool {
                false
            }
            fn is_flash_available(&self, _: &CaptureSessionHandle) -> bool {
                false
            }
            async fn set_flash(&self, _: &CaptureSessionHandle, _: bool) -> bool {
                false
            }
            async fn focus_on_point(&self, _: &CaptureSessionHandle, _: PointF) -> bool {
                false
            }
            async fn set_running(&self, _: &CaptureSessionHandle, _: bool) {}
            async fn capture_still(&self, _: &CaptureSessionHandle) -> Option<PathBuf> {
                None
            }
        }

        let engine = CameraCaptureEngine::new(
            Arc::new(NoCamera),
            Arc::new(ImageProcessingPool::default()),
        );
        assert!(engine.output_parameters().await.is_none());
        assert!(engine.take_photo().await.is_none());
    }

    #[tokio::test]
    async fn toggle_switches_facing_and_orientation() {
        let engine = engine(FakeDevice::new());
        engine.output_parameters().await.unwrap();

        assert_eq!(engine.toggle_camera().await, ExifOrientation::LeftMirrored);
        assert_eq!(engine.toggle_camera().await, ExifOrientation::Left);
    }

    #[tokio::test]
    async fn failed_toggle_keeps_previous_facing() {
        let mut device = FakeDevice::new();
        device.reconfigure_succeeds = false;
        let engine = engine(device);
        engine.output_parameters().await.unwrap();

        assert_eq!(engine.toggle_camera().await, ExifOrientation::Left);
        let parameters = engine.output_parameters().await.unwrap();
        assert_eq!(parameters.orientation, ExifOrientation::Left);
    }

    #[tokio::test]
    async fn refused_flash_keeps_previous_state() {
        let mut device = FakeDevice::new();
        device.flash_accepts = false;
        let engine = engine(device);
        engine.output_parameters().await.unwrap();

        assert!(!engine.set_flash_enabled(true).await);
        assert!(!engine.is_flash_enabled().await);
    }

    #[tokio::test]
    async fn accepted_flash_updates_state() {
        let engine = engine(FakeDevice::new());
        engine.output_parameters().await.unwrap();

        assert!(engine.set_flash_enabled(true).await);
        assert!(engine.is_flash_enabled().await);
    }

    #[tokio::test]
    async fn paused_session_rejects_capture_and_focus() {
        let engine = engine(FakeDevice::new());
        engine.output_parameters().await.unwrap();

        engine.set_capture_session_running(false).await;
        assert!(engine.take_photo().await.is_none());
        assert!(!engine.focus_on_point(PointF::new(0.5, 0.5)).await);

        engine.set_capture_session_running(true).await;
        assert!(engine.focus_on_point(PointF::new(0.5, 0.5)).await);
    }

    #[tokio::test]
    async fn capture_produces_a_camera_item() {
        let temp = std::env::temp_dir().join(format!("capture-{}.jpg", Uuid::new_v4()));
        let mut buffer = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(8, 6)
            .write_to(&mut buffer, image::ImageFormat::Jpeg)
            .unwrap();
        std::fs::write(&temp, buffer.into_inner()).unwrap();

        let device = FakeDevice::new();
        *device.capture_file.lock().unwrap() = Some(temp.clone());
        let engine = engine(device);
        engine.output_parameters().await.unwrap();
        engine.set_preview_images_size_for_new_photos(PixelSize::new(4, 4));

        let item = engine.take_photo().await.unwrap();
        assert_eq!(item.source, MediaItemSource::Camera);
        assert_eq!(
            item.image.image_size().await,
            Some(PixelSize::new(8, 6))
        );

        std::fs::remove_file(&temp).ok();
    }

    #[tokio::test]
    async fn concurrent_capture_is_rejected() {
        let mut device = FakeDevice::new();
        device.capture_delay = Duration::from_millis(50);
        let engine = Arc::new(engine(device));
        engine.output_parameters().await.unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.take_photo().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.take_photo().await.is_none());
        // First capture ran to completion (it just had no file to return).
        first.await.unwrap();
    }
}
