use tokio::sync::watch;

use crate::models::ExifOrientation;

/// Physical orientation of the device, independent of any UI rotation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOrientation {
    Unknown,
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl DeviceOrientation {
    pub fn is_landscape(&self) -> bool {
        matches!(self, Self::LandscapeLeft | Self::LandscapeRight)
    }
}

/// Which way a camera faces relative to the device screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Back,
    Front,
}

impl CameraFacing {
    pub fn toggled(&self) -> Self {
        match self {
            Self::Back => Self::Front,
            Self::Front => Self::Back,
        }
    }

    /// Orientation tag to attach to stills so they display upright.
    /// Sensors are mounted landscape; the front camera mirrors.
    pub fn output_orientation(&self) -> ExifOrientation {
        match self {
            Self::Back => ExifOrientation::Left,
            Self::Front => ExifOrientation::LeftMirrored,
        }
    }
}

/// Fan-out point for device orientation updates. The platform layer feeds
/// it; interested components subscribe.
pub struct DeviceOrientationMonitor {
    sender: watch::Sender<DeviceOrientation>,
}

impl DeviceOrientationMonitor {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(DeviceOrientation::Unknown);
        Self { sender }
    }

    pub fn current(&self) -> DeviceOrientation {
        *self.sender.borrow()
    }

    /// Publishes a new orientation. Repeats are dropped so subscribers
    /// only wake on actual changes.
    pub fn set_orientation(&self, orientation: DeviceOrientation) {
        self.sender.send_if_modified(|current| {
            if *current == orientation {
                false
            } else {
                *current = orientation;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceOrientation> {
        self.sender.subscribe()
    }
}

impl Default for DeviceOrientationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_orientation_changes() {
        let monitor = DeviceOrientationMonitor::new();
        let mut receiver = monitor.subscribe();
        assert_eq!(*receiver.borrow(), DeviceOrientation::Unknown);

        monitor.set_orientation(DeviceOrientation::LandscapeLeft);
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow(), DeviceOrientation::LandscapeLeft);
        assert!(monitor.current().is_landscape());
    }

    #[tokio::test]
    async fn repeated_orientation_does_not_wake_subscribers() {
        let monitor = DeviceOrientationMonitor::new();
        monitor.set_orientation(DeviceOrientation::Portrait);

        let mut receiver = monitor.subscribe();
        monitor.set_orientation(DeviceOrientation::Portrait);
        assert!(!receiver.has_changed().unwrap());
    }

    #[test]
    fn camera_output_orientation_per_facing() {
        assert_eq!(
            CameraFacing::Back.output_orientation(),
            ExifOrientation::Left
        );
        assert_eq!(
            CameraFacing::Front.output_orientation(),
            ExifOrientation::LeftMirrored
        );
        assert_eq!(CameraFacing::Back.toggled(), CameraFacing::Front);
    }
}
