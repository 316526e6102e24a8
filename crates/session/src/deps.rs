use std::sync::Arc;
use std::time::Duration;

use utter_audio::{AudioFocus, CaptureDevice};
use utter_engine::EngineFactory;
use utter_vad::FrameClassifier;

use crate::constants::OOM_RECLAIM_DELAY;

/// Capture-permission precondition, answered by the host platform.
pub trait PermissionGate: Send + Sync {
    fn is_granted(&self) -> bool;
}

/// Gate for hosts without a permission model.
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn is_granted(&self) -> bool {
        true
    }
}

/// Best-effort memory reclamation between out-of-memory retries.
///
/// The mechanism is environment-dependent; the default simply backs off
/// and lets the allocator settle.
#[async_trait::async_trait]
pub trait ReclaimStrategy: Send + Sync {
    async fn reclaim(&self);
}

/// Fixed-delay reclaim cycle.
pub struct DelayReclaim {
    delay: Duration,
}

impl DelayReclaim {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DelayReclaim {
    fn default() -> Self {
        Self::new(OOM_RECLAIM_DELAY)
    }
}

#[async_trait::async_trait]
impl ReclaimStrategy for DelayReclaim {
    async fn reclaim(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

/// External collaborators one session consumes.
pub struct SessionDeps {
    pub device: Arc<dyn CaptureDevice>,
    pub focus: Arc<dyn AudioFocus>,
    pub permission: Arc<dyn PermissionGate>,
    pub engines: Arc<dyn EngineFactory>,
    pub classifier: Box<dyn FrameClassifier>,
    pub reclaim: Arc<dyn ReclaimStrategy>,
}
