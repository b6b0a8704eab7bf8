//! Monitoring and masking capabilities of resource descendants.
//!
//! The framework never collects metrics itself. It only flips masks and
//! monitoring statuses on descendant objects during engage and reset.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// How much a monitored object's health counts towards its parent's.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitoringStatus {
    #[default]
    Enabled,
    NonCritical,
    Disabled,
}

impl fmt::Display for MonitoringStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enabled => "enabled",
            Self::NonCritical => "non-critical",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Descendant whose alarms can be suppressed.
pub trait MaskableObject: Send + Sync {
    /// Id relative to the owning resource.
    fn id(&self) -> &str;

    fn is_masked(&self) -> bool;

    fn set_masked(&self, masked: bool);
}

/// Descendant with an adjustable monitoring status.
pub trait MonitorableObject: Send + Sync {
    /// Id relative to the owning resource.
    fn id(&self) -> &str;

    fn monitoring_status(&self) -> MonitoringStatus;

    fn set_monitoring_status(&self, status: MonitoringStatus);
}

/// Simple descendant that is both maskable and monitorable.
#[derive(Debug)]
pub struct Component {
    id: String,
    masked: AtomicBool,
    status: Mutex<MonitoringStatus>,
}

impl Component {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            masked: AtomicBool::new(false),
            status: Mutex::new(MonitoringStatus::Enabled),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl MaskableObject for Component {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_masked(&self) -> bool {
        self.masked.load(Ordering::SeqCst)
    }

    fn set_masked(&self, masked: bool) {
        self.masked.store(masked, Ordering::SeqCst);
    }
}

impl MonitorableObject for Component {
    fn id(&self) -> &str {
        &self.id
    }

    fn monitoring_status(&self) -> MonitoringStatus {
        *self.status.lock()
    }

    fn set_monitoring_status(&self, status: MonitoringStatus) {
        *self.status.lock() = status;
    }
}
