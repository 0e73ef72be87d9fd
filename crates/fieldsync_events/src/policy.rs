//! Up-sync policy.

use crate::event::Event;
use serde::{Deserialize, Serialize};

/// Which session events a project allows to leave the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpSyncKind {
    /// Every event.
    #[default]
    All,
    /// Only events carrying or referencing biometric templates.
    OnlyBiometrics,
    /// Everything except raw biometric samples.
    OnlyAnalytics,
    /// Nothing.
    None,
}

impl UpSyncKind {
    /// Returns true if this kind ever uploads anything.
    pub fn allows_up_sync(self) -> bool {
        self != UpSyncKind::None
    }

    /// Returns true if `event` may be uploaded under this kind.
    pub fn accepts(self, event: &Event) -> bool {
        let event_type = event.event_type();
        match self {
            UpSyncKind::All => true,
            UpSyncKind::OnlyBiometrics => event_type.is_biometric(),
            UpSyncKind::OnlyAnalytics => !event_type.is_raw_biometric_sample(),
            UpSyncKind::None => false,
        }
    }

    /// Keeps the events this kind accepts.
    pub fn filter(self, events: Vec<Event>) -> Vec<Event> {
        events.into_iter().filter(|e| self.accepts(e)).collect()
    }
}
