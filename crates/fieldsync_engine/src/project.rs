//! Project settings and device checks consulted before a sync.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use fieldsync_events::{Modality, UpSyncKind};
use fieldsync_store::{DownSyncScope, Partitioning};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// When a project syncs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncFrequency {
    /// Only upload, on the periodic schedule.
    OnlyPeriodicallyUpSync,
    /// Upload and download on the periodic schedule.
    #[default]
    Periodically,
    /// Periodically and whenever a session starts.
    PeriodicallyAndOnSessionStart,
}

/// Lifecycle state of a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectState {
    /// Normal operation.
    #[default]
    Running,
    /// Temporarily suspended by the project owner.
    Paused,
    /// Being wound down.
    Ending,
}

/// Sync-related project settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfiguration {
    /// Project id.
    pub project_id: String,
    /// What leaves the device.
    pub up_sync_kind: UpSyncKind,
    /// When the project syncs.
    pub frequency: SyncFrequency,
    /// How the remote log is split for download.
    pub partitioning: Partitioning,
    /// Modules selected on this device.
    #[serde(default)]
    pub module_ids: Vec<String>,
    /// Modalities to download.
    #[serde(default)]
    pub modes: Vec<Modality>,
}

impl ProjectConfiguration {
    /// Creates a configuration that syncs everything of the whole project.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            up_sync_kind: UpSyncKind::All,
            frequency: SyncFrequency::Periodically,
            partitioning: Partitioning::Project,
            module_ids: Vec::new(),
            modes: vec![Modality::Fingerprint],
        }
    }

    /// Sets the up-sync kind.
    pub fn with_up_sync_kind(mut self, kind: UpSyncKind) -> Self {
        self.up_sync_kind = kind;
        self
    }

    /// Sets the sync frequency.
    pub fn with_frequency(mut self, frequency: SyncFrequency) -> Self {
        self.frequency = frequency;
        self
    }

    /// Downloads one partition per module.
    pub fn with_modules(mut self, module_ids: Vec<String>) -> Self {
        self.partitioning = Partitioning::Module;
        self.module_ids = module_ids;
        self
    }

    /// Sets the partitioning.
    pub fn with_partitioning(mut self, partitioning: Partitioning) -> Self {
        self.partitioning = partitioning;
        self
    }

    /// Sets the modalities to download.
    pub fn with_modes(mut self, modes: Vec<Modality>) -> Self {
        self.modes = modes;
        self
    }

    /// Returns the download scope for an attendant.
    pub fn down_sync_scope(&self, user_id: impl Into<String>) -> DownSyncScope {
        DownSyncScope {
            project_id: self.project_id.clone(),
            user_id: user_id.into(),
            module_ids: self.module_ids.clone(),
            modes: self.modes.clone(),
            partitioning: self.partitioning,
        }
    }
}

/// Source of project settings.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Returns the current project configuration.
    async fn project_configuration(&self) -> SyncResult<ProjectConfiguration>;

    /// Returns the current project state.
    async fn project_state(&self) -> SyncResult<ProjectState>;
}

/// A [`ConfigProvider`] holding fixed values that can be swapped at runtime.
#[derive(Debug)]
pub struct StaticConfigProvider {
    configuration: RwLock<ProjectConfiguration>,
    state: RwLock<ProjectState>,
}

impl StaticConfigProvider {
    /// Creates a provider for a running project.
    pub fn new(configuration: ProjectConfiguration) -> Self {
        Self {
            configuration: RwLock::new(configuration),
            state: RwLock::new(ProjectState::Running),
        }
    }

    /// Replaces the configuration.
    pub fn set_configuration(&self, configuration: ProjectConfiguration) {
        *self.configuration.write() = configuration;
    }

    /// Replaces the project state.
    pub fn set_state(&self, state: ProjectState) {
        *self.state.write() = state;
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn project_configuration(&self) -> SyncResult<ProjectConfiguration> {
        Ok(self.configuration.read().clone())
    }

    async fn project_state(&self) -> SyncResult<ProjectState> {
        Ok(*self.state.read())
    }
}

/// Device integrity checks.
pub trait SecurityManager: Send + Sync {
    /// Fails with [`SyncError::RootedDevice`] on a rooted device.
    fn check_if_device_is_rooted(&self) -> SyncResult<()>;
}

/// A [`SecurityManager`] whose verdict is set by the caller.
#[derive(Debug, Default)]
pub struct StaticSecurity {
    rooted: AtomicBool,
}

impl StaticSecurity {
    /// Creates a manager reporting an intact device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the device is reported as rooted.
    pub fn set_rooted(&self, rooted: bool) {
        self.rooted.store(rooted, Ordering::SeqCst);
    }
}

impl SecurityManager for StaticSecurity {
    fn check_if_device_is_rooted(&self) -> SyncResult<()> {
        if self.rooted.load(Ordering::SeqCst) {
            Err(SyncError::RootedDevice)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_configuration_builds_module_scope() {
        let config = ProjectConfiguration::new("p1")
            .with_modules(vec!["m1".into(), "m2".into()])
            .with_modes(vec![Modality::Face]);
        let scope = config.down_sync_scope("u1");
        assert_eq!(scope.partitioning, Partitioning::Module);
        assert_eq!(scope.partitions().len(), 2);
        assert_eq!(scope.user_id, "u1");
    }

    #[test]
    fn configuration_json() {
        let json = r#"{
            "projectId": "p1",
            "upSyncKind": "ONLY_ANALYTICS",
            "frequency": "ONLY_PERIODICALLY_UP_SYNC",
            "partitioning": "USER"
        }"#;
        let config: ProjectConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.up_sync_kind, UpSyncKind::OnlyAnalytics);
        assert_eq!(config.frequency, SyncFrequency::OnlyPeriodicallyUpSync);
        assert!(config.module_ids.is_empty());
    }

    #[test]
    fn rooted_check() {
        let security = StaticSecurity::new();
        assert!(security.check_if_device_is_rooted().is_ok());
        security.set_rooted(true);
        assert!(matches!(
            security.check_if_device_is_rooted(),
            Err(SyncError::RootedDevice)
        ));
    }

    #[tokio::test]
    async fn static_provider_swaps_values() {
        let provider = StaticConfigProvider::new(ProjectConfiguration::new("p1"));
        provider.set_state(ProjectState::Paused);
        assert_eq!(provider.project_state().await.unwrap(), ProjectState::Paused);
        provider.set_configuration(ProjectConfiguration::new("p2"));
        assert_eq!(
            provider.project_configuration().await.unwrap().project_id,
            "p2"
        );
    }
}
