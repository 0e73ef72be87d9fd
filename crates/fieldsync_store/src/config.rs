//! Store configuration.

use fieldsync_events::Modality;

/// Configuration for an [`EventRepository`](crate::EventRepository).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Id of this device, stamped on scopes and events.
    pub device_id: String,

    /// Version of the app recording events.
    pub app_version: String,

    /// Model name of the device.
    pub device_model: String,

    /// OS SDK version of the device.
    pub os_version: String,

    /// UI language, if known.
    pub language: Option<String>,

    /// Modalities enabled for the project.
    pub modalities: Vec<Modality>,

    /// Whether to sync the record files after every write.
    pub sync_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            device_model: String::new(),
            os_version: String::new(),
            language: None,
            modalities: Vec::new(),
            sync_on_write: true,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration for a device.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Sets the app version.
    #[must_use]
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Sets the device model and OS version.
    #[must_use]
    pub fn with_device(mut self, model: impl Into<String>, os_version: impl Into<String>) -> Self {
        self.device_model = model.into();
        self.os_version = os_version.into();
        self
    }

    /// Sets the UI language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Sets the enabled modalities.
    #[must_use]
    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.modalities = modalities;
        self
    }

    /// Sets whether to sync after every write.
    #[must_use]
    pub const fn with_sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = StoreConfig::new("device-1")
            .with_language("fr")
            .with_modalities(vec![Modality::Face])
            .with_sync_on_write(false);
        assert_eq!(config.device_id, "device-1");
        assert_eq!(config.language.as_deref(), Some("fr"));
        assert_eq!(config.modalities, vec![Modality::Face]);
        assert!(!config.sync_on_write);
    }
}
