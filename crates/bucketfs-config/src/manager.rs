//! Shared configuration handle with hot-reload support.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{ConfigError, GatewayConfig};

/// Holds the live configuration behind an atomically swappable pointer
/// so readers never block while a reload is in flight.
pub struct ConfigManager {
    config: ArcSwap<GatewayConfig>,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            path: None,
        }
    }

    /// Load the configuration from a file, remembering the path for
    /// [`reload`](Self::reload).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = GatewayConfig::load(path)?;
        Ok(Self {
            config: ArcSwap::from_pointee(config),
            path: Some(path.to_path_buf()),
        })
    }

    /// The current configuration. Cheap; suitable for per-request use.
    pub fn get(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    /// Replace the configuration after validating it.
    pub fn update(&self, new_config: GatewayConfig) -> Result<(), ConfigError> {
        new_config.validate()?;
        self.config.store(Arc::new(new_config));
        Ok(())
    }

    /// Re-read the file this manager was loaded from.
    pub fn reload(&self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.path {
            let new_config = GatewayConfig::load(path)?;
            self.config.store(Arc::new(new_config));
            tracing::info!("config reloaded from {:?}", path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_validates() {
        let mut ok = GatewayConfig::default();
        ok.bucket = "b".into();
        let manager = ConfigManager::new(ok);

        let bad = GatewayConfig::default(); // empty bucket
        assert!(manager.update(bad).is_err());
        assert_eq!(manager.get().bucket, "b");

        let mut better = GatewayConfig::default();
        better.bucket = "c".into();
        manager.update(better).unwrap();
        assert_eq!(manager.get().bucket, "c");
    }
}
