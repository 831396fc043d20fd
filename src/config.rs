//! Engine configuration, read from `~/.varaha/config.json` or a given path.
//!
//! Every field has a default, so `{}` is a complete config.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::delivery::cache::{FileStore, KeyValueStore, ResolutionCache};
use crate::delivery::orchestrator::{DeliveryEngine, Timings};
use crate::delivery::resolver::PostalCodeResolver;
use crate::delivery::table::{BuiltinTable, PostalCodeTable, RecordTable, TableError, DEPOT};
use crate::geo::GeoCoordinate;
use crate::zones::ZoneTable;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("depot coordinate {0} is out of range")]
    InvalidDepot(GeoCoordinate),
    #[error("{0} must be greater than zero")]
    InvalidTiming(&'static str),
    #[error("cache namespace must not be empty")]
    EmptyNamespace,
    #[error(transparent)]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Origin of every distance.
    pub depot: GeoCoordinate,
    /// Delivery tiers, validated as a partition of `[0, ∞)` on load.
    pub zones: ZoneTable,
    /// JSON array of postal-code records replacing the built-in table.
    pub postal_codes: Option<PathBuf>,
    pub geolocation_timeout_ms: u64,
    pub fallback_after_ms: u64,
    pub manual_lookup_delay_ms: u64,
    pub position_max_age_ms: u64,
    pub cache_namespace: String,
    /// Defaults to `~/.varaha/store.json`.
    pub store_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depot: DEPOT,
            zones: ZoneTable::reference(),
            postal_codes: None,
            geolocation_timeout_ms: 5000,
            fallback_after_ms: 2000,
            manual_lookup_delay_ms: 500,
            position_max_age_ms: 300_000,
            cache_namespace: "varaha".to_string(),
            store_path: None,
        }
    }
}

impl EngineConfig {
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".varaha")
    }

    pub fn default_path() -> PathBuf {
        Self::default_dir().join("config.json")
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// An explicit path must exist; otherwise the default file is used if
    /// present, else built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Zone partitioning is checked during deserialization; this covers
    /// the rest.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.depot.is_valid() {
            return Err(ConfigError::InvalidDepot(self.depot));
        }
        if self.geolocation_timeout_ms == 0 {
            return Err(ConfigError::InvalidTiming("geolocation_timeout_ms"));
        }
        if self.fallback_after_ms == 0 {
            return Err(ConfigError::InvalidTiming("fallback_after_ms"));
        }
        if self.cache_namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        Ok(())
    }

    pub fn timings(&self) -> Timings {
        Timings {
            geolocation_timeout: Duration::from_millis(self.geolocation_timeout_ms),
            fallback_after: Duration::from_millis(self.fallback_after_ms),
            manual_lookup_delay: Duration::from_millis(self.manual_lookup_delay_ms),
            position_max_age: Duration::from_millis(self.position_max_age_ms),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(FileStore::default_path)
    }

    pub fn postal_table(&self) -> Result<Arc<dyn PostalCodeTable>, ConfigError> {
        Ok(match &self.postal_codes {
            Some(path) => Arc::new(RecordTable::load(path)?),
            None => Arc::new(BuiltinTable),
        })
    }

    pub fn resolver(&self) -> Result<PostalCodeResolver, ConfigError> {
        Ok(PostalCodeResolver::new(self.postal_table()?, self.zones.clone(), self.depot))
    }

    /// Engine without a geolocation provider; attach one with
    /// [`DeliveryEngine::with_provider`].
    pub fn engine(&self, store: Arc<dyn KeyValueStore>) -> Result<DeliveryEngine, ConfigError> {
        let cache = ResolutionCache::new(store, &self.cache_namespace);
        Ok(DeliveryEngine::new(self.resolver()?, cache).with_timings(self.timings()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::cache::MemoryStore;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_empty_object_is_default() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.json", "{}");
        assert_eq!(EngineConfig::load(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_default_timings() {
        let t = EngineConfig::default().timings();
        assert_eq!(t, Timings::default());
    }

    #[test]
    fn test_partial_override() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.json", r#"{"fallback_after_ms": 3000, "cache_namespace": "shop"}"#);
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.timings().fallback_after, Duration::from_secs(3));
        assert_eq!(config.cache_namespace, "shop");
        assert_eq!(config.depot, DEPOT);
    }

    #[test]
    fn test_gapped_zones_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "config.json",
            r#"{"zones": [
                {"id":"a","radius_km_upper_bound":20,"eta_label":"x","display_label":"A","icon_glyph":"a"},
                {"id":"b","radius_km_upper_bound":10,"eta_label":"y","display_label":"B","icon_glyph":"b"},
                {"id":"c","radius_km_upper_bound":null,"eta_label":"z","display_label":"C","icon_glyph":"c"}
            ]}"#,
        );
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("does not extend past"));
    }

    #[test]
    fn test_bad_depot_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.json", r#"{"depot": {"latitude": 95.0, "longitude": 0.0}}"#);
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::InvalidDepot(_))));
    }

    #[test]
    fn test_zero_timing_rejected() {
        let config = EngineConfig {
            fallback_after_ms: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming("fallback_after_ms"))));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            EngineConfig::load_or_default(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_external_postal_table() {
        let dir = TempDir::new().unwrap();
        let table = write(
            &dir,
            "pincodes.json",
            r#"[{"code":"302001","coordinate":{"latitude":26.9124,"longitude":75.7873},"city":"Pink City"}]"#,
        );
        let config = EngineConfig {
            postal_codes: Some(table),
            ..EngineConfig::default()
        };
        let resolver = config.resolver().unwrap();
        assert_eq!(resolver.resolve_by_postal_code("302001").unwrap().city.as_deref(), Some("Pink City"));
        assert_eq!(resolver.resolve_by_postal_code("110001").unwrap().distance_km, None);
    }

    #[test]
    fn test_engine_uses_namespace() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            cache_namespace: "shop".into(),
            ..EngineConfig::default()
        };
        let engine = config.engine(store).unwrap();
        assert_eq!(engine.cache().key(), "shop.delivery");
        assert_eq!(engine.timings(), config.timings());
    }
}
