//! Configuration store (spec §1 "out of scope" collaborator, §6 "Persistent
//! configuration keys"). `ConfigStore` is the trait the rest of the crate
//! depends on; `TomlConfigStore` is the one real implementation, backed by a
//! TOML file on disk and a `notify` watch so edits apply without a restart,
//! mirroring how the teacher's config collaborators hand out a typed getter
//! plus a change feed rather than a raw map.

use crate::types::{AutosuspendPolicy, DisplayOffOverride, InhibitMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to install file watcher: {0}")]
    Watch(#[from] notify::Error),
}

/// The §6 key set. Variant names match `RawConfig`'s fields one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    Brightness,
    BlankTimeout,
    DimTimeout,
    DimTimeoutList,
    AdaptiveDimThreshold,
    UseAdaptiveDimming,
    UseLowPowerMode,
    InhibitBlankMode,
    UseAutosuspend,
    CpuScalingGovernor,
    FadeDurationDefault,
    FadeDurationDim,
    FadeDurationAls,
    FadeDurationBlank,
    FadeDurationUnblank,
    CompositorCoreDumpDelay,
    DisplayOffOverride,
    NeverBlank,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Int(i64),
    Bool(bool),
    Str(String),
    List(Vec<i64>),
}

impl ConfigValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[i64]> {
        match self {
            Self::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// The on-disk shape. Every field has a spec-mandated default so a missing or
/// partially written config file never blocks startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawConfig {
    pub brightness: i64,
    pub blank_timeout: i64,
    pub dim_timeout: i64,
    pub dim_timeout_list: Vec<i64>,
    pub adaptive_dim_threshold: i64,
    pub use_adaptive_dimming: bool,
    pub use_low_power_mode: bool,
    pub inhibit_blank_mode: String,
    pub use_autosuspend: String,
    pub cpu_scaling_governor: String,
    pub fade_duration_default: i64,
    pub fade_duration_dim: i64,
    pub fade_duration_als: i64,
    pub fade_duration_blank: i64,
    pub fade_duration_unblank: i64,
    pub compositor_core_dump_delay: i64,
    pub display_off_override: String,
    pub never_blank: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            brightness: 80,
            blank_timeout: 5,
            dim_timeout: 30,
            dim_timeout_list: vec![30, 60, 120, 240],
            adaptive_dim_threshold: 4000,
            use_adaptive_dimming: false,
            use_low_power_mode: true,
            inhibit_blank_mode: "off".into(),
            use_autosuspend: "enabled".into(),
            cpu_scaling_governor: "unset".into(),
            fade_duration_default: 250,
            fade_duration_dim: 150,
            fade_duration_als: 1000,
            fade_duration_blank: 100,
            fade_duration_unblank: 90,
            compositor_core_dump_delay: 30,
            display_off_override: "disabled".into(),
            never_blank: false,
        }
    }
}

impl RawConfig {
    fn value_of(&self, key: ConfigKey) -> ConfigValue {
        use ConfigValue::*;
        match key {
            ConfigKey::Brightness => Int(self.brightness.clamp(1, 100)),
            ConfigKey::BlankTimeout => Int(self.blank_timeout),
            ConfigKey::DimTimeout => Int(self.dim_timeout),
            ConfigKey::DimTimeoutList => List(self.dim_timeout_list.clone()),
            ConfigKey::AdaptiveDimThreshold => Int(self.adaptive_dim_threshold),
            ConfigKey::UseAdaptiveDimming => Bool(self.use_adaptive_dimming),
            ConfigKey::UseLowPowerMode => Bool(self.use_low_power_mode),
            ConfigKey::InhibitBlankMode => Str(self.inhibit_blank_mode.clone()),
            ConfigKey::UseAutosuspend => Str(self.use_autosuspend.clone()),
            ConfigKey::CpuScalingGovernor => Str(self.cpu_scaling_governor.clone()),
            ConfigKey::FadeDurationDefault => Int(self.fade_duration_default),
            ConfigKey::FadeDurationDim => Int(self.fade_duration_dim),
            ConfigKey::FadeDurationAls => Int(self.fade_duration_als),
            ConfigKey::FadeDurationBlank => Int(self.fade_duration_blank),
            ConfigKey::FadeDurationUnblank => Int(self.fade_duration_unblank),
            ConfigKey::CompositorCoreDumpDelay => Int(self.compositor_core_dump_delay),
            ConfigKey::DisplayOffOverride => Str(self.display_off_override.clone()),
            ConfigKey::NeverBlank => Bool(self.never_blank),
        }
    }
}

/// Typed access on top of the generic store, one method per §6 key that
/// needs more than a raw `ConfigValue` (enum parsing, clamping).
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: ConfigKey) -> ConfigValue;
    fn watch(&self, key: ConfigKey) -> watch::Receiver<ConfigValue>;

    fn inhibit_mode(&self) -> InhibitMode {
        match self.get(ConfigKey::InhibitBlankMode).as_str() {
            Some("stay-on-with-charger") => InhibitMode::StayOnWithCharger,
            Some("stay-dim-with-charger") => InhibitMode::StayDimWithCharger,
            Some("stay-on") => InhibitMode::StayOn,
            Some("stay-dim") => InhibitMode::StayDim,
            _ => InhibitMode::Off,
        }
    }

    fn autosuspend_policy(&self) -> AutosuspendPolicy {
        match self.get(ConfigKey::UseAutosuspend).as_str() {
            Some("disabled") => AutosuspendPolicy::Disabled,
            Some("early-only") => AutosuspendPolicy::EarlyOnly,
            _ => AutosuspendPolicy::Enabled,
        }
    }

    fn display_off_override(&self) -> DisplayOffOverride {
        match self.get(ConfigKey::DisplayOffOverride).as_str() {
            Some("use-lpm") => DisplayOffOverride::UseLpm,
            _ => DisplayOffOverride::Disabled,
        }
    }
}

struct Slot {
    tx: watch::Sender<ConfigValue>,
}

/// TOML-file backed `ConfigStore`. One `watch::Sender` per key; `reload`
/// recomputes every key from a freshly parsed `RawConfig` and only sends on
/// the channels whose value actually changed (a `watch` receiver only wakes
/// on send, so an unconditional send-every-key would wake every observer on
/// every unrelated edit).
pub struct TomlConfigStore {
    path: PathBuf,
    slots: HashMap<ConfigKey, Slot>,
}

const ALL_KEYS: &[ConfigKey] = &[
    ConfigKey::Brightness,
    ConfigKey::BlankTimeout,
    ConfigKey::DimTimeout,
    ConfigKey::DimTimeoutList,
    ConfigKey::AdaptiveDimThreshold,
    ConfigKey::UseAdaptiveDimming,
    ConfigKey::UseLowPowerMode,
    ConfigKey::InhibitBlankMode,
    ConfigKey::UseAutosuspend,
    ConfigKey::CpuScalingGovernor,
    ConfigKey::FadeDurationDefault,
    ConfigKey::FadeDurationDim,
    ConfigKey::FadeDurationAls,
    ConfigKey::FadeDurationBlank,
    ConfigKey::FadeDurationUnblank,
    ConfigKey::CompositorCoreDumpDelay,
    ConfigKey::DisplayOffOverride,
    ConfigKey::NeverBlank,
];

impl TomlConfigStore {
    /// Load `path`, falling back to defaults for a missing file (first boot
    /// with no config written yet is not an error).
    pub fn load(path: impl Into<PathBuf>) -> Result<Arc<Self>, ConfigError> {
        let path = path.into();
        let raw = Self::read(&path)?;
        let mut slots = HashMap::with_capacity(ALL_KEYS.len());
        for key in ALL_KEYS {
            let (tx, _rx) = watch::channel(raw.value_of(*key));
            slots.insert(*key, Slot { tx });
        }
        Ok(Arc::new(Self { path, slots }))
    }

    fn read(path: &Path) -> Result<RawConfig, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "no configuration file present, using defaults");
                Ok(RawConfig::default())
            }
            Err(err) => Err(ConfigError::Read(err)),
        }
    }

    /// Re-read the file and propagate any changed keys to their watchers.
    /// Called from the `notify` callback installed by
    /// [`Self::spawn_watcher`].
    pub fn reload(&self) {
        let raw = match Self::read(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(?err, "failed to reload configuration, keeping last-good values");
                return;
            }
        };
        for key in ALL_KEYS {
            let slot = &self.slots[key];
            let next = raw.value_of(*key);
            if *slot.tx.borrow() != next {
                let _ = slot.tx.send(next);
            }
        }
    }

    /// Install a `notify` watch on the config file's parent directory
    /// (watching the file itself misses editors that replace-via-rename) and
    /// call [`Self::reload`] on every event. The watcher thread owns a strong
    /// `Arc` so it keeps the store reachable for as long as it runs.
    pub fn spawn_watcher(store: &Arc<Self>) -> Result<notify::RecommendedWatcher, ConfigError> {
        use notify::{RecursiveMode, Watcher};

        let store = Arc::clone(store);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            match event {
                Ok(_) => store.reload(),
                Err(err) => warn!(?err, "configuration file watcher error"),
            }
        })?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

impl ConfigStore for TomlConfigStore {
    fn get(&self, key: ConfigKey) -> ConfigValue {
        self.slots[&key].tx.borrow().clone()
    }

    fn watch(&self, key: ConfigKey) -> watch::Receiver<ConfigValue> {
        self.slots[&key].tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let store = TomlConfigStore::load("/nonexistent/path/mce.toml").unwrap();
        assert_eq!(store.get(ConfigKey::Brightness), ConfigValue::Int(80));
        assert_eq!(store.get(ConfigKey::UseLowPowerMode), ConfigValue::Bool(true));
    }

    #[test]
    fn brightness_is_clamped_into_one_to_one_hundred() {
        let mut raw = RawConfig::default();
        raw.brightness = 0;
        assert_eq!(raw.value_of(ConfigKey::Brightness), ConfigValue::Int(1));
        raw.brightness = 101;
        assert_eq!(raw.value_of(ConfigKey::Brightness), ConfigValue::Int(100));
    }

    #[test]
    fn inhibit_mode_parses_from_string_key() {
        let mut raw = RawConfig::default();
        raw.inhibit_blank_mode = "stay-dim".into();
        let dir = std::env::temp_dir().join(format!("mce-test-{:?}", std::thread::current().id()));
        std::fs::write(&dir, toml::to_string(&raw).unwrap()).unwrap();
        let store = TomlConfigStore::load(&dir).unwrap();
        assert_eq!(store.inhibit_mode(), InhibitMode::StayDim);
        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn reload_only_sends_on_changed_keys() {
        let dir = std::env::temp_dir().join(format!("mce-test-reload-{:?}", std::thread::current().id()));
        std::fs::write(&dir, toml::to_string(&RawConfig::default()).unwrap()).unwrap();
        let store = TomlConfigStore::load(&dir).unwrap();
        let mut unrelated = store.watch(ConfigKey::NeverBlank);
        unrelated.mark_unchanged();

        let mut raw = RawConfig::default();
        raw.brightness = 42;
        std::fs::write(&dir, toml::to_string(&raw).unwrap()).unwrap();
        store.reload();

        assert_eq!(store.get(ConfigKey::Brightness), ConfigValue::Int(42));
        assert!(!unrelated.has_changed().unwrap());
        let _ = std::fs::remove_file(&dir);
    }
}
