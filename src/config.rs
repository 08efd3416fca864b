// Persisted bridge settings
//
// Settings are owned by the host (UI / settings store) and shared with the
// engine through `SharedSettings`. The engine only reads them; every
// `reconcile()` pass diffs them against what it last applied.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::audio::types::ChannelId;

pub const DEFAULT_ENGINE_INDICATOR: &str = "ENGINE_STARTED_INDICATOR";
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 1000;

/// Which mixer the engine writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MixerBackendKind {
    /// Operating system per-process session mixer
    #[default]
    SystemMixer,
    /// Third-party remote mixer reached through its native remote library
    RemoteMixer,
}

/// Names of the two cockpit mode indicators that open the sync gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSettings {
    pub track_fpa_variable: String,
    pub heading_vs_variable: String,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            track_fpa_variable: "autopilot/trk_fpa_mode".to_string(),
            heading_vs_variable: "autopilot/hdg_vs_mode".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub enabled: bool,
    /// Comma-separated candidate process names, first match wins
    pub process_names: String,
    pub knob_variable: String,
    pub mute_variable: String,
    /// Only consulted for Radio1: when false an app-level mute is overridden
    pub latch_mute: bool,
}

impl ChannelSettings {
    pub fn for_channel(channel: ChannelId) -> Self {
        let key = match channel {
            ChannelId::Intercom => "int",
            ChannelId::Radio1 => "vhf1",
            ChannelId::Radio2 => "vhf2",
            ChannelId::Radio3 => "vhf3",
            ChannelId::Cabin => "cab",
            ChannelId::PublicAddress => "pa",
        };
        Self {
            enabled: false,
            process_names: String::new(),
            knob_variable: format!("audio/acp/{}_volume", key),
            mute_variable: format!("audio/acp/{}_mute", key),
            latch_mute: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub backend: MixerBackendKind,
    /// Override path to the remote mixer's native library
    pub remote_library_path: Option<PathBuf>,
    /// Period of the background reconcile pass (`SyncService::start_from_settings`)
    pub reconcile_interval_ms: u64,
    pub gate: GateSettings,
    /// Shared flag that reports whether the ground-service engine is up
    pub engine_indicator: String,
    pub channels: BTreeMap<ChannelId, ChannelSettings>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            backend: MixerBackendKind::default(),
            remote_library_path: None,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            gate: GateSettings::default(),
            engine_indicator: DEFAULT_ENGINE_INDICATOR.to_string(),
            channels: ChannelId::ALL
                .iter()
                .map(|&c| (c, ChannelSettings::for_channel(c)))
                .collect(),
        }
    }
}

impl BridgeSettings {
    /// Settings for `channel`, falling back to the built-in defaults
    pub fn channel(&self, channel: ChannelId) -> ChannelSettings {
        self.channels
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| ChannelSettings::for_channel(channel))
    }

    pub fn channel_mut(&mut self, channel: ChannelId) -> &mut ChannelSettings {
        self.channels
            .entry(channel)
            .or_insert_with(|| ChannelSettings::for_channel(channel))
    }

    /// `<config dir>/cockpit-audio/settings.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cockpit-audio").join("settings.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Load from `path`, or return defaults if the file is missing or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let raw = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }
}

/// Settings handle shared between the host and the engine
pub type SharedSettings = Arc<RwLock<BridgeSettings>>;

pub fn shared(settings: BridgeSettings) -> SharedSettings {
    Arc::new(RwLock::new(settings))
}

/// Split a comma-separated process list. Entries are trimmed, empty entries
/// dropped and the configured order kept.
pub fn parse_process_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
