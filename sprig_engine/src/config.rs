use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::input::{KeyCombo, ReservedControl};
use crate::lua_host::DEFAULT_ENTRY_POINT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlBindings {
    #[serde(default = "ControlBindings::default_toggle_debug")]
    pub toggle_debug: KeyCombo,
    #[serde(default = "ControlBindings::default_save")]
    pub save: KeyCombo,
    #[serde(default = "ControlBindings::default_load")]
    pub load: KeyCombo,
    #[serde(default = "ControlBindings::default_toggle_pause")]
    pub toggle_pause: KeyCombo,
}

impl ControlBindings {
    fn combo_of(text: &str) -> KeyCombo {
        KeyCombo::from_keys(text.split('+'))
    }

    fn default_toggle_debug() -> KeyCombo {
        Self::combo_of("ctrl+d")
    }

    fn default_save() -> KeyCombo {
        Self::combo_of("ctrl+s")
    }

    fn default_load() -> KeyCombo {
        Self::combo_of("ctrl+l")
    }

    fn default_toggle_pause() -> KeyCombo {
        Self::combo_of("ctrl+p")
    }

    pub fn combo(&self, control: ReservedControl) -> &KeyCombo {
        match control {
            ReservedControl::ToggleDebug => &self.toggle_debug,
            ReservedControl::Save => &self.save,
            ReservedControl::Load => &self.load,
            ReservedControl::TogglePause => &self.toggle_pause,
        }
    }
}

impl Default for ControlBindings {
    fn default() -> Self {
        Self {
            toggle_debug: Self::default_toggle_debug(),
            save: Self::default_save(),
            load: Self::default_load(),
            toggle_pause: Self::default_toggle_pause(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_entry_point")]
    pub entry_point: String,
    #[serde(default)]
    pub controls: ControlBindings,
}

impl EngineConfig {
    fn default_entry_point() -> String {
        DEFAULT_ENTRY_POINT.to_string()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("reading engine config {}", path.display()))?;
        let config = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing engine config {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("engine config unavailable ({err:#}); using defaults");
                Self::default()
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_point: Self::default_entry_point(),
            controls: ControlBindings::default(),
        }
    }
}
