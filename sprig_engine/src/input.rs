use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ControlBindings;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid key combination `{0}`")]
pub struct KeyComboError(String);

/// A set of keys that must all be held, written as `ctrl+s`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyCombo {
    keys: BTreeSet<String>,
}

impl KeyCombo {
    /// Builds a combo from already-split key names.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        KeyCombo {
            keys: pressed_set(keys),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn held_in(&self, pressed: &BTreeSet<String>) -> bool {
        self.keys.iter().all(|key| pressed.contains(key))
    }
}

impl FromStr for KeyCombo {
    type Err = KeyComboError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut keys = BTreeSet::new();
        for part in text.split('+') {
            let key = part.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(KeyComboError(text.to_string()));
            }
            keys.insert(key);
        }
        Ok(KeyCombo { keys })
    }
}

impl TryFrom<String> for KeyCombo {
    type Error = KeyComboError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyCombo> for String {
    fn from(combo: KeyCombo) -> Self {
        combo.to_string()
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Modifiers read better first.
        let (modifiers, rest): (Vec<&str>, Vec<&str>) = self
            .keys()
            .partition(|key| matches!(*key, "ctrl" | "shift" | "alt" | "meta"));
        let joined: Vec<&str> = modifiers.into_iter().chain(rest).collect();
        f.write_str(&joined.join("+"))
    }
}

/// Host-level controls handled after the script pass of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservedControl {
    ToggleDebug,
    Save,
    Load,
    TogglePause,
}

impl ReservedControl {
    pub const ALL: [ReservedControl; 4] = [
        ReservedControl::ToggleDebug,
        ReservedControl::Save,
        ReservedControl::Load,
        ReservedControl::TogglePause,
    ];
}

/// Normalizes a raw pressed-key list to the lowercase set combos match on.
pub fn pressed_set<I, S>(keys: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .map(|key| key.as_ref().trim().to_ascii_lowercase())
        .filter(|key| !key.is_empty())
        .collect()
}

/// Remembers the previous frame's pressed set so held combos fire once.
#[derive(Debug, Default, Clone)]
pub struct InputTracker {
    previous: BTreeSet<String>,
}

impl InputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `pressed` as the current sample and returns the reserved
    /// controls whose combination became fully held this frame.
    pub fn advance(&mut self, pressed: &BTreeSet<String>, bindings: &ControlBindings) -> Vec<ReservedControl> {
        let fired = ReservedControl::ALL
            .into_iter()
            .filter(|control| {
                let combo = bindings.combo(*control);
                combo.held_in(pressed) && !combo.held_in(&self.previous)
            })
            .collect();
        self.previous = pressed.clone();
        fired
    }

    pub fn reset(&mut self) {
        self.previous.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{pressed_set, InputTracker, KeyCombo, ReservedControl};
    use crate::config::ControlBindings;

    #[test]
    fn combos_parse_case_insensitively() {
        let combo: KeyCombo = "Ctrl + S".parse().expect("combo");
        assert_eq!(combo.to_string(), "ctrl+s");
        assert!("ctrl+".parse::<KeyCombo>().is_err());
    }

    #[test]
    fn held_combo_fires_only_on_the_first_frame() {
        let bindings = ControlBindings::default();
        let mut tracker = InputTracker::new();
        let held = pressed_set(["ctrl", "s"]);
        assert_eq!(tracker.advance(&held, &bindings), vec![ReservedControl::Save]);
        assert!(tracker.advance(&held, &bindings).is_empty());
        tracker.advance(&pressed_set(["ctrl"]), &bindings);
        assert_eq!(tracker.advance(&held, &bindings), vec![ReservedControl::Save]);
    }

    #[test]
    fn plain_keys_fire_nothing() {
        let bindings = ControlBindings::default();
        let mut tracker = InputTracker::new();
        assert!(tracker
            .advance(&pressed_set(["s", "d", "arrowleft"]), &bindings)
            .is_empty());
    }
}
