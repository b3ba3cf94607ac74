// Copyright 2025 The ocabox-server Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Pilar connector configuration.
//!
//! Stored as TOML:
//!
//! ```toml
//! [settings]
//! connection_pool_size = 4
//! id_pool_range = [1, 99]
//!
//! [settings.timeouts]
//! connection = 5.0
//! get_command = 5.0
//! set_command = 10.0
//! pool_get = 5.0
//!
//! [mappings.commands.telescope]
//! rightascension = "TELESCOPE.MOUNT.RA"
//!
//! [mappings.resource_locks]
//! "TELESCOPE.MOUNT.RA" = "mount"
//!
//! [[actions.park]]
//! component = "telescope"
//! variable = "tracking"
//! value = false
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::ConnectorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilarConfig {
    pub settings: Settings,
    #[serde(default)]
    pub mappings: Mappings,
    /// Named actions, each a sequence of variable writes.
    #[serde(default)]
    pub actions: HashMap<String, Vec<ActionStep>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub connection_pool_size: usize,
    /// Inclusive range of command IDs handed out to requests.
    pub id_pool_range: [u32; 2],
    pub timeouts: Timeouts,
}

/// Timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    pub connection: f64,
    pub get_command: f64,
    pub set_command: f64,
    pub pool_get: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mappings {
    /// component kind -> variable -> Pilar command.
    #[serde(default)]
    pub commands: HashMap<String, HashMap<String, String>>,
    /// Pilar command -> resource name; commands on one resource are serialized.
    #[serde(default)]
    pub resource_locks: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub component: String,
    pub variable: String,
    /// Literal value, or `"{name}"` to take the call argument `name`.
    pub value: Value,
}

impl ActionStep {
    /// Name of the call argument this step is bound to, if any.
    #[must_use]
    pub fn placeholder(&self) -> Option<&str> {
        self.value
            .as_str()
            .and_then(|s| s.strip_prefix('{'))
            .and_then(|s| s.strip_suffix('}'))
    }
}

impl Default for PilarConfig {
    fn default() -> Self {
        let mut telescope = HashMap::new();
        for (variable, command) in [
            ("rightascension", "TELESCOPE.MOUNT.RA"),
            ("declination", "TELESCOPE.MOUNT.DEC"),
            ("tracking", "TELESCOPE.MOUNT.TRACKING"),
            ("azimuth", "TELESCOPE.MOUNT.AZ"),
            ("altitude", "TELESCOPE.MOUNT.ALT"),
        ] {
            telescope.insert(variable.to_string(), command.to_string());
        }

        let mut resource_locks = BTreeMap::new();
        for command in ["TELESCOPE.MOUNT.RA", "TELESCOPE.MOUNT.DEC", "TELESCOPE.MOUNT.TRACKING"] {
            resource_locks.insert(command.to_string(), "mount".to_string());
        }

        let mut actions = HashMap::new();
        actions.insert(
            "slewtocoordinates".to_string(),
            vec![
                ActionStep {
                    component: "telescope".to_string(),
                    variable: "rightascension".to_string(),
                    value: Value::String("{RightAscension}".to_string()),
                },
                ActionStep {
                    component: "telescope".to_string(),
                    variable: "declination".to_string(),
                    value: Value::String("{Declination}".to_string()),
                },
            ],
        );

        Self {
            settings: Settings {
                connection_pool_size: 4,
                id_pool_range: [1, 99],
                timeouts: Timeouts {
                    connection: 5.0,
                    get_command: 5.0,
                    set_command: 10.0,
                    pool_get: 5.0,
                },
            },
            mappings: Mappings {
                commands: HashMap::from([("telescope".to_string(), telescope)]),
                resource_locks,
            },
            actions,
        }
    }
}

impl PilarConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConnectorError> {
        info!("Loading Pilar configuration from: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::Config(format!(
                "could not read Pilar config file at {}: {e}",
                path.display()
            ))
        })?;
        let config = Self::from_toml(&text)?;
        info!("Pilar configuration loaded successfully.");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConnectorError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| ConnectorError::Config(format!("Pilar config is corrupted: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        let [lo, hi] = self.settings.id_pool_range;
        if lo == 0 || lo > hi {
            return Err(ConnectorError::Config(format!(
                "invalid id_pool_range [{lo}, {hi}]"
            )));
        }
        if self.settings.connection_pool_size == 0 {
            return Err(ConnectorError::Config(
                "connection_pool_size must be at least 1".to_string(),
            ));
        }
        let timeouts = &self.settings.timeouts;
        for (name, secs) in [
            ("connection", timeouts.connection),
            ("get_command", timeouts.get_command),
            ("set_command", timeouts.set_command),
            ("pool_get", timeouts.pool_get),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConnectorError::Config(format!("invalid {name} timeout {secs}")));
            }
        }
        Ok(())
    }

    /// Pilar command mapped to `variable` of a component of `kind`.
    #[must_use]
    pub fn command(&self, kind: &str, variable: &str) -> Option<&str> {
        self.mappings
            .commands
            .get(kind)
            .and_then(|vars| vars.get(variable))
            .map(String::as_str)
    }

    /// Resource guarding `command`, if commands on it must be serialized.
    #[must_use]
    pub fn resource_for(&self, command: &str) -> Option<&str> {
        self.mappings.resource_locks.get(command).map(String::as_str)
    }

    pub(crate) fn timeout(secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const SAMPLE: &str = r#"
[settings]
connection_pool_size = 2
id_pool_range = [10, 12]

[settings.timeouts]
connection = 1.0
get_command = 2.0
set_command = 3.0
pool_get = 0.5

[mappings.commands.focuser]
position = "FOCUS.POS"

[mappings.resource_locks]
"FOCUS.POS" = "focus"

[[actions.refocus]]
component = "focuser"
variable = "position"
value = "{target}"

[[actions.refocus]]
component = "focuser"
variable = "position"
value = 100
"#;

    #[test]
    fn test_parse_sample() {
        let config = PilarConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.settings.connection_pool_size, 2);
        assert_eq!(config.settings.id_pool_range, [10, 12]);
        assert_eq!(config.command("focuser", "position"), Some("FOCUS.POS"));
        assert_eq!(config.command("focuser", "temperature"), None);
        assert_eq!(config.resource_for("FOCUS.POS"), Some("focus"));

        let steps = &config.actions["refocus"];
        assert_eq!(steps[0].placeholder(), Some("target"));
        assert_eq!(steps[1].placeholder(), None);
        assert_eq!(steps[1].value, json!(100));
    }

    #[test]
    fn test_invalid_id_range_rejected() {
        let text = SAMPLE.replace("[10, 12]", "[12, 10]");
        assert!(matches!(PilarConfig::from_toml(&text), Err(ConnectorError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PilarConfig::load(Path::new("/nonexistent/pilar.toml")).unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = PilarConfig::load(file.path()).unwrap();
        assert_eq!(config.settings.timeouts.pool_get, 0.5);
    }

    #[test]
    fn test_default_is_valid() {
        let config = PilarConfig::default();
        config.validate().unwrap();
        assert_eq!(config.command("telescope", "tracking"), Some("TELESCOPE.MOUNT.TRACKING"));
        assert_eq!(config.resource_for("TELESCOPE.MOUNT.RA"), Some("mount"));
    }
}
